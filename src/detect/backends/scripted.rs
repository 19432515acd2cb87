use crate::detect::backend::DetectorBackend;
use crate::detect::result::RawDetection;
use crate::error::Result;

/// Scripted backend for tests and demos.
///
/// Returns a pre-programmed list of raw detections for each frame in order,
/// then empty frames. Detection models are nondeterministic in timing; this
/// backend is not, which is what the aggregation tests need.
pub struct ScriptedBackend {
    frames: Vec<Vec<RawDetection>>,
    cursor: usize,
}

impl ScriptedBackend {
    pub fn new(frames: Vec<Vec<RawDetection>>) -> Self {
        Self { frames, cursor: 0 }
    }

    /// Scripted frames remaining before the backend goes quiet.
    pub fn remaining(&self) -> usize {
        self.frames.len().saturating_sub(self.cursor)
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, _pixels: &[u8], _width: u32, _height: u32) -> Result<Vec<RawDetection>> {
        let out = self.frames.get(self.cursor).cloned().unwrap_or_default();
        self.cursor += 1;
        Ok(out)
    }
}
