use crate::detect::result::RawDetection;
use crate::error::Result;

/// Detector backend trait: the black-box boundary to the inference provider.
///
/// The core never depends on a backend's internals, only on this output
/// shape and the externally supplied class table. Implementations must treat
/// the pixel slice as read-only and ephemeral.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame, returning raw (class, confidence, box)
    /// candidates. Threshold filtering happens in the pipeline, not here.
    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
