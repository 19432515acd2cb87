//! citywatch - run the detection pipeline and query stored runs

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::time::Duration;

use citywatch::{
    BackendRegistry, BoundingBox, CitywatchConfig, DateRange, Deadline, DetectionRun, Metadata,
    Pipeline, RawDetection, RunFilter, RunStore, ScriptedBackend, SqliteRunStore,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the citywatch database (overrides config).
    #[arg(long, env = "CITYWATCH_DB_PATH")]
    db_path: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest raw detections from a JSON file and persist one run.
    Ingest {
        /// Source reference recorded on the run (path, camera id, ...).
        #[arg(long)]
        source: String,
        /// JSON file: a list of raw detections (image) or a list of frames,
        /// each a list of raw detections (video).
        #[arg(long)]
        input: String,
        /// Treat the input as a frame sequence and deduplicate across frames.
        #[arg(long)]
        video: bool,
        /// Abort with a timeout if processing exceeds this many milliseconds.
        #[arg(long)]
        budget_ms: Option<u64>,
    },
    /// Run a synthetic scripted detection sequence end to end.
    Demo {
        /// Number of frames the scripted backend emits.
        #[arg(long, default_value_t = 5)]
        frames: u32,
        /// Class id of the synthetic detection.
        #[arg(long, default_value_t = 0)]
        class_id: i64,
    },
    /// Print one run by id.
    Show {
        #[arg(long)]
        id: i64,
    },
    /// List runs, newest first.
    List {
        #[arg(long)]
        class: Option<String>,
        /// Inclusive lower bound, epoch seconds.
        #[arg(long)]
        since: Option<i64>,
        /// Inclusive upper bound, epoch seconds.
        #[arg(long)]
        until: Option<i64>,
        #[arg(long)]
        min_confidence: Option<f32>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Violation counts per class over a date range.
    Stats {
        #[arg(long)]
        since: Option<i64>,
        #[arg(long)]
        until: Option<i64>,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut cfg = CitywatchConfig::load()?;
    if let Some(db_path) = args.db_path {
        cfg.db_path = db_path;
    }
    let mut store = SqliteRunStore::open(&cfg.db_path)?;

    match args.command {
        Command::Ingest {
            source,
            input,
            video,
            budget_ms,
        } => {
            let pipeline = pipeline_from(&cfg)?;
            let raw = std::fs::read_to_string(&input)
                .with_context(|| format!("failed to read {}", input))?;
            let deadline = match budget_ms {
                Some(ms) => Deadline::within(Duration::from_millis(ms)),
                None => Deadline::none(),
            };
            let run = if video {
                let frames: Vec<Vec<RawDetection>> =
                    serde_json::from_str(&raw).context("input must be a list of frames")?;
                pipeline.process_video(&mut store, &source, frames, Metadata::new(), &deadline)?
            } else {
                let detections: Vec<RawDetection> =
                    serde_json::from_str(&raw).context("input must be a list of detections")?;
                pipeline.process_image(&mut store, &source, &detections, Metadata::new(), &deadline)?
            };
            print_run(&run);
        }
        Command::Demo { frames, class_id } => {
            let pipeline = pipeline_from(&cfg)?;
            let detection = RawDetection {
                class_id,
                confidence: 0.9,
                bbox: BoundingBox::new(40.0, 40.0, 120.0, 80.0),
            };
            let mut registry = BackendRegistry::new();
            registry.register(ScriptedBackend::new(vec![vec![detection]; frames as usize]));

            let mut sequence = Vec::with_capacity(frames as usize);
            for _ in 0..frames {
                sequence.push(registry.detect(&[], 640, 480)?);
            }
            let run = pipeline.process_video(
                &mut store,
                "demo:scripted",
                sequence,
                Metadata::new(),
                &Deadline::none(),
            )?;
            print_run(&run);
        }
        Command::Show { id } => {
            let run = store.get_run(id)?;
            print_run(&run);
        }
        Command::List {
            class,
            since,
            until,
            min_confidence,
            limit,
        } => {
            let filter = RunFilter {
                class_name: class,
                since,
                until,
                min_confidence,
                limit: Some(limit),
            };
            let runs = store.list_runs(&filter)?;
            if runs.is_empty() {
                println!("no runs match");
            }
            for run in runs {
                println!(
                    "run {}  {}  violations={}  created_at={}",
                    run.id, run.source_reference, run.total_violations, run.created_at
                );
            }
        }
        Command::Stats { since, until } => {
            let breakdown = store.class_breakdown(&DateRange { since, until })?;
            if breakdown.is_empty() {
                println!("no violations in range");
            }
            for entry in breakdown {
                println!("{:>6}  {}", entry.count, entry.class_name);
            }
        }
    }

    Ok(())
}

fn pipeline_from(cfg: &CitywatchConfig) -> Result<Pipeline> {
    let registry = cfg.class_registry()?;
    if registry.is_empty() {
        return Err(anyhow!("class table is empty; nothing can be detected"));
    }
    Ok(Pipeline::new(registry, cfg.filter_config(), cfg.tracker)?)
}

fn print_run(run: &DetectionRun) {
    println!(
        "run {}  {}  violations={}  conf>={}  iou={}  created_at={}",
        run.id,
        run.source_reference,
        run.total_violations,
        run.confidence_threshold,
        run.iou_threshold,
        run.created_at
    );
    for det in &run.detections {
        println!(
            "  {} ({}) conf={:.2} bbox=[{:.1},{:.1},{:.1},{:.1}] area={:.1}",
            det.class_name,
            det.severity.as_str(),
            det.confidence,
            det.bbox.x,
            det.bbox.y,
            det.bbox.width,
            det.bbox.height,
            det.area
        );
    }
}
