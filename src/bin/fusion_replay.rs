use anyhow::Context;
use clap::Parser;
use nalgebra::{Isometry3, Translation3, UnitQuaternion};
use perception_fusion::{
    collaborators::{ChannelEnrichment, CollectingSink, RigidTransform},
    pipeline::TickReport,
    utils::stable_id,
    CandidateEvent, Clock, Face, FaceRequest, FaceResponse, FusionConfig, FusionPipeline, Hand, ManualClock,
    RawObservation, Saliency, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Replay a recorded observation log through the fusion pipeline.
#[derive(Parser)]
#[command(
    name = "fusion-replay",
    about = "Fuse recorded face, hand and saliency detections into candidate tracks",
    version = "0.1.0"
)]
struct Args {
    /// Observation log, one JSON record per line
    #[arg(short, long, required = true)]
    input: PathBuf,

    /// Where to write the candidate log (JSON)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds between ticks (defaults to 1 / vision_rate)
    #[arg(long)]
    tick: Option<f64>,

    /// Camera mounting as x,y,z,roll,pitch,yaw (meters, radians)
    #[arg(long, num_args = 6, value_delimiter = ',', allow_hyphen_values = true)]
    mount: Option<Vec<f64>>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum InputRecord {
    Face(RawObservation<Face>),
    Hand(RawObservation<Hand>),
    Saliency(RawObservation<Saliency>),
    FaceResponse(FaceResponse),
}

impl InputRecord {
    fn timestamp(&self) -> Option<Timestamp> {
        match self {
            InputRecord::Face(r) => r.timestamp,
            InputRecord::Hand(r) => r.timestamp,
            InputRecord::Saliency(r) => r.timestamp,
            InputRecord::FaceResponse(_) => None,
        }
    }
}

#[derive(Serialize, Debug)]
struct FrameLog {
    tick: TickReport,
    candidates: Vec<CandidateEvent>,
}

#[derive(Serialize, Debug)]
struct ReplayLog {
    session_id: u32,
    camera_id: u32,
    frames: Vec<FrameLog>,
    face_requests: Vec<FaceRequest>,
}

fn read_records(path: &Path) -> anyhow::Result<Vec<InputRecord>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut records = Vec::new();
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let record: InputRecord =
            serde_json::from_str(line).with_context(|| format!("{}:{}", path.display(), line_no + 1))?;
        records.push(record);
    }
    Ok(records)
}

fn mount_transform(mount: &[f64]) -> anyhow::Result<RigidTransform> {
    let [x, y, z, roll, pitch, yaw] = <[f64; 6]>::try_from(mount)
        .map_err(|_| anyhow::anyhow!("--mount takes exactly six values, got {}", mount.len()))?;
    Ok(RigidTransform::new(Isometry3::from_parts(
        Translation3::new(x, y, z),
        UnitQuaternion::from_euler_angles(roll, pitch, yaw),
    )))
}

struct Replay {
    pipeline: FusionPipeline,
    clock: Arc<ManualClock>,
    sink: Arc<CollectingSink>,
    period: f64,
    next_tick: Option<Timestamp>,
    frames: Vec<FrameLog>,
}

impl Replay {
    fn run_tick(&mut self, at: Timestamp) {
        self.clock.set(at);
        let tick = self.pipeline.tick(at);
        let candidates = self.sink.drain();
        debug!(%at, emitted = candidates.len(), "replayed tick");
        self.frames.push(FrameLog { tick, candidates });
    }

    /// Run every tick due before `until`.
    fn catch_up(&mut self, until: Timestamp) {
        let mut next = match self.next_tick {
            Some(next) => next,
            None => until + self.period,
        };
        while next <= until {
            self.run_tick(next);
            next = next + self.period;
        }
        self.next_tick = Some(next);
    }

    fn feed(&mut self, record: InputRecord) {
        if let Some(ts) = record.timestamp() {
            self.catch_up(ts);
            if ts > self.clock.now() {
                self.clock.set(ts);
            }
        }
        match record {
            InputRecord::Face(raw) => {
                self.pipeline.handle_face(raw);
            }
            InputRecord::Hand(raw) => {
                self.pipeline.handle_hand(raw);
            }
            InputRecord::Saliency(raw) => {
                self.pipeline.handle_saliency(raw);
            }
            InputRecord::FaceResponse(resp) => {
                let track_id = resp.track_id;
                if !self.pipeline.handle_face_response(resp) {
                    debug!(track_id, "face response for a track that no longer exists");
                }
            }
        }
    }

    fn finish(&mut self) {
        let last = self.next_tick.unwrap_or_else(|| self.clock.now());
        self.run_tick(last);
    }
}

fn main() -> anyhow::Result<()> {
    // 1. Parse CLI and set up logging
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    // 2. Load config
    let config = match &args.config {
        Some(path) => FusionConfig::from_file(path).with_context(|| format!("loading {}", path.display()))?,
        None => FusionConfig::default(),
    };
    let period = args.tick.unwrap_or_else(|| config.tick_period());
    if !(period.is_finite() && period > 0.0) {
        anyhow::bail!("tick period must be positive, got {period}");
    }
    let session_id = stable_id(&config.session_tag);
    let camera_id = stable_id(&config.camera_name);
    info!(camera = %config.camera_name, session = %config.session_tag, period, "starting replay");

    // 3. Read observations
    let records = read_records(&args.input)?;
    info!(records = records.len(), "loaded observation log");

    // 4. Build the pipeline on a simulated clock
    let start = records
        .iter()
        .find_map(InputRecord::timestamp)
        .unwrap_or_default();
    let clock = Arc::new(ManualClock::new(start));
    let sink = Arc::new(CollectingSink::new());
    let (request_tx, request_rx) = crossbeam_channel::unbounded();
    let mut pipeline = FusionPipeline::new(config, sink.clone())?
        .with_clock(clock.clone())
        .with_enrichment(Arc::new(ChannelEnrichment::new(request_tx)));
    if let Some(mount) = &args.mount {
        pipeline = pipeline.with_transform(Arc::new(mount_transform(mount)?));
    }

    // 5. Replay
    let mut replay = Replay {
        pipeline,
        clock,
        sink,
        period,
        next_tick: None,
        frames: Vec::new(),
    };
    for record in records {
        replay.feed(record);
    }
    replay.finish();

    let face_requests: Vec<FaceRequest> = request_rx.try_iter().collect();
    let total: usize = replay.frames.iter().map(|f| f.candidates.len()).sum();
    info!(
        ticks = replay.frames.len(),
        candidates = total,
        face_requests = face_requests.len(),
        "replay completed"
    );

    // 6. Write the candidate log
    let log = ReplayLog {
        session_id,
        camera_id,
        frames: replay.frames,
        face_requests,
    };
    let output = args.output.unwrap_or_else(|| PathBuf::from("candidates.json"));
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(&output, serde_json::to_string_pretty(&log)?)
        .with_context(|| format!("writing {}", output.display()))?;
    println!("Candidate log saved to {:?}", output);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replay(config: FusionConfig) -> Replay {
        let clock = Arc::new(ManualClock::new(Timestamp::default()));
        let sink = Arc::new(CollectingSink::new());
        let pipeline = FusionPipeline::new(config, sink.clone())
            .unwrap()
            .with_clock(clock.clone());
        Replay {
            pipeline,
            clock,
            sink,
            period: 0.1,
            next_tick: None,
            frames: Vec::new(),
        }
    }

    #[test]
    fn test_read_records_skips_blank_and_comment_lines() {
        let path = std::env::temp_dir().join(format!("fusion_replay_{}.jsonl", std::process::id()));
        fs::write(
            &path,
            "# recorded session\n\n{\"kind\": \"hand\", \"timestamp\": 0.5, \"position\": [0.0, 0.0, 1.0]}\n\
             {\"kind\": \"face_response\", \"track_id\": 10, \"identity\": \"erin\"}\n",
        )
        .unwrap();
        let records = read_records(path.as_path()).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].timestamp(), Some(Timestamp::from_secs(0.5)));
        assert!(matches!(records[1], InputRecord::FaceResponse(_)));
    }

    #[test]
    fn test_stale_face_response_is_skipped() {
        let mut cfg = FusionConfig::default();
        cfg.face.keep_time = 0.1;
        let mut replay = replay(cfg);

        replay.feed(InputRecord::Face(RawObservation::new(
            Some(Timestamp::from_secs(0.0)),
            Face::at(nalgebra::Vector3::new(0.0, 0.0, 1.0)),
        )));
        replay.catch_up(Timestamp::from_secs(1.0));
        assert_eq!(replay.pipeline.track_count(perception_fusion::TrackKind::User), 0);

        replay.feed(InputRecord::FaceResponse(FaceResponse {
            track_id: 0,
            enrichment: Default::default(),
        }));
        assert!(replay.pipeline.enrichment(0).is_none());
        replay.finish();
        assert!(replay.frames.iter().all(|f| f.candidates.is_empty()));
    }
}
