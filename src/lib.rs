pub mod candidate;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod extrapolation;
pub mod observation;
pub mod pipeline;
pub mod runtime;
pub mod time;
pub mod track;
pub mod tracker;
pub mod utils;

// Re-export main types
pub use crate::candidate::{CandidateEvent, FaceRequest, FaceResponse};
pub use crate::config::{ConfigStore, FusionConfig, KindConfig};
pub use crate::error::{FusionError, Result};
pub use crate::observation::{Face, Hand, Observation, RawObservation, Saliency, TrackKind, Vec3};
pub use crate::pipeline::{FusionPipeline, TickReport};
pub use crate::runtime::{streams, FusionRuntime, StreamSenders, Streams};
pub use crate::time::{Clock, ManualClock, SystemClock, Timestamp};
pub use crate::track::{Enrichment, Gender, TrackId};
pub use crate::tracker::Association;
