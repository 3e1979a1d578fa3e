//! Narrow contracts to the services around the fusion core, plus the small
//! implementations the replay tool and tests use.

use crossbeam_channel::Sender;
use nalgebra::{Isometry3, Point3};
use parking_lot::Mutex;
use tracing::warn;

use crate::candidate::{CandidateEvent, FaceRequest};
use crate::observation::Vec3;
use crate::time::Timestamp;

/// Camera-frame to world-frame mapping. `None` means no transform is
/// available for that time, and the candidate is skipped for the tick.
pub trait CoordinateTransform: Send + Sync {
    fn transform_point(&self, local: &Vec3, ts: Timestamp) -> Option<Vec3>;
    fn transform_direction(&self, local: &Vec3, ts: Timestamp) -> Option<Vec3>;
}

/// Receives confident candidates.
pub trait CandidateSink: Send + Sync {
    fn emit(&self, event: CandidateEvent);
}

/// Face analysis round trip, request side.
pub trait EnrichmentService: Send + Sync {
    fn request(&self, request: FaceRequest);
}

/// Camera frame is the world frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityTransform;

impl CoordinateTransform for IdentityTransform {
    fn transform_point(&self, local: &Vec3, _ts: Timestamp) -> Option<Vec3> {
        Some(*local)
    }

    fn transform_direction(&self, local: &Vec3, _ts: Timestamp) -> Option<Vec3> {
        Some(*local)
    }
}

/// Fixed camera mounting. Points get the full isometry, directions only the
/// rotation.
#[derive(Debug, Clone, Copy)]
pub struct RigidTransform {
    pub camera_to_world: Isometry3<f64>,
}

impl RigidTransform {
    pub fn new(camera_to_world: Isometry3<f64>) -> Self {
        Self { camera_to_world }
    }
}

impl CoordinateTransform for RigidTransform {
    fn transform_point(&self, local: &Vec3, _ts: Timestamp) -> Option<Vec3> {
        Some(self.camera_to_world.transform_point(&Point3::from(*local)).coords)
    }

    fn transform_direction(&self, local: &Vec3, _ts: Timestamp) -> Option<Vec3> {
        Some(self.camera_to_world.transform_vector(local))
    }
}

/// Forwards candidates into a channel. A closed receiver drops the event.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<CandidateEvent>,
}

impl ChannelSink {
    pub fn new(tx: Sender<CandidateEvent>) -> Self {
        Self { tx }
    }
}

impl CandidateSink for ChannelSink {
    fn emit(&self, event: CandidateEvent) {
        if self.tx.send(event).is_err() {
            warn!("candidate receiver gone, dropping event");
        }
    }
}

/// Keeps every emitted candidate in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<CandidateEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take everything collected so far.
    pub fn drain(&self) -> Vec<CandidateEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl CandidateSink for CollectingSink {
    fn emit(&self, event: CandidateEvent) {
        self.events.lock().push(event);
    }
}

/// Forwards face requests into a channel.
#[derive(Debug, Clone)]
pub struct ChannelEnrichment {
    tx: Sender<FaceRequest>,
}

impl ChannelEnrichment {
    pub fn new(tx: Sender<FaceRequest>) -> Self {
        Self { tx }
    }
}

impl EnrichmentService for ChannelEnrichment {
    fn request(&self, request: FaceRequest) {
        if self.tx.send(request).is_err() {
            warn!("face analysis receiver gone, dropping request");
        }
    }
}

/// Drops every request.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEnrichment;

impl EnrichmentService for NullEnrichment {
    fn request(&self, _request: FaceRequest) {}
}
