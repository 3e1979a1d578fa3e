//! Raw detections and their normalized, timestamped form.

use nalgebra::{SVector, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::time::{Clock, Timestamp};

pub type Vec3 = Vector3<f64>;

/// The three kinds of tracked entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    User,
    Hand,
    Saliency,
}

impl TrackKind {
    pub const ALL: [TrackKind; 3] = [TrackKind::User, TrackKind::Hand, TrackKind::Saliency];

    pub fn as_str(self) -> &'static str {
        match self {
            TrackKind::User => "user",
            TrackKind::Hand => "hand",
            TrackKind::Saliency => "saliency",
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific body of an observation.
///
/// Only the spatial value takes part in association and extrapolation; every
/// other field is carried along untouched.
pub trait Payload: Clone + fmt::Debug + Send + Sync + 'static {
    const KIND: TrackKind;

    /// Position (faces, hands) or direction (saliency).
    fn spatial(&self) -> Vec3;

    /// Same payload with the spatial value replaced.
    fn with_spatial(&self, spatial: Vec3) -> Self;
}

/// A detection with a resolved timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation<P> {
    pub timestamp: Timestamp,
    #[serde(flatten)]
    pub payload: P,
}

impl<P: Payload> Observation<P> {
    pub fn new(timestamp: Timestamp, payload: P) -> Self {
        Self { timestamp, payload }
    }

    pub fn spatial(&self) -> Vec3 {
        self.payload.spatial()
    }

    /// Copy of this observation moved to `spatial` at `timestamp`.
    pub fn relocated(&self, spatial: Vec3, timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            payload: self.payload.with_spatial(spatial),
        }
    }

    pub fn distance_to(&self, other: &Observation<P>) -> f64 {
        (self.spatial() - other.spatial()).norm()
    }
}

/// A detection as it arrives from a stream, possibly without a timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObservation<P> {
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
    #[serde(flatten)]
    pub payload: P,
}

impl<P: Payload> RawObservation<P> {
    pub fn new(timestamp: Option<Timestamp>, payload: P) -> Self {
        Self { timestamp, payload }
    }

    /// Resolve the timestamp, stamping with the clock when it is missing.
    pub fn normalize(self, clock: &dyn Clock) -> Observation<P> {
        let timestamp = self.timestamp.unwrap_or_else(|| clock.now());
        Observation {
            timestamp,
            payload: self.payload,
        }
    }
}

impl<P: Payload> From<Observation<P>> for RawObservation<P> {
    fn from(obs: Observation<P>) -> Self {
        Self {
            timestamp: Some(obs.timestamp),
            payload: obs.payload,
        }
    }
}

/// A detected face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Face {
    /// Position in the camera frame (meters)
    pub position: Vec3,
    /// Bounding box in (tlwh) format, normalized image coordinates
    #[serde(default = "zero_tlwh")]
    pub tlwh: SVector<f32, 4>,
    /// Detector-assigned face id
    #[serde(default)]
    pub face_id: u32,
    /// Reference to the face thumbnail, handed to the enrichment service
    #[serde(default)]
    pub thumb: Option<String>,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub smile: f32,
    #[serde(default)]
    pub frown: f32,
    #[serde(default)]
    pub expressions: Vec<String>,
}

fn zero_tlwh() -> SVector<f32, 4> {
    SVector::<f32, 4>::zeros()
}

impl Face {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            tlwh: zero_tlwh(),
            face_id: 0,
            thumb: None,
            confidence: 1.0,
            smile: 0.0,
            frown: 0.0,
            expressions: Vec::new(),
        }
    }
}

impl Payload for Face {
    const KIND: TrackKind = TrackKind::User;

    fn spatial(&self) -> Vec3 {
        self.position
    }

    fn with_spatial(&self, spatial: Vec3) -> Self {
        Self {
            position: spatial,
            ..self.clone()
        }
    }
}

/// A detected hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hand {
    pub position: Vec3,
    #[serde(default)]
    pub gestures: Vec<String>,
    #[serde(default)]
    pub confidence: f32,
}

impl Hand {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            gestures: Vec::new(),
            confidence: 1.0,
        }
    }
}

impl Payload for Hand {
    const KIND: TrackKind = TrackKind::Hand;

    fn spatial(&self) -> Vec3 {
        self.position
    }

    fn with_spatial(&self, spatial: Vec3) -> Self {
        Self {
            position: spatial,
            ..self.clone()
        }
    }
}

/// A salient direction, as seen from the camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Saliency {
    pub direction: Vec3,
    #[serde(default)]
    pub confidence: f32,
}

impl Saliency {
    pub fn towards(direction: Vec3) -> Self {
        Self {
            direction,
            confidence: 1.0,
        }
    }
}

impl Payload for Saliency {
    const KIND: TrackKind = TrackKind::Saliency;

    fn spatial(&self) -> Vec3 {
        self.direction
    }

    fn with_spatial(&self, spatial: Vec3) -> Self {
        Self {
            direction: spatial,
            confidence: self.confidence,
        }
    }
}

pub type FaceObservation = Observation<Face>;
pub type HandObservation = Observation<Hand>;
pub type SaliencyObservation = Observation<Saliency>;
