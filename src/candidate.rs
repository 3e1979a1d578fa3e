//! Events that leave the pipeline: candidates, enrichment requests, and the
//! enrichment responses that come back.

use serde::{Deserialize, Serialize};

use crate::collaborators::CoordinateTransform;
use crate::observation::{Face, Hand, Observation, Payload, Saliency, TrackKind, Vec3};
use crate::time::Timestamp;
use crate::track::{Enrichment, TrackId};

/// Fields shared by every candidate event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateHeader {
    pub session_id: u32,
    pub camera_id: u32,
    pub track_id: TrackId,
    /// Tick time the candidate was estimated for
    pub timestamp: Timestamp,
    /// Track confidence, `min(1, observations / full_points)`
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateUser {
    #[serde(flatten)]
    pub header: CandidateHeader,
    /// World-frame position
    pub position: Vec3,
    pub detection_confidence: f32,
    pub smile: f32,
    pub frown: f32,
    pub expressions: Vec<String>,
    #[serde(flatten)]
    pub enrichment: Enrichment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateHand {
    #[serde(flatten)]
    pub header: CandidateHeader,
    pub position: Vec3,
    pub detection_confidence: f32,
    pub gestures: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSaliency {
    #[serde(flatten)]
    pub header: CandidateHeader,
    /// World-frame direction
    pub direction: Vec3,
    pub detection_confidence: f32,
}

/// One confident track at one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CandidateEvent {
    User(CandidateUser),
    Hand(CandidateHand),
    Saliency(CandidateSaliency),
}

impl CandidateEvent {
    pub fn header(&self) -> &CandidateHeader {
        match self {
            CandidateEvent::User(c) => &c.header,
            CandidateEvent::Hand(c) => &c.header,
            CandidateEvent::Saliency(c) => &c.header,
        }
    }

    pub fn kind(&self) -> TrackKind {
        match self {
            CandidateEvent::User(_) => TrackKind::User,
            CandidateEvent::Hand(_) => TrackKind::Hand,
            CandidateEvent::Saliency(_) => TrackKind::Saliency,
        }
    }

    pub fn track_id(&self) -> TrackId {
        self.header().track_id
    }
}

/// Request for face analysis, sent once when a user track is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceRequest {
    pub session_id: u32,
    pub camera_id: u32,
    pub track_id: TrackId,
    pub face_id: u32,
    pub timestamp: Timestamp,
    pub thumb: Option<String>,
}

/// Face analysis result, keyed by the track it was requested for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceResponse {
    pub track_id: TrackId,
    #[serde(flatten)]
    pub enrichment: Enrichment,
}

/// Per-kind glue between a track's estimated state and its emitted event.
pub trait CandidateKind: Payload {
    /// Merged attributes the track carries besides its observations.
    type Attributes: Clone + Default + Send + Sync + std::fmt::Debug + 'static;

    /// Map the estimated spatial value into the world frame.
    fn to_world(estimate: &Observation<Self>, transform: &dyn CoordinateTransform, ts: Timestamp) -> Option<Vec3>;

    fn candidate(
        header: CandidateHeader,
        world: Vec3,
        estimate: Observation<Self>,
        attributes: Self::Attributes,
    ) -> CandidateEvent;
}

impl CandidateKind for Face {
    type Attributes = Enrichment;

    fn to_world(estimate: &Observation<Self>, transform: &dyn CoordinateTransform, ts: Timestamp) -> Option<Vec3> {
        transform.transform_point(&estimate.payload.position, ts)
    }

    fn candidate(header: CandidateHeader, world: Vec3, estimate: Observation<Self>, attributes: Enrichment) -> CandidateEvent {
        let face = estimate.payload;
        CandidateEvent::User(CandidateUser {
            header,
            position: world,
            detection_confidence: face.confidence,
            smile: face.smile,
            frown: face.frown,
            expressions: face.expressions,
            enrichment: attributes,
        })
    }
}

impl CandidateKind for Hand {
    type Attributes = ();

    fn to_world(estimate: &Observation<Self>, transform: &dyn CoordinateTransform, ts: Timestamp) -> Option<Vec3> {
        transform.transform_point(&estimate.payload.position, ts)
    }

    fn candidate(header: CandidateHeader, world: Vec3, estimate: Observation<Self>, _attributes: ()) -> CandidateEvent {
        let hand = estimate.payload;
        CandidateEvent::Hand(CandidateHand {
            header,
            position: world,
            detection_confidence: hand.confidence,
            gestures: hand.gestures,
        })
    }
}

impl CandidateKind for Saliency {
    type Attributes = ();

    fn to_world(estimate: &Observation<Self>, transform: &dyn CoordinateTransform, ts: Timestamp) -> Option<Vec3> {
        transform.transform_direction(&estimate.payload.direction, ts)
    }

    fn candidate(header: CandidateHeader, world: Vec3, estimate: Observation<Self>, _attributes: ()) -> CandidateEvent {
        CandidateEvent::Saliency(CandidateSaliency {
            header,
            direction: world,
            detection_confidence: estimate.payload.confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::Gender;

    fn header(track_id: TrackId) -> CandidateHeader {
        CandidateHeader {
            session_id: 1,
            camera_id: 2,
            track_id,
            timestamp: Timestamp::from_secs(5.0),
            confidence: 0.8,
        }
    }

    #[test]
    fn test_user_candidate_json_is_flat_and_tagged() {
        let event = CandidateEvent::User(CandidateUser {
            header: header(30),
            position: Vec3::new(1.0, 2.0, 3.0),
            detection_confidence: 0.9,
            smile: 0.5,
            frown: 0.0,
            expressions: vec![],
            enrichment: Enrichment {
                gender: Gender::Female,
                ..Enrichment::default()
            },
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], "user");
        assert_eq!(value["track_id"], 30);
        assert_eq!(value["gender"], "female");
        assert_eq!(value["position"][2], 3.0);
        assert_eq!(event.kind(), TrackKind::User);
    }

    #[test]
    fn test_face_response_from_json() {
        let resp: FaceResponse =
            serde_json::from_str(r#"{"track_id": 40, "age": 25.0, "age_confidence": 0.6, "identity": "bob"}"#)
                .unwrap();
        assert_eq!(resp.track_id, 40);
        assert_eq!(resp.enrichment.identity, "bob");
        assert_eq!(resp.enrichment.gender, Gender::Unknown);
    }
}
