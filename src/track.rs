use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::extrapolation::Extrapolator;
use crate::observation::{Face, Hand, Observation, Payload, Saliency};
use crate::time::Timestamp;

pub type TrackId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    #[default]
    Unknown,
    Male,
    Female,
}

/// Face analysis results merged into a user track after the fact.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Enrichment {
    pub age: f32,
    pub age_confidence: f32,
    pub gender: Gender,
    pub gender_confidence: f32,
    pub identity: String,
    pub identity_confidence: f32,
}

/// A fused, identity-stable sequence of observations of one entity.
#[derive(Debug, Clone)]
pub struct Track<P, A = ()> {
    id: TrackId,
    /// Observations, oldest first
    observations: VecDeque<Observation<P>>,
    /// Attributes that do not come from the observations themselves
    pub attributes: A,
}

pub type UserTrack = Track<Face, Enrichment>;
pub type HandTrack = Track<Hand>;
pub type SaliencyTrack = Track<Saliency>;

impl<P: Payload, A: Default> Track<P, A> {
    /// Start a track from its first observation.
    pub fn new(id: TrackId, first: Observation<P>) -> Self {
        let mut observations = VecDeque::new();
        observations.push_back(first);
        Track {
            id,
            observations,
            attributes: A::default(),
        }
    }
}

impl<P: Payload, A> Track<P, A> {
    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn observations(&self) -> &VecDeque<Observation<P>> {
        &self.observations
    }

    /// Append an observation. Late arrivals are appended as well.
    pub fn append(&mut self, observation: Observation<P>) {
        self.observations.push_back(observation);
    }

    /// Most recently appended observation.
    pub fn latest(&self) -> Option<&Observation<P>> {
        self.observations.back()
    }

    pub fn extrapolate(&self, extrapolator: &Extrapolator, query: Timestamp) -> Option<Observation<P>> {
        extrapolator.estimate(&self.observations, query)
    }

    /// State at `query`: extrapolated, or simply the latest observation when
    /// extrapolation is switched off.
    pub fn estimate(
        &self,
        extrapolator: &Extrapolator,
        query: Timestamp,
        use_extrapolation: bool,
    ) -> Option<Observation<P>> {
        if use_extrapolation {
            self.extrapolate(extrapolator, query)
        } else {
            self.latest().cloned()
        }
    }

    /// `min(1, count / full_points)`.
    pub fn confidence(&self, full_points: usize) -> f64 {
        if full_points == 0 {
            return 1.0;
        }
        (self.observations.len() as f64 / full_points as f64).min(1.0)
    }

    /// Drop every observation older than `cutoff`. Returns how many were
    /// dropped; an empty track must be removed by its owner.
    pub fn prune_before(&mut self, cutoff: Timestamp) -> usize {
        let before = self.observations.len();
        self.observations.retain(|o| o.timestamp >= cutoff);
        before - self.observations.len()
    }
}

impl UserTrack {
    /// Overwrite all enrichment fields. Last writer wins.
    pub fn merge_enrichment(&mut self, enrichment: Enrichment) {
        self.attributes = enrichment;
    }
}
