use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{FusionError, Result};
use crate::observation::TrackKind;

/// Tunables for one kind of track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KindConfig {
    /// Maximum distance (meters, or direction units for saliency) to fuse
    pub fuse_distance: f64,
    /// Minimum track confidence before a candidate is emitted
    pub min_confidence: f64,
    /// Seconds an observation stays in its track
    pub keep_time: f64,
    /// Observation count at which confidence saturates
    pub full_points: usize,
    /// Use the extrapolated state instead of the latest observation
    pub extrapolate: bool,
}

impl Default for KindConfig {
    fn default() -> Self {
        Self {
            fuse_distance: 0.5,
            min_confidence: 0.4,
            keep_time: 1.0,
            full_points: 5,
            extrapolate: true,
        }
    }
}

impl KindConfig {
    fn validate(&self, kind: TrackKind) -> Result<()> {
        if !(self.fuse_distance.is_finite() && self.fuse_distance > 0.0) {
            return Err(FusionError::InvalidConfig(format!(
                "{kind}: fuse_distance must be positive, got {}",
                self.fuse_distance
            )));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(FusionError::InvalidConfig(format!(
                "{kind}: min_confidence must lie in [0, 1], got {}",
                self.min_confidence
            )));
        }
        if !(self.keep_time.is_finite() && self.keep_time >= 0.0) {
            return Err(FusionError::InvalidConfig(format!(
                "{kind}: keep_time must be non-negative, got {}",
                self.keep_time
            )));
        }
        if self.full_points == 0 {
            return Err(FusionError::InvalidConfig(format!(
                "{kind}: full_points must be at least 1"
            )));
        }
        Ok(())
    }
}

/// Full pipeline configuration, loaded from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub camera_name: String,
    pub session_tag: String,
    /// Tick frequency in Hz
    pub vision_rate: f64,
    /// Longest forward projection past the latest observation, in seconds
    pub max_extrapolation: f64,
    pub face: KindConfig,
    pub hand: KindConfig,
    pub saliency: KindConfig,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            camera_name: "camera".to_string(),
            session_tag: "default".to_string(),
            vision_rate: 30.0,
            max_extrapolation: 1.0,
            face: KindConfig::default(),
            hand: KindConfig::default(),
            saliency: KindConfig {
                fuse_distance: 0.3,
                ..KindConfig::default()
            },
        }
    }
}

impl FusionConfig {
    /// Load from a JSON file and validate.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        let cfg: FusionConfig = serde_json::from_str(&data)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.vision_rate.is_finite() && self.vision_rate > 0.0) {
            return Err(FusionError::InvalidConfig(format!(
                "vision_rate must be positive, got {}",
                self.vision_rate
            )));
        }
        if !(self.max_extrapolation.is_finite() && self.max_extrapolation >= 0.0) {
            return Err(FusionError::InvalidConfig(format!(
                "max_extrapolation must be non-negative, got {}",
                self.max_extrapolation
            )));
        }
        for kind in TrackKind::ALL {
            self.kind(kind).validate(kind)?;
        }
        Ok(())
    }

    pub fn kind(&self, kind: TrackKind) -> &KindConfig {
        match kind {
            TrackKind::User => &self.face,
            TrackKind::Hand => &self.hand,
            TrackKind::Saliency => &self.saliency,
        }
    }

    /// Seconds between two ticks.
    pub fn tick_period(&self) -> f64 {
        1.0 / self.vision_rate
    }
}

/// Holds the active configuration as an immutable snapshot.
///
/// Readers clone the `Arc` and keep using that snapshot for the whole tick, so
/// a concurrent `apply` is never observed halfway through.
#[derive(Debug)]
pub struct ConfigStore {
    current: RwLock<Arc<FusionConfig>>,
}

impl ConfigStore {
    pub fn new(config: FusionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            current: RwLock::new(Arc::new(config)),
        })
    }

    pub fn snapshot(&self) -> Arc<FusionConfig> {
        Arc::clone(&self.current.read())
    }

    /// Validate and swap in a new configuration. On error the previous
    /// snapshot stays active.
    pub fn apply(&self, config: FusionConfig) -> Result<()> {
        if let Err(e) = config.validate() {
            warn!(error = %e, "rejected configuration update");
            return Err(e);
        }
        let mut current = self.current.write();
        if current.session_tag != config.session_tag {
            info!(from = %current.session_tag, to = %config.session_tag, "session tag changed");
        }
        if current.vision_rate != config.vision_rate {
            info!(from = current.vision_rate, to = config.vision_rate, "vision rate changed");
        }
        *current = Arc::new(config);
        Ok(())
    }
}
