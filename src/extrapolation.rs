//! Constant-velocity extrapolation over a track's recent history.

use std::collections::VecDeque;

use crate::observation::{Observation, Payload, Vec3};
use crate::time::Timestamp;

/// Number of most recent observations the velocity is fitted over.
pub const REGRESSION_WINDOW: usize = 5;

/// Timestamps closer together than this are treated as identical.
const MIN_TIME_SPREAD: f64 = 1e-9;

/// Least-squares line fitted to the recent spatial values of a track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    /// Mean time of the fitted samples
    pub t_mean: f64,
    /// Mean spatial value of the fitted samples
    pub v_mean: Vec3,
    /// Units per second
    pub velocity: Vec3,
}

impl LinearFit {
    /// Fit `value = v_mean + velocity * (t - t_mean)` over `samples`.
    ///
    /// Returns `None` for fewer than two samples or when all samples share one
    /// timestamp, since no velocity can be estimated then.
    pub fn fit<'a, P, I>(samples: I) -> Option<Self>
    where
        P: Payload,
        I: Iterator<Item = &'a Observation<P>> + Clone,
    {
        let n = samples.clone().count();
        if n < 2 {
            return None;
        }
        let nf = n as f64;
        let t_mean = samples.clone().map(|o| o.timestamp.as_secs()).sum::<f64>() / nf;
        let v_mean = samples.clone().fold(Vec3::zeros(), |acc, o| acc + o.spatial()) / nf;

        let mut stt = 0.0;
        let mut stv = Vec3::zeros();
        for o in samples {
            let dt = o.timestamp.as_secs() - t_mean;
            stt += dt * dt;
            stv += (o.spatial() - v_mean) * dt;
        }
        if stt < MIN_TIME_SPREAD * MIN_TIME_SPREAD {
            return None;
        }

        Some(LinearFit {
            t_mean,
            v_mean,
            velocity: stv / stt,
        })
    }

    pub fn evaluate(&self, t: Timestamp) -> Vec3 {
        self.v_mean + self.velocity * (t.as_secs() - self.t_mean)
    }
}

/// Estimates where a track is at an arbitrary query time.
#[derive(Debug, Clone, Copy)]
pub struct Extrapolator {
    /// Observations used for the velocity fit
    pub window: usize,
    /// Longest forward projection past the latest observation, in seconds
    pub max_horizon: f64,
}

impl Default for Extrapolator {
    fn default() -> Self {
        Self {
            window: REGRESSION_WINDOW,
            max_horizon: 1.0,
        }
    }
}

impl Extrapolator {
    pub fn new(max_horizon: f64) -> Self {
        Self {
            window: REGRESSION_WINDOW,
            max_horizon,
        }
    }

    /// Estimated state at `query`. Only the spatial value is projected; all
    /// other fields come from the latest observation.
    ///
    /// Returns `None` only for an empty history.
    pub fn estimate<P: Payload>(
        &self,
        history: &VecDeque<Observation<P>>,
        query: Timestamp,
    ) -> Option<Observation<P>> {
        let latest = history.back()?;
        let skip = history.len().saturating_sub(self.window.max(2));
        let fit = match LinearFit::fit(history.iter().skip(skip)) {
            Some(fit) => fit,
            // zero velocity
            None => return Some(latest.clone()),
        };

        let horizon_end = latest.timestamp + self.max_horizon;
        let t = if query > horizon_end { horizon_end } else { query };
        Some(latest.relocated(fit.evaluate(t), query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::{Hand, Saliency};
    use approx::assert_relative_eq;

    fn hand_at(t: f64, x: f64) -> Observation<Hand> {
        Observation::new(Timestamp::from_secs(t), Hand::at(Vec3::new(x, 0.0, 0.0)))
    }

    #[test]
    fn test_single_observation_is_returned_unchanged() {
        let history: VecDeque<_> = vec![hand_at(1.0, 0.3)].into();
        let ex = Extrapolator::default();
        for q in [0.0, 1.0, 1.5, 100.0] {
            let est = ex.estimate(&history, Timestamp::from_secs(q)).unwrap();
            assert_eq!(est, history[0]);
        }
    }

    #[test]
    fn test_two_points_constant_velocity() {
        let history: VecDeque<_> = vec![hand_at(0.0, 0.0), hand_at(0.1, 0.1)].into();
        let est = Extrapolator::default()
            .estimate(&history, Timestamp::from_secs(0.3))
            .unwrap();
        assert_relative_eq!(est.payload.position.x, 0.3, epsilon = 1e-9);
        assert_relative_eq!(est.timestamp.as_secs(), 0.3);
    }

    #[test]
    fn test_regression_over_noisy_points() {
        // roughly x = 2t
        let history: VecDeque<_> = vec![
            hand_at(0.0, 0.01),
            hand_at(0.1, 0.19),
            hand_at(0.2, 0.41),
            hand_at(0.3, 0.59),
        ]
        .into();
        let fit = LinearFit::fit(history.iter()).unwrap();
        assert_relative_eq!(fit.velocity.x, 1.96, epsilon = 1e-6);
        assert_relative_eq!(fit.evaluate(Timestamp::from_secs(0.15)).x, 0.3, epsilon = 1e-9);
    }

    #[test]
    fn test_window_uses_latest_points_only() {
        // an old stationary segment followed by motion at 1 m/s
        let history: VecDeque<_> = vec![
            hand_at(0.0, 0.0),
            hand_at(0.1, 0.0),
            hand_at(0.2, 0.0),
            hand_at(0.3, 0.1),
            hand_at(0.4, 0.2),
        ]
        .into();
        let ex = Extrapolator {
            window: 3,
            max_horizon: 1.0,
        };
        let est = ex.estimate(&history, Timestamp::from_secs(0.5)).unwrap();
        assert_relative_eq!(est.payload.position.x, 0.3, epsilon = 1e-9);
    }

    #[test]
    fn test_horizon_is_clamped() {
        let history: VecDeque<_> = vec![hand_at(0.0, 0.0), hand_at(1.0, 1.0)].into();
        let ex = Extrapolator::new(0.5);
        let est = ex.estimate(&history, Timestamp::from_secs(10.0)).unwrap();
        assert_relative_eq!(est.payload.position.x, 1.5, epsilon = 1e-9);
    }

    #[test]
    fn test_identical_timestamps_fall_back_to_latest() {
        let history: VecDeque<_> = vec![hand_at(1.0, 0.0), hand_at(1.0, 0.4)].into();
        let est = Extrapolator::default()
            .estimate(&history, Timestamp::from_secs(2.0))
            .unwrap();
        assert_eq!(est, history[1]);
    }

    #[test]
    fn test_saliency_direction_is_not_renormalized() {
        let a = Observation::new(Timestamp::from_secs(0.0), Saliency::towards(Vec3::new(1.0, 0.0, 0.0)));
        let b = Observation::new(Timestamp::from_secs(1.0), Saliency::towards(Vec3::new(0.0, 1.0, 0.0)));
        let history: VecDeque<_> = vec![a, b].into();
        let est = Extrapolator::default()
            .estimate(&history, Timestamp::from_secs(0.5))
            .unwrap();
        assert_relative_eq!(est.payload.direction.x, 0.5, epsilon = 1e-9);
        assert_relative_eq!(est.payload.direction.y, 0.5, epsilon = 1e-9);
        assert!(est.payload.direction.norm() < 1.0);
    }

    #[test]
    fn test_attributes_carried_from_latest() {
        let mut first = hand_at(0.0, 0.0);
        first.payload.gestures = vec!["fist".to_string()];
        let mut second = hand_at(0.1, 0.1);
        second.payload.gestures = vec!["wave".to_string()];
        second.payload.confidence = 0.7;
        let history: VecDeque<_> = vec![first, second].into();
        let est = Extrapolator::default()
            .estimate(&history, Timestamp::from_secs(0.2))
            .unwrap();
        assert_eq!(est.payload.gestures, vec!["wave".to_string()]);
        assert_relative_eq!(est.payload.confidence, 0.7);
    }

    #[test]
    fn test_empty_history() {
        let history: VecDeque<Observation<Hand>> = VecDeque::new();
        assert!(Extrapolator::default()
            .estimate(&history, Timestamp::from_secs(0.0))
            .is_none());
    }
}
