use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::extrapolation::Extrapolator;
use crate::observation::{Observation, Payload};
use crate::time::Timestamp;
use crate::track::{Track, TrackId};

/// Distance between consecutive ids.
pub const ID_STRIDE: TrackId = 10;

/// Issues track ids shared by all kinds, so ids never collide across pools.
///
/// Lives inside the pipeline's locked state; it has no lock of its own.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: TrackId,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self) -> TrackId {
        let id = self.next;
        self.next += ID_STRIDE;
        id
    }
}

/// Association parameters for one call.
#[derive(Debug, Clone, Copy)]
pub struct AssociationParams {
    pub fuse_distance: f64,
    pub use_extrapolation: bool,
    pub extrapolator: Extrapolator,
}

/// Result of feeding an observation into a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Association {
    /// Appended to an existing track
    Fused(TrackId),
    /// Started a new track
    Created(TrackId),
}

impl Association {
    pub fn track_id(self) -> TrackId {
        match self {
            Association::Fused(id) | Association::Created(id) => id,
        }
    }
}

/// Nearest track to `observation`, if it is strictly closer than the fuse
/// distance. The first track with the minimum distance wins ties; tracks at a
/// non-finite distance are ignored.
pub fn associate<P: Payload, A: Default>(
    pool: &TrackPool<P, A>,
    observation: &Observation<P>,
    params: &AssociationParams,
) -> Option<TrackId> {
    let mut closest: Option<(TrackId, f64)> = None;
    for track in pool.iter() {
        let predicted = match track.estimate(&params.extrapolator, observation.timestamp, params.use_extrapolation) {
            Some(p) => p,
            None => continue,
        };
        let d = predicted.distance_to(observation);
        // NaN or infinite distances never match
        if !d.is_finite() {
            continue;
        }
        match closest {
            Some((_, best)) if d >= best => {}
            _ => closest = Some((track.id(), d)),
        }
    }
    match closest {
        Some((id, d)) if d < params.fuse_distance => Some(id),
        _ => None,
    }
}

/// All live tracks of one kind, keyed by id.
#[derive(Debug, Clone)]
pub struct TrackPool<P, A = ()> {
    tracks: BTreeMap<TrackId, Track<P, A>>,
}

impl<P, A> Default for TrackPool<P, A> {
    fn default() -> Self {
        Self {
            tracks: BTreeMap::new(),
        }
    }
}

impl<P: Payload, A: Default> TrackPool<P, A> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn get(&self, id: TrackId) -> Option<&Track<P, A>> {
        self.tracks.get(&id)
    }

    pub fn get_mut(&mut self, id: TrackId) -> Option<&mut Track<P, A>> {
        self.tracks.get_mut(&id)
    }

    pub fn contains(&self, id: TrackId) -> bool {
        self.tracks.contains_key(&id)
    }

    /// Tracks in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Track<P, A>> {
        self.tracks.values()
    }

    pub fn ids(&self) -> Vec<TrackId> {
        self.tracks.keys().copied().collect()
    }

    /// Fuse `observation` into the nearest track, or start a new one with an
    /// id from `ids`.
    pub fn ingest(
        &mut self,
        observation: Observation<P>,
        params: &AssociationParams,
        ids: &mut IdAllocator,
    ) -> Association {
        if let Some(id) = associate(self, &observation, params) {
            if let Some(track) = self.tracks.get_mut(&id) {
                track.append(observation);
                debug!(kind = %P::KIND, track_id = id, len = track.len(), "fused observation");
                return Association::Fused(id);
            }
        }
        let id = ids.next();
        self.tracks.insert(id, Track::new(id, observation));
        info!(kind = %P::KIND, track_id = id, "created track");
        Association::Created(id)
    }

    /// Prune every track to `cutoff` and drop tracks left empty. Returns the
    /// removed ids.
    pub fn prune_before(&mut self, cutoff: Timestamp) -> Vec<TrackId> {
        let mut removed = Vec::new();
        self.tracks.retain(|&id, track| {
            track.prune_before(cutoff);
            if track.is_empty() {
                removed.push(id);
                false
            } else {
                true
            }
        });
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::{Face, Hand, Vec3};
    use crate::track::Enrichment;
    use approx::assert_relative_eq;

    fn face_at(t: f64, x: f64) -> Observation<Face> {
        Observation::new(Timestamp::from_secs(t), Face::at(Vec3::new(x, 0.0, 0.0)))
    }

    fn params(fuse_distance: f64, use_extrapolation: bool) -> AssociationParams {
        AssociationParams {
            fuse_distance,
            use_extrapolation,
            extrapolator: Extrapolator::default(),
        }
    }

    #[test]
    fn test_allocator_stride() {
        let mut ids = IdAllocator::new();
        assert_eq!(ids.next(), 0);
        assert_eq!(ids.next(), 10);
        assert_eq!(ids.next(), 20);
    }

    #[test]
    fn test_first_observation_creates_track() {
        let mut pool: TrackPool<Face, Enrichment> = TrackPool::new();
        let mut ids = IdAllocator::new();
        let outcome = pool.ingest(face_at(0.0, 0.0), &params(0.5, true), &mut ids);
        assert_eq!(outcome, Association::Created(0));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_fuse_example_scenario() {
        let mut pool: TrackPool<Face, Enrichment> = TrackPool::new();
        let mut ids = IdAllocator::new();
        let p = params(0.5, true);

        let a = pool.ingest(face_at(0.0, 0.0), &p, &mut ids);
        let x = a.track_id();
        assert!(matches!(a, Association::Created(_)));

        let b = pool.ingest(face_at(0.1, 0.2), &p, &mut ids);
        assert_eq!(b, Association::Fused(x));

        let c = pool.ingest(face_at(0.2, 2.0), &p, &mut ids);
        assert_eq!(c, Association::Created(x + 10));
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.get(x).unwrap().len(), 2);
    }

    #[test]
    fn test_threshold_is_strict() {
        let mut pool: TrackPool<Hand> = TrackPool::new();
        let mut ids = IdAllocator::new();
        pool.ingest(
            Observation::new(Timestamp::from_secs(0.0), Hand::at(Vec3::zeros())),
            &params(0.5, false),
            &mut ids,
        );

        let at_limit = Observation::new(Timestamp::from_secs(0.1), Hand::at(Vec3::new(0.5, 0.0, 0.0)));
        assert_eq!(associate(&pool, &at_limit, &params(0.5, false)), None);

        let inside = Observation::new(Timestamp::from_secs(0.1), Hand::at(Vec3::new(0.5 - 1e-6, 0.0, 0.0)));
        assert_eq!(associate(&pool, &inside, &params(0.5, false)), Some(0));
    }

    #[test]
    fn test_association_is_deterministic() {
        let mut pool: TrackPool<Face, Enrichment> = TrackPool::new();
        let mut ids = IdAllocator::new();
        let p = params(0.5, true);
        pool.ingest(face_at(0.0, 0.0), &p, &mut ids);
        pool.ingest(face_at(0.0, 1.0), &p, &mut ids);

        let probe = face_at(0.1, 0.6);
        let first = associate(&pool, &probe, &p);
        let second = associate(&pool, &probe, &p);
        assert_eq!(first, second);
        assert_eq!(first, Some(10));
    }

    #[test]
    fn test_equidistant_tracks_pick_lowest_id() {
        let mut pool: TrackPool<Face, Enrichment> = TrackPool::new();
        let mut ids = IdAllocator::new();
        let p = params(0.5, false);
        pool.ingest(face_at(0.0, -0.3), &p, &mut ids);
        pool.ingest(face_at(0.0, 0.3), &p, &mut ids);
        assert_eq!(associate(&pool, &face_at(0.1, 0.0), &p), Some(0));
    }

    #[test]
    fn test_extrapolation_follows_motion() {
        let mut pool: TrackPool<Face, Enrichment> = TrackPool::new();
        let mut ids = IdAllocator::new();
        let fuse = params(0.25, true);
        // moving at 2 m/s
        pool.ingest(face_at(0.0, 0.0), &fuse, &mut ids);
        pool.ingest(face_at(0.1, 0.2), &fuse, &mut ids);
        assert_eq!(pool.len(), 1);

        // 0.3 m from the latest sample but on the predicted path
        let next = face_at(0.25, 0.5);
        assert_eq!(associate(&pool, &next, &fuse), Some(0));
        assert_eq!(associate(&pool, &next, &params(0.25, false)), None);
    }

    #[test]
    fn test_non_finite_track_does_not_block_fusion() {
        let mut pool: TrackPool<Hand> = TrackPool::new();
        let mut ids = IdAllocator::new();
        let p = params(0.5, true);
        let hand = |x: f64| Observation::new(Timestamp::from_secs(0.0), Hand::at(Vec3::new(x, 0.0, 0.0)));

        assert_eq!(pool.ingest(hand(0.0), &p, &mut ids), Association::Created(0));
        assert_eq!(pool.ingest(hand(f64::NAN), &p, &mut ids), Association::Created(10));

        for _ in 0..3 {
            assert_eq!(pool.ingest(hand(0.01), &p, &mut ids), Association::Fused(0));
        }
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.get(0).unwrap().len(), 4);
    }

    #[test]
    fn test_pool_prune_removes_empty_tracks() {
        let mut pool: TrackPool<Face, Enrichment> = TrackPool::new();
        let mut ids = IdAllocator::new();
        let p = params(0.5, false);
        pool.ingest(face_at(0.0, 0.0), &p, &mut ids);
        pool.ingest(face_at(1.0, 0.1), &p, &mut ids);
        pool.ingest(face_at(0.5, 5.0), &p, &mut ids);
        assert_eq!(pool.len(), 2);

        let removed = pool.prune_before(Timestamp::from_secs(0.8));
        assert_eq!(removed, vec![10]);
        assert_eq!(pool.ids(), vec![0]);
        let kept = pool.get(0).unwrap();
        assert_eq!(kept.len(), 1);
        assert_relative_eq!(kept.latest().unwrap().timestamp.as_secs(), 1.0);
    }

    #[test]
    fn test_ids_shared_across_pools() {
        let mut ids = IdAllocator::new();
        let mut faces: TrackPool<Face, Enrichment> = TrackPool::new();
        let mut hands: TrackPool<Hand> = TrackPool::new();
        let p = params(0.5, false);
        let f = faces.ingest(face_at(0.0, 0.0), &p, &mut ids).track_id();
        let h = hands
            .ingest(
                Observation::new(Timestamp::from_secs(0.0), Hand::at(Vec3::zeros())),
                &p,
                &mut ids,
            )
            .track_id();
        assert_ne!(f, h);
        assert_eq!(h, f + ID_STRIDE);
    }
}
