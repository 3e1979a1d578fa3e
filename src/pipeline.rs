//! The fusion pipeline: three track pools behind one lock, fed by the
//! observation handlers and drained by the periodic tick.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, trace};

use crate::candidate::{CandidateHeader, CandidateKind, FaceRequest, FaceResponse};
use crate::collaborators::{CandidateSink, CoordinateTransform, EnrichmentService, IdentityTransform, NullEnrichment};
use crate::config::{ConfigStore, FusionConfig};
use crate::error::Result;
use crate::extrapolation::Extrapolator;
use crate::observation::{Face, Hand, Observation, RawObservation, Saliency, TrackKind};
use crate::time::{Clock, SystemClock, Timestamp};
use crate::track::{Enrichment, TrackId};
use crate::tracker::{Association, AssociationParams, IdAllocator, TrackPool};
use crate::utils::stable_id;

/// Everything guarded by the pipeline lock.
#[derive(Debug, Default)]
pub struct Pools {
    ids: IdAllocator,
    users: TrackPool<Face, Enrichment>,
    hands: TrackPool<Hand>,
    saliencies: TrackPool<Saliency>,
}

/// Picks the pool of a kind out of [`Pools`].
pub trait PooledKind: CandidateKind {
    fn pool(pools: &Pools) -> &TrackPool<Self, Self::Attributes>;
    fn pool_and_ids(pools: &mut Pools) -> (&mut TrackPool<Self, Self::Attributes>, &mut IdAllocator);
}

impl PooledKind for Face {
    fn pool(pools: &Pools) -> &TrackPool<Self, Enrichment> {
        &pools.users
    }

    fn pool_and_ids(pools: &mut Pools) -> (&mut TrackPool<Self, Enrichment>, &mut IdAllocator) {
        (&mut pools.users, &mut pools.ids)
    }
}

impl PooledKind for Hand {
    fn pool(pools: &Pools) -> &TrackPool<Self> {
        &pools.hands
    }

    fn pool_and_ids(pools: &mut Pools) -> (&mut TrackPool<Self>, &mut IdAllocator) {
        (&mut pools.hands, &mut pools.ids)
    }
}

impl PooledKind for Saliency {
    fn pool(pools: &Pools) -> &TrackPool<Self> {
        &pools.saliencies
    }

    fn pool_and_ids(pools: &mut Pools) -> (&mut TrackPool<Self>, &mut IdAllocator) {
        (&mut pools.saliencies, &mut pools.ids)
    }
}

/// What one tick did for one kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindReport {
    /// Candidates handed to the sink
    pub emitted: usize,
    /// Confident tracks skipped because no transform was available
    pub skipped: usize,
    /// Tracks removed by pruning
    pub removed: usize,
    /// Tracks left after pruning
    pub live: usize,
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TickReport {
    pub timestamp: Timestamp,
    pub user: KindReport,
    pub hand: KindReport,
    pub saliency: KindReport,
}

impl TickReport {
    pub fn kind(&self, kind: TrackKind) -> &KindReport {
        match kind {
            TrackKind::User => &self.user,
            TrackKind::Hand => &self.hand,
            TrackKind::Saliency => &self.saliency,
        }
    }

    pub fn emitted(&self) -> usize {
        self.user.emitted + self.hand.emitted + self.saliency.emitted
    }
}

/// A confident track, captured under the lock and emitted after it.
struct Pending<P: CandidateKind> {
    header: CandidateHeader,
    estimate: Observation<P>,
    attributes: P::Attributes,
}

/// Fuses face, hand and saliency detections into candidate tracks.
pub struct FusionPipeline {
    pools: Mutex<Pools>,
    config: ConfigStore,
    clock: Arc<dyn Clock>,
    transform: Arc<dyn CoordinateTransform>,
    enrichment: Arc<dyn EnrichmentService>,
    sink: Arc<dyn CandidateSink>,
}

impl FusionPipeline {
    /// Pipeline on the system clock, with an identity transform and no face
    /// analysis. Use the `with_*` methods to plug in real collaborators.
    pub fn new(config: FusionConfig, sink: Arc<dyn CandidateSink>) -> Result<Self> {
        Ok(FusionPipeline {
            pools: Mutex::new(Pools::default()),
            config: ConfigStore::new(config)?,
            clock: Arc::new(SystemClock),
            transform: Arc::new(IdentityTransform),
            enrichment: Arc::new(NullEnrichment),
            sink,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_transform(mut self, transform: Arc<dyn CoordinateTransform>) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_enrichment(mut self, enrichment: Arc<dyn EnrichmentService>) -> Self {
        self.enrichment = enrichment;
        self
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// A new face. Creating a user track sends one face analysis request,
    /// after the lock is released.
    pub fn handle_face(&self, raw: RawObservation<Face>) -> Association {
        let obs = raw.normalize(self.clock.as_ref());
        let face_id = obs.payload.face_id;
        let thumb = obs.payload.thumb.clone();
        let timestamp = obs.timestamp;

        let cfg = self.config.snapshot();
        let outcome = self.ingest(obs, &cfg);

        if let Association::Created(track_id) = outcome {
            self.enrichment.request(FaceRequest {
                session_id: stable_id(&cfg.session_tag),
                camera_id: stable_id(&cfg.camera_name),
                track_id,
                face_id,
                timestamp,
                thumb,
            });
        }
        outcome
    }

    pub fn handle_hand(&self, raw: RawObservation<Hand>) -> Association {
        let obs = raw.normalize(self.clock.as_ref());
        self.ingest(obs, &self.config.snapshot())
    }

    pub fn handle_saliency(&self, raw: RawObservation<Saliency>) -> Association {
        let obs = raw.normalize(self.clock.as_ref());
        self.ingest(obs, &self.config.snapshot())
    }

    /// Merge a face analysis result. Returns `false` when the track is gone,
    /// which is an expected race and not an error.
    pub fn handle_face_response(&self, response: FaceResponse) -> bool {
        let mut pools = self.pools.lock();
        match pools.users.get_mut(response.track_id) {
            Some(track) => {
                track.merge_enrichment(response.enrichment);
                debug!(track_id = response.track_id, "merged face analysis");
                true
            }
            None => {
                debug!(track_id = response.track_id, "face analysis for unknown track, discarded");
                false
            }
        }
    }

    /// One scheduler tick at `now`: emit every confident track, then prune.
    ///
    /// Snapshots and pruning happen in one critical section; transforms and
    /// emission run after the lock is released.
    pub fn tick(&self, now: Timestamp) -> TickReport {
        let cfg = self.config.snapshot();
        let session_id = stable_id(&cfg.session_tag);
        let camera_id = stable_id(&cfg.camera_name);
        let extrapolator = Extrapolator::new(cfg.max_extrapolation);

        let (users, hands, saliencies, mut report) = {
            let mut pools = self.pools.lock();
            let (users, user) = Self::collect::<Face>(&mut pools, &cfg, &extrapolator, now, session_id, camera_id);
            let (hands, hand) = Self::collect::<Hand>(&mut pools, &cfg, &extrapolator, now, session_id, camera_id);
            let (saliencies, saliency) =
                Self::collect::<Saliency>(&mut pools, &cfg, &extrapolator, now, session_id, camera_id);
            let report = TickReport {
                timestamp: now,
                user,
                hand,
                saliency,
            };
            (users, hands, saliencies, report)
        };

        self.emit(users, now, &mut report.user);
        self.emit(hands, now, &mut report.hand);
        self.emit(saliencies, now, &mut report.saliency);

        trace!(
            %now,
            users = report.user.live,
            hands = report.hand.live,
            saliencies = report.saliency.live,
            emitted = report.emitted(),
            "tick"
        );
        report
    }

    /// Number of live tracks of a kind.
    pub fn track_count(&self, kind: TrackKind) -> usize {
        let pools = self.pools.lock();
        match kind {
            TrackKind::User => pools.users.len(),
            TrackKind::Hand => pools.hands.len(),
            TrackKind::Saliency => pools.saliencies.len(),
        }
    }

    pub fn track_ids(&self, kind: TrackKind) -> Vec<TrackId> {
        let pools = self.pools.lock();
        match kind {
            TrackKind::User => pools.users.ids(),
            TrackKind::Hand => pools.hands.ids(),
            TrackKind::Saliency => pools.saliencies.ids(),
        }
    }

    /// Copy of a user track's merged face analysis.
    pub fn enrichment(&self, track_id: TrackId) -> Option<Enrichment> {
        self.pools.lock().users.get(track_id).map(|t| t.attributes.clone())
    }

    /// Copy of a track's estimated state at `at`, using the current
    /// configuration.
    pub fn estimate<P: PooledKind>(&self, track_id: TrackId, at: Timestamp) -> Option<Observation<P>> {
        let cfg = self.config.snapshot();
        let extrapolator = Extrapolator::new(cfg.max_extrapolation);
        let pools = self.pools.lock();
        P::pool(&pools)
            .get(track_id)?
            .estimate(&extrapolator, at, cfg.kind(P::KIND).extrapolate)
    }

    fn ingest<P: PooledKind>(&self, obs: Observation<P>, cfg: &FusionConfig) -> Association {
        let kind_cfg = cfg.kind(P::KIND);
        let params = AssociationParams {
            fuse_distance: kind_cfg.fuse_distance,
            use_extrapolation: kind_cfg.extrapolate,
            extrapolator: Extrapolator::new(cfg.max_extrapolation),
        };
        let mut pools = self.pools.lock();
        let (pool, ids) = P::pool_and_ids(&mut pools);
        pool.ingest(obs, &params, ids)
    }

    fn collect<P: PooledKind>(
        pools: &mut Pools,
        cfg: &FusionConfig,
        extrapolator: &Extrapolator,
        now: Timestamp,
        session_id: u32,
        camera_id: u32,
    ) -> (Vec<Pending<P>>, KindReport) {
        let kind_cfg = cfg.kind(P::KIND);
        let (pool, _) = P::pool_and_ids(pools);

        let mut pending = Vec::new();
        for track in pool.iter() {
            let confidence = track.confidence(kind_cfg.full_points);
            if confidence < kind_cfg.min_confidence {
                continue;
            }
            if let Some(estimate) = track.estimate(extrapolator, now, kind_cfg.extrapolate) {
                pending.push(Pending {
                    header: CandidateHeader {
                        session_id,
                        camera_id,
                        track_id: track.id(),
                        timestamp: now,
                        confidence,
                    },
                    estimate,
                    attributes: track.attributes.clone(),
                });
            }
        }

        let removed = pool.prune_before(now - kind_cfg.keep_time);
        if !removed.is_empty() {
            info!(kind = %P::KIND, ?removed, "tracks expired");
        }

        let report = KindReport {
            removed: removed.len(),
            live: pool.len(),
            ..KindReport::default()
        };
        (pending, report)
    }

    fn emit<P: PooledKind>(&self, pending: Vec<Pending<P>>, now: Timestamp, report: &mut KindReport) {
        for item in pending {
            match P::to_world(&item.estimate, self.transform.as_ref(), now) {
                Some(world) => {
                    self.sink.emit(P::candidate(item.header, world, item.estimate, item.attributes));
                    report.emitted += 1;
                }
                None => {
                    debug!(kind = %P::KIND, track_id = item.header.track_id, "no transform, candidate skipped");
                    report.skipped += 1;
                }
            }
        }
    }
}
