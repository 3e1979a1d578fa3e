//! Threads around a [`FusionPipeline`]: one intake thread per stream and one
//! scheduler thread for the periodic tick.

use crossbeam_channel::{select, tick, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::candidate::FaceResponse;
use crate::error::{FusionError, Result};
use crate::observation::{Face, Hand, RawObservation, Saliency};
use crate::pipeline::FusionPipeline;

/// Incoming streams. Dropping every sender of a stream ends its intake thread.
pub struct Streams {
    pub faces: Receiver<RawObservation<Face>>,
    pub hands: Receiver<RawObservation<Hand>>,
    pub saliencies: Receiver<RawObservation<Saliency>>,
    pub face_responses: Receiver<FaceResponse>,
}

/// Sending halves matching [`Streams`].
#[derive(Clone)]
pub struct StreamSenders {
    pub faces: Sender<RawObservation<Face>>,
    pub hands: Sender<RawObservation<Hand>>,
    pub saliencies: Sender<RawObservation<Saliency>>,
    pub face_responses: Sender<FaceResponse>,
}

/// Unbounded channels for all four streams.
pub fn streams() -> (StreamSenders, Streams) {
    let (faces_tx, faces) = crossbeam_channel::unbounded();
    let (hands_tx, hands) = crossbeam_channel::unbounded();
    let (saliencies_tx, saliencies) = crossbeam_channel::unbounded();
    let (responses_tx, face_responses) = crossbeam_channel::unbounded();
    (
        StreamSenders {
            faces: faces_tx,
            hands: hands_tx,
            saliencies: saliencies_tx,
            face_responses: responses_tx,
        },
        Streams {
            faces,
            hands,
            saliencies,
            face_responses,
        },
    )
}

/// Running intake and scheduler threads.
pub struct FusionRuntime {
    pipeline: Arc<FusionPipeline>,
    shutdown: Option<Sender<()>>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl FusionRuntime {
    pub fn spawn(pipeline: Arc<FusionPipeline>, streams: Streams) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);
        let mut runtime = FusionRuntime {
            pipeline: Arc::clone(&pipeline),
            shutdown: Some(shutdown_tx),
            handles: Vec::new(),
        };

        let p = Arc::clone(&pipeline);
        runtime.spawn_intake("face-intake", streams.faces, shutdown_rx.clone(), move |raw| {
            p.handle_face(raw);
        })?;
        let p = Arc::clone(&pipeline);
        runtime.spawn_intake("hand-intake", streams.hands, shutdown_rx.clone(), move |raw| {
            p.handle_hand(raw);
        })?;
        let p = Arc::clone(&pipeline);
        runtime.spawn_intake("saliency-intake", streams.saliencies, shutdown_rx.clone(), move |raw| {
            p.handle_saliency(raw);
        })?;
        let p = Arc::clone(&pipeline);
        runtime.spawn_intake("face-response-intake", streams.face_responses, shutdown_rx.clone(), move |resp| {
            p.handle_face_response(resp);
        })?;

        let p = Arc::clone(&pipeline);
        let handle = thread::Builder::new()
            .name("fusion-scheduler".to_string())
            .spawn(move || run_scheduler(&p, &shutdown_rx))?;
        runtime.handles.push(("fusion-scheduler", handle));

        info!(threads = runtime.handles.len(), "fusion runtime started");
        Ok(runtime)
    }

    pub fn pipeline(&self) -> &Arc<FusionPipeline> {
        &self.pipeline
    }

    /// Stop all threads and wait for them.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn spawn_intake<T, F>(&mut self, name: &'static str, rx: Receiver<T>, shutdown: Receiver<()>, mut handle: F) -> Result<()>
    where
        T: Send + 'static,
        F: FnMut(T) + Send + 'static,
    {
        let join = thread::Builder::new().name(name.to_string()).spawn(move || loop {
            select! {
                recv(rx) -> msg => match msg {
                    Ok(item) => handle(item),
                    Err(_) => {
                        debug!(stream = name, "stream closed");
                        break;
                    }
                },
                recv(shutdown) -> _ => break,
            }
        })?;
        self.handles.push((name, join));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        // disconnecting the shutdown channel wakes every thread
        if self.shutdown.take().is_none() {
            return Ok(());
        }
        let mut result = Ok(());
        for (name, handle) in self.handles.drain(..) {
            if handle.join().is_err() {
                warn!(thread = name, "thread panicked");
                result = Err(FusionError::ThreadPanicked(name));
            }
        }
        info!("fusion runtime stopped");
        result
    }
}

impl Drop for FusionRuntime {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Longest a slow ticker can delay noticing a new `vision_rate`.
const RATE_CHECK_INTERVAL: Duration = Duration::from_millis(100);

fn tick_period(rate: f64) -> Duration {
    Duration::try_from_secs_f64(1.0 / rate).unwrap_or_else(|_| {
        warn!(rate, "vision rate out of range, ticking once per second");
        Duration::from_secs(1)
    })
}

fn run_scheduler(pipeline: &FusionPipeline, shutdown: &Receiver<()>) {
    let mut rate = pipeline.config().snapshot().vision_rate;
    let mut ticker = tick(tick_period(rate));
    loop {
        select! {
            recv(ticker) -> _ => {
                pipeline.tick(pipeline.now());
            }
            recv(shutdown) -> _ => break,
            default(RATE_CHECK_INTERVAL) => {}
        }

        let current = pipeline.config().snapshot().vision_rate;
        if current != rate {
            info!(from = rate, to = current, "rescheduling tick");
            rate = current;
            ticker = tick(tick_period(rate));
        }
    }
}
