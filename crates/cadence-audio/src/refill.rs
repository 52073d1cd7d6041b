//! Background refill of managed stream assets.
//!
//! A [`StreamRegistry`] owns every registered asset behind one coarse lock.
//! The refill worker thread is started with the first registration and
//! stopped, before any asset is dropped, when the last [`ManagedStream`]
//! handle goes away. Voices built with the registry's [`RefillNotifier`]
//! wake the worker as soon as they finish a buffer; a fixed-interval pass
//! over all streams covers everything else.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cadence_core::{AssetId, Error, Result, StreamingConfig};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, trace};

use crate::asset::SoundAsset;
use crate::voice::{RefillNotifier, VoiceEvent};

struct RegistryShared {
    /// Locked after `worker` when both are needed.
    streams: Mutex<HashMap<AssetId, SoundAsset>>,
    worker: Mutex<Option<RefillWorker>>,
    events_tx: Sender<VoiceEvent>,
    events_rx: Receiver<VoiceEvent>,
    config: StreamingConfig,
}

/// Registry of assets kept fed by one background worker.
#[derive(Clone)]
pub struct StreamRegistry {
    shared: Arc<RegistryShared>,
}

impl StreamRegistry {
    pub fn new(config: StreamingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: StreamingConfig) -> Self {
        let (events_tx, events_rx) = bounded(config.event_queue_depth);
        Self {
            shared: Arc::new(RegistryShared {
                streams: Mutex::new(HashMap::new()),
                worker: Mutex::new(None),
                events_tx,
                events_rx,
                config,
            }),
        }
    }

    /// Hand `asset` to the registry, starting the worker if it is the first.
    pub fn register(&self, asset: SoundAsset) -> Result<ManagedStream> {
        let id = asset.id();
        let mut worker = self.shared.worker.lock();
        self.shared.streams.lock().insert(id, asset);

        if worker.is_none() {
            match RefillWorker::spawn(Arc::clone(&self.shared)) {
                Ok(w) => *worker = Some(w),
                Err(e) => {
                    self.shared.streams.lock().remove(&id);
                    return Err(e);
                }
            }
        }

        debug!("Registered {} for background refill", id);
        Ok(ManagedStream {
            id,
            shared: Arc::clone(&self.shared),
        })
    }

    /// A notifier for voices whose buffers the worker should refill on completion.
    pub fn notifier(&self) -> RefillNotifier {
        RefillNotifier::new(self.shared.events_tx.clone())
    }

    pub fn worker_running(&self) -> bool {
        self.shared.worker.lock().is_some()
    }

    /// Number of registered assets.
    pub fn len(&self) -> usize {
        self.shared.streams.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.shared.config
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::build(StreamingConfig::default())
    }
}

/// Handle to an asset owned by a [`StreamRegistry`]. Dropping it removes the asset.
pub struct ManagedStream {
    id: AssetId,
    shared: Arc<RegistryShared>,
}

impl ManagedStream {
    pub const fn id(&self) -> AssetId {
        self.id
    }

    /// Run `f` on the asset while holding the registry lock.
    ///
    /// The worker is excluded for the duration, so seeks and binds never
    /// interleave with a refill. `f` must not register or drop streams of
    /// the same registry: the lock is not reentrant and that would deadlock.
    pub fn with<R>(&self, f: impl FnOnce(&mut SoundAsset) -> R) -> Result<R> {
        let mut streams = self.shared.streams.lock();
        let asset = streams
            .get_mut(&self.id)
            .ok_or_else(|| Error::Internal(format!("{} missing from stream registry", self.id)))?;
        Ok(f(asset))
    }
}

impl Drop for ManagedStream {
    fn drop(&mut self) {
        let mut worker = self.shared.worker.lock();
        let (asset, last) = {
            let mut streams = self.shared.streams.lock();
            let asset = streams.remove(&self.id);
            (asset, streams.is_empty())
        };

        if last {
            if let Some(w) = worker.take() {
                w.stop();
            }
        }
        drop(worker);
        drop(asset);
        trace!("Deregistered {}", self.id);
    }
}

struct RefillWorker {
    shutdown_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl RefillWorker {
    fn spawn(shared: Arc<RegistryShared>) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);

        let handle = std::thread::Builder::new()
            .name("cadence-refill".to_string())
            .spawn(move || run(&shared, &shutdown_rx))
            .map_err(|e| Error::Internal(format!("Failed to spawn refill thread: {e}")))?;

        info!("Refill worker started");
        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Signal the thread and wait for it to finish its current pass.
    fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Disconnecting the channel is the stop signal.
        drop(self.shutdown_tx.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Refill worker panicked");
            } else {
                info!("Refill worker stopped");
            }
        }
    }
}

impl Drop for RefillWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(shared: &RegistryShared, shutdown_rx: &Receiver<()>) {
    let interval = shared.config.refill_interval();
    let mut last_pass = Instant::now();

    loop {
        let timeout = interval.saturating_sub(last_pass.elapsed());
        select! {
            recv(shutdown_rx) -> _ => {
                debug!("Refill worker shutting down");
                break;
            }
            recv(shared.events_rx) -> event => {
                if let Ok(event) = event {
                    refill_voice(shared, event);
                }
            }
            default(timeout) => {}
        }

        if last_pass.elapsed() >= interval {
            let queued = refill_pass(shared);
            if queued > 0 {
                trace!("Refill pass queued {} buffer(s)", queued);
            }
            last_pass = Instant::now();
        }
    }
}

fn refill_voice(shared: &RegistryShared, event: VoiceEvent) {
    let mut streams = shared.streams.lock();
    let Some(asset) = streams.values_mut().find(|a| a.is_bound(event.voice)) else {
        trace!("No stream bound to voice {}, dropping {:?}", event.voice, event.kind);
        return;
    };
    let mut queued = 0;
    while asset.refill_check(event.voice) {
        queued += 1;
    }
    trace!("{:?} from voice {} queued {} buffer(s)", event.kind, event.voice, queued);
}

fn refill_pass(shared: &RegistryShared) -> usize {
    shared
        .streams
        .lock()
        .values_mut()
        .map(SoundAsset::refill_all)
        .sum()
}
