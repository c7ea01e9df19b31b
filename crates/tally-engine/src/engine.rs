//! The engine: conversation registry, ingestion thread, ticker and worker
//! pool.
//!
//! The registry maps each id to a [`Slot`]. Closing replaces the slot with a
//! tombstone under the registry's write lock, so an event racing the close
//! either lands before it or is rejected; it never recreates the
//! conversation. [`Engine::forget`] drops the tombstone.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, instrument, warn};

use tally_analysis::repness::GroupRepness;
use tally_analysis::{Analysis, analyze};
use tally_core::config::EngineConfig;
use tally_core::error::ComputeError;
use tally_core::event::Envelope;
use tally_core::{ConversationId, GroupId, MatrixSnapshot, ParticipantId};

use crate::conversation::{Begin, Conversation, Health, lock};
use crate::error::EngineError;
use crate::policy::BatchPolicy;
use crate::state::{ConversationState, LatestState};

enum Ingest {
    Event(Envelope),
    /// Acknowledged once every event sent before it has been applied.
    Barrier(Sender<()>),
}

struct Job {
    conversation: Arc<Conversation>,
    snapshot: MatrixSnapshot,
}

/// The analysis pipeline a worker runs.
pub(crate) type Analyzer =
    Arc<dyn Fn(&MatrixSnapshot, &EngineConfig) -> Result<Analysis, ComputeError> + Send + Sync>;

enum Slot {
    Open(Arc<Conversation>),
    Closed,
}

impl Slot {
    fn open(&self) -> Option<&Arc<Conversation>> {
        match self {
            Self::Open(conversation) => Some(conversation),
            Self::Closed => None,
        }
    }
}

struct Shared {
    config: EngineConfig,
    policy: BatchPolicy,
    analyzer: Analyzer,
    conversations: RwLock<BTreeMap<ConversationId, Slot>>,
    shutdown: AtomicBool,
}

impl Shared {
    /// The open conversation, or why there is none.
    fn lookup(&self, id: &ConversationId) -> Result<Arc<Conversation>, EngineError> {
        match self
            .conversations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
        {
            Some(Slot::Open(conversation)) => Ok(Arc::clone(conversation)),
            Some(Slot::Closed) => Err(EngineError::ConversationClosed(id.clone())),
            None => Err(EngineError::UnknownConversation(id.clone())),
        }
    }

    fn conversation(&self, id: &ConversationId) -> Option<Arc<Conversation>> {
        self.lookup(id).ok()
    }

    fn open_or_create(&self, id: &ConversationId) -> Result<Arc<Conversation>, EngineError> {
        match self.lookup(id) {
            Err(EngineError::UnknownConversation(_)) => {}
            found => return found,
        }
        let mut map = self
            .conversations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match map.entry(id.clone()) {
            Entry::Occupied(slot) => slot
                .get()
                .open()
                .cloned()
                .ok_or_else(|| EngineError::ConversationClosed(id.clone())),
            Entry::Vacant(slot) => {
                debug!(conversation = %id, "new conversation");
                let conversation = Arc::new(Conversation::new(id.clone()));
                slot.insert(Slot::Open(Arc::clone(&conversation)));
                Ok(conversation)
            }
        }
    }

    fn apply(&self, envelope: &Envelope) -> Result<bool, EngineError> {
        self.open_or_create(&envelope.conversation)?
            .apply(&envelope.event)
    }

    fn snapshot_conversations(&self) -> Vec<Arc<Conversation>> {
        self.conversations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter_map(Slot::open)
            .cloned()
            .collect()
    }

    /// Run the pipeline and conclude the run. Panics inside the pipeline
    /// become [`ComputeError::Internal`].
    #[instrument(skip_all, fields(conversation = %conversation.id(), version = snapshot.version()))]
    fn compute(
        &self,
        conversation: &Conversation,
        snapshot: MatrixSnapshot,
    ) -> Result<Arc<ConversationState>, EngineError> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            (self.analyzer)(&snapshot, &self.config)
        }))
        .unwrap_or_else(|payload| {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(conversation = %conversation.id(), %message, "pipeline panicked");
            Err(ComputeError::Internal(message))
        });
        conversation.finish(snapshot, outcome)
    }
}

/// Cloneable sender into the engine's bounded ingestion channel.
#[derive(Clone)]
pub struct IngestHandle {
    tx: SyncSender<Ingest>,
}

impl IngestHandle {
    /// Queue an event, blocking while the channel is full.
    ///
    /// # Errors
    ///
    /// [`EngineError::IngestClosed`] after the engine shut down.
    pub fn send(&self, envelope: Envelope) -> Result<(), EngineError> {
        self.tx
            .send(Ingest::Event(envelope))
            .map_err(|_| EngineError::IngestClosed)
    }
}

/// Owns every conversation and the threads that keep them current.
///
/// Dropping the engine stops the ticker, drains the ingestion channel and
/// joins every thread.
pub struct Engine {
    shared: Arc<Shared>,
    ingest: Option<SyncSender<Ingest>>,
    threads: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Start the ingestion thread, the ticker and `scheduler.workers`
    /// workers.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidConfig`] if `config` fails validation.
    /// - [`EngineError::Spawn`] if a thread cannot be started.
    pub fn start(config: EngineConfig) -> Result<Self, EngineError> {
        Self::start_with(config, Arc::new(analyze))
    }

    pub(crate) fn start_with(config: EngineConfig, analyzer: Analyzer) -> Result<Self, EngineError> {
        config
            .validate()
            .map_err(|err| EngineError::InvalidConfig(format!("{err:#}")))?;

        let scheduler = config.scheduler.clone();
        let shared = Arc::new(Shared {
            policy: BatchPolicy::from_config(&scheduler),
            config,
            analyzer,
            conversations: RwLock::new(BTreeMap::new()),
            shutdown: AtomicBool::new(false),
        });

        let (ingest_tx, ingest_rx) = mpsc::sync_channel(scheduler.ingest_capacity);
        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let job_rx = Arc::new(Mutex::new(job_rx));

        let mut engine = Self {
            shared: Arc::clone(&shared),
            ingest: Some(ingest_tx),
            threads: Vec::with_capacity(scheduler.workers + 2),
        };

        let tick = scheduler.tick();
        let ingest_shared = Arc::clone(&shared);
        engine.threads.push(
            thread::Builder::new()
                .name("tally-ingest".to_string())
                .spawn(move || ingest_loop(&ingest_shared, &ingest_rx, tick))?,
        );

        for index in 0..scheduler.workers {
            let worker_shared = Arc::clone(&shared);
            let rx = Arc::clone(&job_rx);
            engine.threads.push(
                thread::Builder::new()
                    .name(format!("tally-worker-{index}"))
                    .spawn(move || worker_loop(&worker_shared, &rx))?,
            );
        }

        let ticker_shared = Arc::clone(&shared);
        engine.threads.push(
            thread::Builder::new()
                .name("tally-ticker".to_string())
                .spawn(move || {
                    while !ticker_shared.shutdown.load(Ordering::Acquire) {
                        dispatch_due(&ticker_shared, &job_tx);
                        thread::sleep(tick);
                    }
                })?,
        );

        info!(
            workers = scheduler.workers,
            debounce_ms = scheduler.debounce_ms,
            min_new_votes = scheduler.min_new_votes,
            "engine started"
        );
        Ok(engine)
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// A sender for producer threads.
    ///
    /// # Errors
    ///
    /// [`EngineError::IngestClosed`] after shutdown began.
    pub fn ingest_handle(&self) -> Result<IngestHandle, EngineError> {
        self.ingest
            .as_ref()
            .map(|tx| IngestHandle { tx: tx.clone() })
            .ok_or(EngineError::IngestClosed)
    }

    /// Queue an event on the ingestion channel.
    ///
    /// # Errors
    ///
    /// [`EngineError::IngestClosed`] after shutdown began.
    pub fn submit(&self, envelope: Envelope) -> Result<(), EngineError> {
        self.ingest_handle()?.send(envelope)
    }

    /// Apply an event on the caller's thread, bypassing the channel.
    ///
    /// Returns whether the conversation's matrix changed.
    ///
    /// # Errors
    ///
    /// [`EngineError::ConversationClosed`] for a closed conversation.
    pub fn apply(&self, envelope: &Envelope) -> Result<bool, EngineError> {
        self.shared.apply(envelope)
    }

    /// Block until every event queued before this call has been applied.
    ///
    /// # Errors
    ///
    /// [`EngineError::IngestClosed`] if the ingestion thread is gone.
    pub fn flush(&self) -> Result<(), EngineError> {
        let (ack_tx, ack_rx) = mpsc::channel();
        let tx = self.ingest.as_ref().ok_or(EngineError::IngestClosed)?;
        tx.send(Ingest::Barrier(ack_tx))
            .map_err(|_| EngineError::IngestClosed)?;
        ack_rx.recv().map_err(|_| EngineError::IngestClosed)
    }

    /// Run the pipeline now on the caller's thread, ignoring the batching
    /// policy.
    ///
    /// # Errors
    ///
    /// - [`EngineError::UnknownConversation`] / [`EngineError::ConversationClosed`].
    /// - [`EngineError::AlreadyRunning`] when a worker holds the
    ///   conversation; a follow-up run is recorded.
    /// - [`EngineError::Compute`] when the pipeline fails; the previous
    ///   revision stays published.
    pub fn compute_now(&self, id: &ConversationId) -> Result<Arc<ConversationState>, EngineError> {
        let conversation = self.shared.lookup(id)?;
        match conversation.try_begin(&self.shared.policy, true, Instant::now()) {
            Begin::Started(snapshot) => self.shared.compute(&conversation, snapshot),
            Begin::Busy => Err(EngineError::AlreadyRunning(id.clone())),
            Begin::Closed => Err(EngineError::ConversationClosed(id.clone())),
            Begin::NotDue | Begin::Clean => {
                Err(EngineError::Compute(ComputeError::Internal("run not started".to_string())))
            }
        }
    }

    /// Remove a conversation. A run in flight completes and is discarded;
    /// later events for the conversation are rejected until it is
    /// [forgotten](Self::forget).
    ///
    /// # Errors
    ///
    /// - [`EngineError::UnknownConversation`] if it never existed.
    /// - [`EngineError::ConversationClosed`] if it is already closed.
    pub fn close(&self, id: &ConversationId) -> Result<(), EngineError> {
        let mut map = self
            .shared
            .conversations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let slot = map
            .get_mut(id)
            .ok_or_else(|| EngineError::UnknownConversation(id.clone()))?;
        match std::mem::replace(slot, Slot::Closed) {
            Slot::Open(conversation) => conversation.close(),
            Slot::Closed => return Err(EngineError::ConversationClosed(id.clone())),
        }
        drop(map);
        info!(conversation = %id, "conversation closed");
        Ok(())
    }

    /// Drop a closed conversation's tombstone so its id can start over.
    /// Returns whether a tombstone was removed; open conversations are left
    /// alone.
    pub fn forget(&self, id: &ConversationId) -> bool {
        let mut map = self
            .shared
            .conversations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if matches!(map.get(id), Some(Slot::Closed)) {
            map.remove(id);
            debug!(conversation = %id, "closed conversation forgotten");
            return true;
        }
        false
    }

    /// Latest published revision; never blocks on a run in flight.
    #[must_use]
    pub fn get_latest_state(&self, id: &ConversationId) -> LatestState {
        self.shared
            .conversation(id)
            .map_or(LatestState::NoData, |c| c.latest())
    }

    /// Participant → group in the latest revision (empty without one).
    #[must_use]
    pub fn group_membership(&self, id: &ConversationId) -> BTreeMap<ParticipantId, GroupId> {
        self.get_latest_state(id)
            .into_option()
            .map(|state| state.clusters.assignments.clone())
            .unwrap_or_default()
    }

    /// Ranked representative statements per group in the latest revision.
    #[must_use]
    pub fn representatives(&self, id: &ConversationId) -> Vec<GroupRepness> {
        self.get_latest_state(id)
            .into_option()
            .map(|state| state.repness.groups.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn health(&self, id: &ConversationId) -> Option<Health> {
        self.shared.conversation(id).map(|c| c.health())
    }

    /// Open conversations in id order.
    #[must_use]
    pub fn conversations(&self) -> Vec<ConversationId> {
        self.shared
            .conversations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, slot)| slot.open().is_some())
            .map(|(id, _)| id.clone())
            .collect()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.ingest.take();
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                warn!("engine thread panicked during shutdown");
            }
        }
        debug!("engine stopped");
    }
}

// ---------------------------------------------------------------------------
// Threads
// ---------------------------------------------------------------------------

fn ingest_loop(shared: &Shared, rx: &Receiver<Ingest>, poll: Duration) {
    loop {
        match rx.recv_timeout(poll) {
            Ok(Ingest::Event(envelope)) => {
                if let Err(err) = shared.apply(&envelope) {
                    warn!(conversation = %envelope.conversation, error = %err, "dropped event");
                }
            }
            Ok(Ingest::Barrier(ack)) => {
                let _ = ack.send(());
            }
            // Outstanding handles keep the channel open; stop once it is idle.
            Err(RecvTimeoutError::Timeout) if shared.shutdown.load(Ordering::Acquire) => break,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("ingestion stopped");
}

fn dispatch_due(shared: &Shared, jobs: &Sender<Job>) {
    let now = Instant::now();
    for conversation in shared.snapshot_conversations() {
        if let Begin::Started(snapshot) = conversation.try_begin(&shared.policy, false, now) {
            debug!(conversation = %conversation.id(), version = snapshot.version(), "dispatching");
            // Workers outlive the ticker, so the queue is open here.
            let _ = jobs.send(Job {
                conversation,
                snapshot,
            });
        }
    }
}

fn worker_loop(shared: &Shared, jobs: &Mutex<Receiver<Job>>) {
    loop {
        let job = lock(jobs).recv();
        let Ok(Job {
            conversation,
            snapshot,
        }) = job
        else {
            break;
        };
        // Failures are logged and recorded on the conversation.
        let _ = shared.compute(&conversation, snapshot);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
