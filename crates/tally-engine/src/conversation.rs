//! One conversation: its vote matrix, scheduler state and latest revision.
//!
//! # State machine
//!
//! ```text
//! idle ──event──▶ dirty ──trigger──▶ computing ──done──▶ idle
//!                   ▲                    │
//!                   │                  event
//!                   │                    ▼
//!                   └──────done──── computing_pending
//! ```
//!
//! A run that ends in `computing_pending` leaves a follow-up: the
//! conversation goes back to `dirty` and is due at the next tick, without
//! waiting on the batching policy again. At most one follow-up is held.
//!
//! A failed run goes back to `dirty` without publishing. It is retried only
//! once new events arrive, since the same inputs would fail again.
//!
//! # Locking
//!
//! Locks are always taken in the order matrix → control. Applying an event
//! marks the conversation dirty while still holding the matrix lock, and a
//! run takes its snapshot under both locks, so every change lands either in
//! the snapshot or in the pending count of the next run.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use tally_analysis::Analysis;
use tally_core::error::ComputeError;
use tally_core::event::Event;
use tally_core::{ConversationId, MatrixSnapshot, VoteMatrix};

use crate::error::EngineError;
use crate::policy::BatchPolicy;
use crate::state::{ConversationState, LatestState};

/// Scheduler phase of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Dirty,
    Computing,
    /// Computing, with changes that arrived after the snapshot was taken.
    ComputingPending,
}

impl Phase {
    #[must_use]
    pub const fn is_computing(self) -> bool {
        matches!(self, Self::Computing | Self::ComputingPending)
    }
}

/// Point-in-time view of a conversation's scheduling health.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Health {
    pub conversation: ConversationId,
    pub phase: Phase,
    /// Latest published revision, if any.
    pub revision: Option<u64>,
    /// Changes not yet covered by a run.
    pub pending_changes: u64,
    /// Why the most recent run failed, cleared by the next success.
    pub last_failure: Option<ComputeError>,
}

#[derive(Debug, Default)]
struct Control {
    phase: Phase,
    pending_changes: u64,
    dirty_since: Option<Instant>,
    last_trigger: Option<Instant>,
    /// Changes arrived during the last run; the next tick starts a run.
    follow_up: bool,
    revision: u64,
    closed: bool,
    last_failure: Option<ComputeError>,
}

/// Outcome of asking a conversation to start a run.
#[derive(Debug)]
pub enum Begin {
    Started(MatrixSnapshot),
    /// Another run is in flight.
    Busy,
    /// Dirty, but the batching policy says wait.
    NotDue,
    /// Nothing changed since the last run.
    Clean,
    Closed,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
pub struct Conversation {
    id: ConversationId,
    matrix: Mutex<VoteMatrix>,
    control: Mutex<Control>,
    latest: RwLock<Option<Arc<ConversationState>>>,
}

impl Conversation {
    #[must_use]
    pub fn new(id: ConversationId) -> Self {
        Self {
            id,
            matrix: Mutex::new(VoteMatrix::new()),
            control: Mutex::new(Control::default()),
            latest: RwLock::new(None),
        }
    }

    #[must_use]
    pub const fn id(&self) -> &ConversationId {
        &self.id
    }

    /// Fold one event into the matrix.
    ///
    /// Returns whether the matrix changed.
    ///
    /// # Errors
    ///
    /// [`EngineError::ConversationClosed`] once the conversation is closed.
    pub fn apply(&self, event: &Event) -> Result<bool, EngineError> {
        let mut matrix = lock(&self.matrix);
        let mut control = lock(&self.control);
        if control.closed {
            return Err(EngineError::ConversationClosed(self.id.clone()));
        }

        let changed = match *event {
            Event::Vote(vote) => matrix.apply_vote(&vote).changed_matrix(),
            Event::Moderation { statement, state } => matrix.set_moderation(statement, state),
        };
        if changed {
            control.pending_changes += 1;
            match control.phase {
                Phase::Idle => {
                    control.phase = Phase::Dirty;
                    control.dirty_since = Some(Instant::now());
                }
                Phase::Computing => control.phase = Phase::ComputingPending,
                Phase::Dirty | Phase::ComputingPending => {}
            }
        }
        Ok(changed)
    }

    /// Try to start a run.
    ///
    /// With `force`, the batching policy is skipped and a clean
    /// conversation is recomputed anyway; a busy conversation records a
    /// follow-up run.
    pub fn try_begin(&self, policy: &BatchPolicy, force: bool, now: Instant) -> Begin {
        let matrix = lock(&self.matrix);
        let mut control = lock(&self.control);

        if control.closed {
            return Begin::Closed;
        }
        match control.phase {
            Phase::Computing | Phase::ComputingPending => {
                if force {
                    control.phase = Phase::ComputingPending;
                }
                return Begin::Busy;
            }
            Phase::Idle if !force => return Begin::Clean,
            Phase::Dirty if !force && !control.follow_up => {
                let since = control.last_trigger.or(control.dirty_since).unwrap_or(now);
                let elapsed = now.saturating_duration_since(since);
                if !policy.should_trigger(control.pending_changes, elapsed) {
                    return Begin::NotDue;
                }
            }
            Phase::Idle | Phase::Dirty => {}
        }

        control.phase = Phase::Computing;
        control.pending_changes = 0;
        control.follow_up = false;
        control.last_trigger = Some(now);
        Begin::Started(matrix.snapshot())
    }

    /// Conclude a run started by [`Self::try_begin`].
    ///
    /// On success the new revision is published, unless the conversation
    /// was closed meanwhile. On failure the previous revision stays.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Compute`] when the pipeline failed.
    /// - [`EngineError::ConversationClosed`] when the result was discarded.
    pub fn finish(
        &self,
        snapshot: MatrixSnapshot,
        outcome: Result<Analysis, ComputeError>,
    ) -> Result<Arc<ConversationState>, EngineError> {
        let mut control = lock(&self.control);
        control.follow_up = control.phase == Phase::ComputingPending;
        control.phase = if control.follow_up || outcome.is_err() {
            Phase::Dirty
        } else {
            Phase::Idle
        };

        if control.closed {
            warn!(conversation = %self.id, "conversation closed during computation; discarding result");
            return Err(EngineError::ConversationClosed(self.id.clone()));
        }

        let analysis = match outcome {
            Ok(analysis) => analysis,
            Err(err) => {
                warn!(
                    conversation = %self.id,
                    code = %err.code(),
                    error = %err,
                    "computation failed; keeping previous revision"
                );
                control.last_failure = Some(err.clone());
                return Err(err.into());
            }
        };

        control.revision += 1;
        control.last_failure = None;
        let state = Arc::new(ConversationState::new(
            self.id.clone(),
            control.revision,
            snapshot,
            analysis,
        ));
        *self
            .latest
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&state));

        info!(
            conversation = %self.id,
            revision = state.revision,
            groups = state.group_count(),
            status = %state.status,
            "published revision"
        );
        if control.phase == Phase::Dirty {
            debug!(conversation = %self.id, pending = control.pending_changes, "follow-up pending");
        }
        Ok(state)
    }

    /// Latest published revision. Never waits on a run.
    #[must_use]
    pub fn latest(&self) -> LatestState {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .into()
    }

    pub fn close(&self) {
        lock(&self.control).closed = true;
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        lock(&self.control).closed
    }

    #[must_use]
    pub fn health(&self) -> Health {
        let control = lock(&self.control);
        Health {
            conversation: self.id.clone(),
            phase: control.phase,
            revision: (control.revision > 0).then_some(control.revision),
            pending_changes: control.pending_changes,
            last_failure: control.last_failure.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
