//! Sparse participant × statement vote matrix with copy-on-write snapshots.
//!
//! # Overview
//!
//! [`VoteMatrix`] folds the vote feed into at most one retained value per
//! `(participant, statement)` cell. Rows and columns are stored as
//! `Arc`-shared maps; [`VoteMatrix::snapshot`] clones only the outer `Arc`s,
//! so taking a snapshot is O(1) and later writes copy just the outer index
//! plus the single row/column they touch.
//!
//! # Cell resolution
//!
//! A cell keeps the vote with the greatest `(timestamp, arrival)` pair. A
//! stale vote (older timestamp than the retained one) is ignored, so the
//! feed may deliver votes for the same cell in any order.
//!
//! # Moderation
//!
//! Only active statements have live columns. Votes on a `pending` or
//! `rejected` statement are parked; moderating a statement out of `active`
//! parks its column, and moderating it back restores the parked cells.
//! Statements never moderated are treated as active.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::ids::{ParticipantId, StatementId};
use crate::model::statement::ModerationState;
use crate::model::vote::{Cell, Vote, VoteValue};

type Row = BTreeMap<StatementId, Cell>;
type Column = BTreeSet<ParticipantId>;

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// What [`VoteMatrix::apply_vote`] did with a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    /// A new cell was created.
    Inserted,
    /// An existing cell was replaced by a later vote.
    Overwritten,
    /// The retained cell is newer; the vote was dropped.
    Stale,
    /// The statement is not active; the vote was parked.
    Parked,
}

impl VoteOutcome {
    /// Returns `true` if the live matrix changed.
    #[must_use]
    pub const fn changed_matrix(self) -> bool {
        matches!(self, Self::Inserted | Self::Overwritten)
    }
}

// ---------------------------------------------------------------------------
// VoteMatrix
// ---------------------------------------------------------------------------

/// Mutable vote matrix for one conversation.
#[derive(Debug, Clone, Default)]
pub struct VoteMatrix {
    rows: Arc<BTreeMap<ParticipantId, Arc<Row>>>,
    columns: Arc<BTreeMap<StatementId, Arc<Column>>>,
    parked: BTreeMap<StatementId, BTreeMap<ParticipantId, Cell>>,
    moderation: BTreeMap<StatementId, ModerationState>,
    next_seq: u64,
    version: u64,
    last_vote_timestamp: Option<u64>,
}

impl VoteMatrix {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one vote into the matrix.
    pub fn apply_vote(&mut self, vote: &Vote) -> VoteOutcome {
        self.next_seq += 1;
        let cell = Cell {
            value: vote.value,
            timestamp: vote.timestamp,
            seq: self.next_seq,
        };
        self.last_vote_timestamp = Some(
            self.last_vote_timestamp
                .map_or(vote.timestamp, |ts| ts.max(vote.timestamp)),
        );

        if !self.moderation_state(vote.statement).is_active() {
            let column = self.parked.entry(vote.statement).or_default();
            match column.get(&vote.participant) {
                Some(current) if !cell.supersedes(current) => {}
                _ => {
                    column.insert(vote.participant, cell);
                }
            }
            return VoteOutcome::Parked;
        }

        let outcome = Self::write_cell(
            &mut self.rows,
            &mut self.columns,
            vote.participant,
            vote.statement,
            cell,
        );
        if outcome.changed_matrix() {
            self.version += 1;
        }
        outcome
    }

    /// Drop a statement's column from the live matrix.
    ///
    /// The removed cells are parked so that a later re-activation restores
    /// them. Participants left with no retained votes leave the row set.
    /// Returns the number of cells removed.
    pub fn remove_statement(&mut self, statement: StatementId) -> usize {
        let Some(column) = Arc::make_mut(&mut self.columns).remove(&statement) else {
            return 0;
        };

        let rows = Arc::make_mut(&mut self.rows);
        let parked = self.parked.entry(statement).or_default();
        let mut removed = 0;

        for participant in column.iter() {
            let Some(row) = rows.get_mut(participant) else {
                continue;
            };
            if let Some(cell) = Arc::make_mut(row).remove(&statement) {
                removed += 1;
                match parked.get(participant) {
                    Some(current) if !cell.supersedes(current) => {}
                    _ => {
                        parked.insert(*participant, cell);
                    }
                }
            }
            if row.is_empty() {
                rows.remove(participant);
            }
        }

        if removed > 0 {
            self.version += 1;
        }
        removed
    }

    /// Apply a moderation event. Returns `true` if the live matrix changed.
    pub fn set_moderation(&mut self, statement: StatementId, state: ModerationState) -> bool {
        let previous = self.moderation.insert(statement, state).unwrap_or_default();
        match (previous.is_active(), state.is_active()) {
            (true, false) => self.remove_statement(statement) > 0,
            (false, true) => self.restore_statement(statement) > 0,
            _ => false,
        }
    }

    fn restore_statement(&mut self, statement: StatementId) -> usize {
        let Some(parked) = self.parked.remove(&statement) else {
            return 0;
        };
        let mut restored = 0;
        for (participant, cell) in parked {
            let outcome =
                Self::write_cell(&mut self.rows, &mut self.columns, participant, statement, cell);
            if outcome.changed_matrix() {
                restored += 1;
            }
        }
        if restored > 0 {
            self.version += 1;
        }
        restored
    }

    fn write_cell(
        rows: &mut Arc<BTreeMap<ParticipantId, Arc<Row>>>,
        columns: &mut Arc<BTreeMap<StatementId, Arc<Column>>>,
        participant: ParticipantId,
        statement: StatementId,
        cell: Cell,
    ) -> VoteOutcome {
        // Check before touching the Arcs so a stale vote never forces a copy.
        if let Some(current) = rows.get(&participant).and_then(|row| row.get(&statement)) {
            if !cell.supersedes(current) {
                return VoteOutcome::Stale;
            }
        }

        let row = Arc::make_mut(rows).entry(participant).or_default();
        let previous = Arc::make_mut(row).insert(statement, cell);

        if previous.is_some() {
            VoteOutcome::Overwritten
        } else {
            let column = Arc::make_mut(columns).entry(statement).or_default();
            Arc::make_mut(column).insert(participant);
            VoteOutcome::Inserted
        }
    }

    /// Take an immutable snapshot that later writes cannot affect.
    #[must_use]
    pub fn snapshot(&self) -> MatrixSnapshot {
        MatrixSnapshot {
            rows: Arc::clone(&self.rows),
            columns: Arc::clone(&self.columns),
            version: self.version,
            last_vote_timestamp: self.last_vote_timestamp,
        }
    }

    /// Moderation state of a statement (active when never moderated).
    #[must_use]
    pub fn moderation_state(&self, statement: StatementId) -> ModerationState {
        self.moderation.get(&statement).copied().unwrap_or_default()
    }

    /// Number of participants with at least one retained vote.
    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.rows.len()
    }

    /// Number of live (active, voted-on) statements.
    #[must_use]
    pub fn statement_count(&self) -> usize {
        self.columns.len()
    }

    /// Monotonic counter of changes to the live matrix.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Retained value of one cell.
    #[must_use]
    pub fn get(&self, participant: ParticipantId, statement: StatementId) -> Option<VoteValue> {
        self.rows
            .get(&participant)
            .and_then(|row| row.get(&statement))
            .map(|cell| cell.value)
    }

    /// Number of cells waiting on a non-active statement.
    #[must_use]
    pub fn parked_count(&self) -> usize {
        self.parked.values().map(BTreeMap::len).sum()
    }
}

// ---------------------------------------------------------------------------
// MatrixSnapshot
// ---------------------------------------------------------------------------

/// Immutable, structurally shared view of a [`VoteMatrix`].
///
/// Cloning a snapshot is cheap; every clone observes the same cells.
#[derive(Debug, Clone, Default)]
pub struct MatrixSnapshot {
    rows: Arc<BTreeMap<ParticipantId, Arc<Row>>>,
    columns: Arc<BTreeMap<StatementId, Arc<Column>>>,
    version: u64,
    last_vote_timestamp: Option<u64>,
}

/// Agree/disagree/pass counts for one statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct VoteCounts {
    pub agree: u32,
    pub disagree: u32,
    pub pass: u32,
}

impl VoteCounts {
    pub fn record(&mut self, value: VoteValue) {
        match value {
            VoteValue::Agree => self.agree += 1,
            VoteValue::Disagree => self.disagree += 1,
            VoteValue::Pass => self.pass += 1,
        }
    }

    /// Every vote seen, passes included.
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.agree + self.disagree + self.pass
    }
}

impl MatrixSnapshot {
    /// Participants in ascending id order.
    pub fn participants(&self) -> impl Iterator<Item = ParticipantId> + '_ {
        self.rows.keys().copied()
    }

    /// Statements (columns) in ascending id order.
    pub fn statements(&self) -> impl Iterator<Item = StatementId> + '_ {
        self.columns.keys().copied()
    }

    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn statement_count(&self) -> usize {
        self.columns.len()
    }

    /// Total number of retained cells.
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.rows.values().map(|row| row.len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Retained value of one cell.
    #[must_use]
    pub fn get(&self, participant: ParticipantId, statement: StatementId) -> Option<VoteValue> {
        self.rows
            .get(&participant)
            .and_then(|row| row.get(&statement))
            .map(|cell| cell.value)
    }

    /// A participant's votes in ascending statement order.
    pub fn row(
        &self,
        participant: ParticipantId,
    ) -> impl Iterator<Item = (StatementId, VoteValue)> + '_ {
        self.rows
            .get(&participant)
            .into_iter()
            .flat_map(|row| row.iter().map(|(s, cell)| (*s, cell.value)))
    }

    /// Participants who voted on a statement, ascending.
    pub fn column(&self, statement: StatementId) -> impl Iterator<Item = ParticipantId> + '_ {
        self.columns
            .get(&statement)
            .into_iter()
            .flat_map(|column| column.iter().copied())
    }

    /// Number of retained votes for a participant.
    #[must_use]
    pub fn votes_cast(&self, participant: ParticipantId) -> usize {
        self.rows.get(&participant).map_or(0, |row| row.len())
    }

    /// Vote counts for one statement over every participant.
    #[must_use]
    pub fn counts(&self, statement: StatementId) -> VoteCounts {
        let mut counts = VoteCounts::default();
        for participant in self.column(statement) {
            if let Some(value) = self.get(participant, statement) {
                counts.record(value);
            }
        }
        counts
    }

    /// Matrix version this snapshot was taken at.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Greatest vote timestamp folded in before the snapshot.
    #[must_use]
    pub const fn last_vote_timestamp(&self) -> Option<u64> {
        self.last_vote_timestamp
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
