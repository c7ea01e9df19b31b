//! Published revisions.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use tally_analysis::Analysis;
use tally_analysis::cluster::ClusterAssignment;
use tally_analysis::consensus::ConsensusResult;
use tally_analysis::pca::ProjectionResult;
use tally_analysis::pipeline::StageTimings;
use tally_analysis::repness::{GroupRepness, RepnessResult};
use tally_core::matrix::VoteCounts;
use tally_core::status::Status;
use tally_core::{ConversationId, GroupId, MatrixSnapshot, ParticipantId, StatementId};

/// One immutable revision of a conversation's computed results.
///
/// Revisions replace each other wholesale; nothing in a published revision
/// is ever modified.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationState {
    pub conversation: ConversationId,
    /// Strictly increasing per conversation, starting at 1.
    pub revision: u64,
    /// The vote matrix the revision was computed from.
    #[serde(skip)]
    pub snapshot: MatrixSnapshot,
    pub projection: ProjectionResult,
    pub clusters: ClusterAssignment,
    pub repness: RepnessResult,
    pub consensus: ConsensusResult,
    pub tallies: BTreeMap<StatementId, VoteCounts>,
    pub participation: BTreeMap<ParticipantId, usize>,
    /// Greatest vote timestamp included in the snapshot.
    pub last_vote_timestamp: Option<u64>,
    pub computed_at: DateTime<Utc>,
    pub status: Status,
    pub timings: StageTimings,
}

impl ConversationState {
    #[must_use]
    pub fn new(
        conversation: ConversationId,
        revision: u64,
        snapshot: MatrixSnapshot,
        analysis: Analysis,
    ) -> Self {
        Self {
            conversation,
            revision,
            last_vote_timestamp: snapshot.last_vote_timestamp(),
            snapshot,
            projection: analysis.projection,
            clusters: analysis.clusters,
            repness: analysis.repness,
            consensus: analysis.consensus,
            tallies: analysis.tallies,
            participation: analysis.participation,
            computed_at: Utc::now(),
            status: Status::from_degradations(analysis.degradations),
            timings: analysis.timings,
        }
    }

    #[must_use]
    pub fn group_of(&self, participant: ParticipantId) -> Option<GroupId> {
        self.clusters.group_of(participant)
    }

    #[must_use]
    pub fn group_count(&self) -> usize {
        self.clusters.k()
    }

    /// Ranked representative statements for a group.
    #[must_use]
    pub fn representatives(&self, group: GroupId) -> Option<&GroupRepness> {
        self.repness.group(group)
    }
}

/// Result of reading a conversation's latest revision.
#[derive(Debug, Clone)]
pub enum LatestState {
    /// Nothing published yet (or the conversation is unknown).
    NoData,
    Ready(Arc<ConversationState>),
}

impl LatestState {
    #[must_use]
    pub fn revision(&self) -> Option<u64> {
        match self {
            Self::NoData => None,
            Self::Ready(state) => Some(state.revision),
        }
    }

    #[must_use]
    pub fn into_option(self) -> Option<Arc<ConversationState>> {
        match self {
            Self::NoData => None,
            Self::Ready(state) => Some(state),
        }
    }

    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

impl From<Option<Arc<ConversationState>>> for LatestState {
    fn from(state: Option<Arc<ConversationState>>) -> Self {
        state.map_or(Self::NoData, Self::Ready)
    }
}
