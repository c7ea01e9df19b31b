//! Statements the whole conversation shares an opinion on.
//!
//! Each group's agreement is smoothed as `(agree + 1) / (n + 2)` so a group
//! that never saw a statement sits at one half rather than zero. A statement
//! is consensus-agree when every group's smoothed agreement exceeds
//! `min_agree`, and its score is the product across groups. Disagreement is
//! handled symmetrically.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, instrument};

use tally_core::config::ConsensusConfig;
use tally_core::matrix::VoteCounts;
use tally_core::{MatrixSnapshot, StatementId};

use crate::cluster::ClusterAssignment;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConsensusStatement {
    pub statement: StatementId,
    /// Product of per-group smoothed probabilities.
    pub score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConsensusResult {
    pub agree: Vec<ConsensusStatement>,
    pub disagree: Vec<ConsensusStatement>,
}

fn smoothed(k: u32, n: u32) -> f64 {
    (f64::from(k) + 1.0) / (f64::from(n) + 2.0)
}

/// Rank consensus statements across all groups.
#[must_use]
#[instrument(skip_all)]
pub fn consensus(
    snapshot: &MatrixSnapshot,
    clusters: &ClusterAssignment,
    config: &ConsensusConfig,
) -> ConsensusResult {
    if clusters.k() == 0 {
        return ConsensusResult::default();
    }

    let mut per_statement: BTreeMap<StatementId, Vec<VoteCounts>> = BTreeMap::new();
    for statement in snapshot.statements() {
        let counts = per_statement
            .entry(statement)
            .or_insert_with(|| vec![VoteCounts::default(); clusters.k()]);
        for participant in snapshot.column(statement) {
            if let (Some(group), Some(value)) = (
                clusters.group_of(participant),
                snapshot.get(participant, statement),
            ) {
                counts[group.index()].record(value);
            }
        }
    }

    let mut agree = Vec::new();
    let mut disagree = Vec::new();
    for (statement, groups) in &per_statement {
        let score = |pick: fn(&VoteCounts) -> u32| {
            let probs: Vec<f64> = groups.iter().map(|c| smoothed(pick(c), c.total())).collect();
            probs
                .iter()
                .all(|&p| p > config.min_agree)
                .then(|| probs.iter().product::<f64>())
        };
        if let Some(score) = score(|c: &VoteCounts| c.agree) {
            agree.push(ConsensusStatement {
                statement: *statement,
                score,
            });
        }
        if let Some(score) = score(|c: &VoteCounts| c.disagree) {
            disagree.push(ConsensusStatement {
                statement: *statement,
                score,
            });
        }
    }

    for list in [&mut agree, &mut disagree] {
        list.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.statement.cmp(&b.statement))
        });
        list.truncate(config.top_n);
    }

    debug!(agree = agree.len(), disagree = disagree.len(), "consensus");
    ConsensusResult { agree, disagree }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
