//! Projection → clustering → representativeness on one snapshot.

use std::collections::BTreeMap;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, instrument, warn};

use tally_core::config::EngineConfig;
use tally_core::error::ComputeError;
use tally_core::matrix::VoteCounts;
use tally_core::status::Degradation;
use tally_core::{MatrixSnapshot, ParticipantId, StatementId};

use crate::cluster::{ClusterAssignment, cluster};
use crate::consensus::{ConsensusResult, consensus};
use crate::pca::{ProjectionResult, project};
use crate::repness::{RepnessResult, repness};

/// Wall-clock time spent per stage, in microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageTimings {
    pub projection_us: u64,
    pub clustering_us: u64,
    pub repness_us: u64,
}

/// Everything one run produces.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Analysis {
    pub projection: ProjectionResult,
    pub clusters: ClusterAssignment,
    pub repness: RepnessResult,
    pub consensus: ConsensusResult,
    /// Overall counts per live statement.
    pub tallies: BTreeMap<StatementId, VoteCounts>,
    /// Retained votes per participant.
    pub participation: BTreeMap<ParticipantId, usize>,
    pub timings: StageTimings,
    pub degradations: Vec<Degradation>,
}

fn elapsed_us(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX)
}

/// Run the full pipeline.
///
/// # Errors
///
/// Propagates [`ComputeError`] from projection: too little data, or a
/// non-finite intermediate value.
#[instrument(skip_all, fields(version = snapshot.version()))]
pub fn analyze(snapshot: &MatrixSnapshot, config: &EngineConfig) -> Result<Analysis, ComputeError> {
    let mut degradations = Vec::new();

    let start = Instant::now();
    let projection = project(snapshot, &config.pca)?;
    let projection_us = elapsed_us(start);
    for (component, pc) in (1u8..).zip(&projection.components) {
        if !pc.converged {
            degradations.push(Degradation::PcaNotConverged {
                component,
                iterations: pc.iterations,
            });
        }
    }

    let start = Instant::now();
    let clusters = cluster(&projection, snapshot, &config.clustering);
    let clustering_us = elapsed_us(start);
    if let Some(required) = clusters.split_skipped {
        degradations.push(Degradation::TooFewForClustering {
            eligible: clusters.eligible,
            required,
        });
    }
    if !clusters.converged {
        degradations.push(Degradation::ClusteringNotConverged { k: clusters.k() });
    }

    let start = Instant::now();
    let repness = repness(snapshot, &clusters, &config.repness);
    let consensus = consensus(snapshot, &clusters, &config.consensus);
    let repness_us = elapsed_us(start);

    let tallies = snapshot
        .statements()
        .map(|s| (s, snapshot.counts(s)))
        .collect();
    let participation = snapshot
        .participants()
        .map(|p| (p, snapshot.votes_cast(p)))
        .collect();

    for degradation in &degradations {
        warn!(%degradation, "analysis degraded");
    }
    debug!(
        groups = clusters.k(),
        projection_us, clustering_us, repness_us, "analysis complete"
    );

    Ok(Analysis {
        projection,
        clusters,
        repness,
        consensus,
        tallies,
        participation,
        timings: StageTimings {
            projection_us,
            clustering_us,
            repness_us,
        },
        degradations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::{Vote, VoteMatrix, VoteValue};

    #[test]
    fn single_participant_is_insufficient() {
        let mut m = VoteMatrix::new();
        for s in 0..5 {
            m.apply_vote(&Vote::new(ParticipantId(1), StatementId(s), VoteValue::Agree, 1));
        }
        let err = analyze(&m.snapshot(), &EngineConfig::default()).unwrap_err();
        assert_eq!(
            err,
            ComputeError::InsufficientData {
                participants: 1,
                statements: 5
            }
        );
    }

    #[test]
    fn small_conversation_degrades_to_one_group() {
        let mut m = VoteMatrix::new();
        for p in 0..4 {
            for s in 0..3 {
                let v = if (p + s) % 2 == 0 {
                    VoteValue::Agree
                } else {
                    VoteValue::Disagree
                };
                m.apply_vote(&Vote::new(ParticipantId(p), StatementId(s), v, 1));
            }
        }
        let analysis = analyze(&m.snapshot(), &EngineConfig::default()).unwrap();
        assert_eq!(analysis.clusters.k(), 1);
        assert!(
            analysis
                .degradations
                .iter()
                .any(|d| d.reason() == "too_few_for_clustering")
        );
        assert_eq!(analysis.tallies.len(), 3);
        assert_eq!(analysis.participation[&ParticipantId(0)], 3);
    }
}
