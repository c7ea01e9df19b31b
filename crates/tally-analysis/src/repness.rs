//! Representative statements per opinion group.
//!
//! For every live statement and every group, the group's votes are compared
//! with the votes of every other clustered participant. Agreement and
//! disagreement rates are tested separately; the direction with the larger
//! z-score is kept. Rates use every vote seen (passes included) as the
//! denominator.
//!
//! A (group, statement) pair whose group sample is below `min_group_votes`
//! gets no verdict and is counted as underpowered.

use std::cmp::Ordering;

use serde::Serialize;
use tracing::{debug, instrument};

use tally_core::config::RepnessConfig;
use tally_core::matrix::VoteCounts;
use tally_core::{GroupId, MatrixSnapshot, StatementId};

use crate::cluster::ClusterAssignment;
use crate::stats::{TestUsed, compare_proportions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Agree,
    Disagree,
}

/// Statistics for one (group, statement) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatementRepness {
    pub group: GroupId,
    pub statement: StatementId,
    pub agree: u32,
    pub disagree: u32,
    pub pass: u32,
    /// Group members who voted on the statement.
    pub group_size: u32,
    /// Counts among every other clustered participant.
    pub rest: VoteCounts,
    pub direction: Direction,
    pub z_score: f64,
    pub p_value: f64,
    /// Smoothed group rate over smoothed rest rate for `direction`.
    pub ratio: f64,
    pub test: TestUsed,
    pub significant: bool,
}

impl StatementRepness {
    fn rank(&self, other: &Self) -> Ordering {
        self.p_value
            .total_cmp(&other.p_value)
            .then_with(|| other.z_score.abs().total_cmp(&self.z_score.abs()))
            .then_with(|| self.statement.cmp(&other.statement))
    }
}

/// Ranked representative statements for one group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupRepness {
    pub group: GroupId,
    pub agree: Vec<StatementRepness>,
    pub disagree: Vec<StatementRepness>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RepnessResult {
    /// Every pair with enough group votes, in (group, statement) order.
    pub stats: Vec<StatementRepness>,
    /// One entry per group, in group order.
    pub groups: Vec<GroupRepness>,
    /// Pairs skipped because the group sample was too small.
    pub underpowered: usize,
}

impl RepnessResult {
    #[must_use]
    pub fn group(&self, group: GroupId) -> Option<&GroupRepness> {
        self.groups.get(group.index())
    }
}

/// `(k + 1) / (n + 2)`
fn smoothed(k: u32, n: u32) -> f64 {
    (f64::from(k) + 1.0) / (f64::from(n) + 2.0)
}

/// Rank representative statements for every group.
#[must_use]
#[instrument(skip_all)]
pub fn repness(
    snapshot: &MatrixSnapshot,
    clusters: &ClusterAssignment,
    config: &RepnessConfig,
) -> RepnessResult {
    let k = clusters.k();
    let mut stats = Vec::new();
    let mut underpowered = 0;

    for statement in snapshot.statements() {
        let mut per_group = vec![VoteCounts::default(); k];
        for participant in snapshot.column(statement) {
            let (Some(group), Some(value)) = (
                clusters.group_of(participant),
                snapshot.get(participant, statement),
            ) else {
                continue;
            };
            per_group[group.index()].record(value);
        }

        let mut all = VoteCounts::default();
        for counts in &per_group {
            all.agree += counts.agree;
            all.disagree += counts.disagree;
            all.pass += counts.pass;
        }

        for (group, counts) in clusters.groups.iter().zip(&per_group) {
            let rest = VoteCounts {
                agree: all.agree - counts.agree,
                disagree: all.disagree - counts.disagree,
                pass: all.pass - counts.pass,
            };
            let n_g = counts.total();
            let n_r = rest.total();
            if n_g < config.min_group_votes {
                underpowered += 1;
                continue;
            }
            if n_r == 0 {
                continue;
            }

            let agree = compare_proportions(
                counts.agree,
                n_g,
                rest.agree,
                n_r,
                config.test,
                config.exact_test_below,
            );
            let disagree = compare_proportions(
                counts.disagree,
                n_g,
                rest.disagree,
                n_r,
                config.test,
                config.exact_test_below,
            );
            let (direction, test, ratio) = if agree.z >= disagree.z {
                (
                    Direction::Agree,
                    agree,
                    smoothed(counts.agree, n_g) / smoothed(rest.agree, n_r),
                )
            } else {
                (
                    Direction::Disagree,
                    disagree,
                    smoothed(counts.disagree, n_g) / smoothed(rest.disagree, n_r),
                )
            };

            stats.push(StatementRepness {
                group: group.id,
                statement,
                agree: counts.agree,
                disagree: counts.disagree,
                pass: counts.pass,
                group_size: n_g,
                rest,
                direction,
                z_score: test.z,
                p_value: test.p_value,
                ratio,
                test: test.test,
                significant: test.z > 0.0 && test.p_value < config.significance,
            });
        }
    }

    stats.sort_by(|a, b| a.group.cmp(&b.group).then(a.statement.cmp(&b.statement)));

    let groups = clusters
        .groups
        .iter()
        .map(|group| {
            let ranked = |direction: Direction| {
                let mut list: Vec<StatementRepness> = stats
                    .iter()
                    .filter(|s| s.group == group.id && s.significant && s.direction == direction)
                    .cloned()
                    .collect();
                list.sort_by(StatementRepness::rank);
                list.truncate(config.top_n);
                list
            };
            GroupRepness {
                group: group.id,
                agree: ranked(Direction::Agree),
                disagree: ranked(Direction::Disagree),
            }
        })
        .collect::<Vec<_>>();

    debug!(
        pairs = stats.len(),
        underpowered,
        representative = groups
            .iter()
            .map(|g| g.agree.len() + g.disagree.len())
            .sum::<usize>(),
        "ranked representative statements"
    );

    RepnessResult {
        stats,
        groups,
        underpowered,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
