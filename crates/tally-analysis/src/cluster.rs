//! Opinion groups: k-means over projected participants.
//!
//! # Eligibility
//!
//! Only participants with at least `min(min_votes, C)` votes are clustered,
//! where `C` is the number of live statements in the snapshot. Everyone
//! else keeps a projection but carries no group.
//!
//! # Choosing k
//!
//! For each `k` in `2..=min(max_k, n - 1)`:
//!
//! 1. Seed centroids by farthest-point selection starting from the eligible
//!    participant with the smallest id.
//! 2. Run Lloyd's algorithm until no assignment changes or `max_iter`.
//! 3. Discard the candidate if any group is smaller than `min_group_size`.
//! 4. Score it by mean silhouette.
//!
//! A single group is the baseline with silhouette 0. A split wins only if
//! its silhouette exceeds `silhouette_margin`; among splits the highest
//! silhouette wins and equal scores keep the smaller `k`.
//!
//! # Labels
//!
//! Group ids are dense and ordered by each group's smallest member id, so
//! the same partition always gets the same labels.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, instrument};

use tally_core::config::ClusterConfig;
use tally_core::{GroupId, MatrixSnapshot, ParticipantId};

use crate::pca::{Point, ProjectionResult};

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// One opinion group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Group {
    pub id: GroupId,
    /// Unweighted mean of member projections.
    pub centroid: Point,
    /// Members in ascending id order.
    pub members: Vec<ParticipantId>,
}

impl Group {
    #[must_use]
    pub fn size(&self) -> usize {
        self.members.len()
    }
}

/// Output of [`cluster`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterAssignment {
    /// Eligible participant → group.
    pub assignments: BTreeMap<ParticipantId, GroupId>,
    pub groups: Vec<Group>,
    /// Mean silhouette of the chosen partition (0 for a single group).
    pub silhouette: f64,
    /// Lloyd iterations for the chosen `k` (0 for a single group).
    pub iterations: usize,
    pub converged: bool,
    /// Votes needed to be eligible in this snapshot.
    pub min_votes: usize,
    /// Eligible participants.
    pub eligible: usize,
    /// Set when there were too few eligible participants to try a split:
    /// the number that would have been required.
    pub split_skipped: Option<usize>,
}

impl ClusterAssignment {
    /// Number of groups.
    #[must_use]
    pub fn k(&self) -> usize {
        self.groups.len()
    }

    #[must_use]
    pub fn group_of(&self, participant: ParticipantId) -> Option<GroupId> {
        self.assignments.get(&participant).copied()
    }

    #[must_use]
    pub fn group(&self, id: GroupId) -> Option<&Group> {
        self.groups.get(id.index())
    }
}

/// A scored k-means run.
#[derive(Debug, Clone)]
struct Candidate {
    labels: Vec<usize>,
    silhouette: f64,
    iterations: usize,
    converged: bool,
}

// ---------------------------------------------------------------------------
// Clustering
// ---------------------------------------------------------------------------

/// Partition eligible participants into opinion groups.
#[must_use]
#[instrument(skip(projection, snapshot, config))]
pub fn cluster(
    projection: &ProjectionResult,
    snapshot: &MatrixSnapshot,
    config: &ClusterConfig,
) -> ClusterAssignment {
    let min_votes = config.min_votes.min(snapshot.statement_count()).max(1);

    let (ids, points): (Vec<ParticipantId>, Vec<Point>) = projection
        .points
        .iter()
        .filter(|(p, _)| snapshot.votes_cast(**p) >= min_votes)
        .map(|(p, point)| (*p, *point))
        .unzip();
    let n = ids.len();

    let required = 2 * config.min_group_size;
    if n < required {
        debug!(eligible = n, required, "too few participants to split");
        let labels = vec![0; n];
        return ClusterAssignment {
            silhouette: 0.0,
            iterations: 0,
            converged: true,
            min_votes,
            eligible: n,
            split_skipped: Some(required),
            ..build_groups(&ids, &points, &labels)
        };
    }

    let max_k = config.max_k.min(n - 1);
    let mut best: Option<Candidate> = None;

    for k in 2..=max_k {
        let (labels, iterations, converged) = kmeans(&points, k, config.max_iter);

        let mut sizes = vec![0usize; k];
        for &label in &labels {
            sizes[label] += 1;
        }
        if sizes.iter().any(|&size| size < config.min_group_size) {
            debug!(k, ?sizes, "discarding split with undersized group");
            continue;
        }

        let score = silhouette(&points, &labels, k);
        debug!(k, silhouette = score, iterations, converged, "scored candidate");

        if score <= config.silhouette_margin {
            continue;
        }
        if best.as_ref().is_none_or(|b| score > b.silhouette) {
            best = Some(Candidate {
                labels,
                silhouette: score,
                iterations,
                converged,
            });
        }
    }

    let candidate = best.unwrap_or_else(|| Candidate {
        labels: vec![0; n],
        silhouette: 0.0,
        iterations: 0,
        converged: true,
    });

    let assignment = build_groups(&ids, &points, &candidate.labels);
    debug!(k = assignment.groups.len(), silhouette = candidate.silhouette, "chose partition");

    ClusterAssignment {
        silhouette: candidate.silhouette,
        iterations: candidate.iterations,
        converged: candidate.converged,
        min_votes,
        eligible: n,
        split_skipped: None,
        ..assignment
    }
}

/// Relabel densely by smallest member id and compute centroids.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn build_groups(ids: &[ParticipantId], points: &[Point], labels: &[usize]) -> ClusterAssignment {
    // `ids` is ascending, so first occurrence order is smallest-member order.
    let mut relabel: BTreeMap<usize, GroupId> = BTreeMap::new();
    let mut groups: Vec<Group> = Vec::new();
    let mut sums: Vec<(f64, f64)> = Vec::new();
    let mut assignments = BTreeMap::new();

    for ((id, point), label) in ids.iter().zip(points).zip(labels) {
        let group_id = *relabel.entry(*label).or_insert_with(|| {
            let gid = GroupId(groups.len() as u32);
            groups.push(Group {
                id: gid,
                centroid: Point::default(),
                members: Vec::new(),
            });
            sums.push((0.0, 0.0));
            gid
        });
        let slot = group_id.index();
        groups[slot].members.push(*id);
        sums[slot].0 += point.x;
        sums[slot].1 += point.y;
        assignments.insert(*id, group_id);
    }

    for (group, (sx, sy)) in groups.iter_mut().zip(sums) {
        let size = group.members.len() as f64;
        group.centroid = Point::new(sx / size, sy / size);
    }

    ClusterAssignment {
        assignments,
        groups,
        silhouette: 0.0,
        iterations: 0,
        converged: true,
        min_votes: 0,
        eligible: ids.len(),
        split_skipped: None,
    }
}

// ---------------------------------------------------------------------------
// k-means
// ---------------------------------------------------------------------------

/// Farthest-point seeding from the first point (smallest id).
///
/// Ties on distance keep the earliest point.
fn seed_centroids(points: &[Point], k: usize) -> Vec<Point> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(points[0]);
    let mut nearest: Vec<f64> = points.iter().map(|p| p.distance_sq(points[0])).collect();

    while centroids.len() < k {
        let mut pick = 0;
        for (i, &d) in nearest.iter().enumerate() {
            if d > nearest[pick] {
                pick = i;
            }
        }
        let chosen = points[pick];
        centroids.push(chosen);
        for (d, p) in nearest.iter_mut().zip(points) {
            *d = d.min(p.distance_sq(chosen));
        }
    }
    centroids
}

fn nearest_centroid(point: Point, centroids: &[Point]) -> usize {
    let mut best = 0;
    let mut best_d = f64::INFINITY;
    for (i, c) in centroids.iter().enumerate() {
        let d = point.distance_sq(*c);
        if d < best_d {
            best_d = d;
            best = i;
        }
    }
    best
}

/// Lloyd's algorithm. Returns `(labels, iterations, converged)`.
///
/// An empty cluster keeps its previous centroid.
#[allow(clippy::cast_precision_loss)]
fn kmeans(points: &[Point], k: usize, max_iter: usize) -> (Vec<usize>, usize, bool) {
    let mut centroids = seed_centroids(points, k);
    let mut labels = vec![usize::MAX; points.len()];
    let mut iterations = 0;
    let mut converged = false;

    for iter in 0..max_iter {
        iterations = iter + 1;

        let mut changed = false;
        for (label, point) in labels.iter_mut().zip(points) {
            let nearest = nearest_centroid(*point, &centroids);
            if *label != nearest {
                *label = nearest;
                changed = true;
            }
        }
        if !changed {
            converged = true;
            break;
        }

        let mut sums = vec![(0.0, 0.0, 0usize); k];
        for (label, point) in labels.iter().zip(points) {
            let slot = &mut sums[*label];
            slot.0 += point.x;
            slot.1 += point.y;
            slot.2 += 1;
        }
        for (centroid, (sx, sy, count)) in centroids.iter_mut().zip(sums) {
            if count > 0 {
                *centroid = Point::new(sx / count as f64, sy / count as f64);
            }
        }
    }

    (labels, iterations, converged)
}

/// Mean silhouette over all points.
///
/// A point alone in its cluster scores 0; clusters with no points are
/// ignored when looking for the nearest other cluster.
#[allow(clippy::cast_precision_loss)]
fn silhouette(points: &[Point], labels: &[usize], k: usize) -> f64 {
    let n = points.len();
    if n == 0 {
        return 0.0;
    }

    let mut sizes = vec![0usize; k];
    for &label in labels {
        sizes[label] += 1;
    }

    let mut total = 0.0;
    for i in 0..n {
        let own = labels[i];
        if sizes[own] <= 1 {
            continue;
        }

        let mut dist_sums = vec![0.0; k];
        for j in 0..n {
            if i != j {
                dist_sums[labels[j]] += points[i].distance(points[j]);
            }
        }

        let a = dist_sums[own] / (sizes[own] - 1) as f64;
        let b = (0..k)
            .filter(|&c| c != own && sizes[c] > 0)
            .map(|c| dist_sums[c] / sizes[c] as f64)
            .fold(f64::INFINITY, f64::min);
        if !b.is_finite() {
            continue;
        }

        let denom = a.max(b);
        if denom > 0.0 {
            total += (b - a) / denom;
        }
    }

    total / n as f64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
