//! Mean imputation and 2-component PCA via power iteration.
//!
//! # Algorithm
//!
//! 1. Columns are the snapshot's live statements; each has at least one
//!    vote, so every column mean is defined.
//! 2. Missing cells are imputed with the column mean and every column is
//!    centered. After centering an imputed cell is exactly zero, so the
//!    centered matrix `X` keeps the sparsity of the observed votes.
//! 3. The covariance `Xᵀ X / (R - 1)` is never materialized. Power
//!    iteration applies it as two sparse products, `Xᵀ (X v)`.
//! 4. The second component iterates on the deflated operator
//!    `C v - λ₁ (u₁ · v) u₁`.
//!
//! # Convergence
//!
//! Iteration stops when the cosine distance `1 - |cos(v_k, v_{k+1})|`
//! drops below the tolerance or at `max_iter`. Hitting the cap is not an
//! error: the last iterate is used and the component reports
//! `converged = false`.
//!
//! # Determinism
//!
//! Seeds are fixed vectors (all-ones first, normalized), every sum runs in
//! ascending id order, and the final sign is normalized so the loading with
//! the largest magnitude is positive. Identical snapshots yield bitwise
//! identical projections.

use std::collections::BTreeMap;

use nalgebra::DVector;
use serde::Serialize;
use tracing::{debug, instrument};

use tally_core::config::PcaConfig;
use tally_core::error::ComputeError;
use tally_core::{MatrixSnapshot, ParticipantId, StatementId};

/// Norm below which an operator image counts as zero. Vote values are in
/// `[-1, 1]`, so rounding noise sits many orders of magnitude lower.
const ZERO_NORM: f64 = 1e-10;

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// A participant's position in the 2-D projection.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    #[must_use]
    pub fn distance_sq(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx.mul_add(dx, dy * dy)
    }
}

/// One principal component.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrincipalComponent {
    /// Unit-length loadings aligned with [`ProjectionResult::statements`].
    pub loadings: Vec<f64>,
    /// Variance captured along this component.
    pub eigenvalue: f64,
    /// Power-iteration steps taken.
    pub iterations: usize,
    /// Whether the tolerance was met before `max_iter`.
    pub converged: bool,
}

/// Output of [`project`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectionResult {
    /// Participant → (x, y).
    pub points: BTreeMap<ParticipantId, Point>,
    /// Column order used by the loadings and means.
    pub statements: Vec<StatementId>,
    /// Observed mean per column (the imputation value).
    pub column_means: Vec<f64>,
    pub components: [PrincipalComponent; 2],
}

impl ProjectionResult {
    /// Total power-iteration steps across both components.
    #[must_use]
    pub fn iterations(&self) -> usize {
        self.components.iter().map(|c| c.iterations).sum()
    }

    /// Returns `true` if both components converged.
    #[must_use]
    pub fn converged(&self) -> bool {
        self.components.iter().all(|c| c.converged)
    }

    /// Loading of a statement on the given component (0 or 1).
    #[must_use]
    pub fn loading(&self, component: usize, statement: StatementId) -> Option<f64> {
        let col = self.statements.binary_search(&statement).ok()?;
        self.components.get(component).map(|c| c.loadings[col])
    }
}

// ---------------------------------------------------------------------------
// Centered sparse matrix
// ---------------------------------------------------------------------------

/// Mean-centered matrix storing only observed cells.
struct CenteredMatrix {
    /// Per participant: `(column, value - column_mean)`.
    rows: Vec<Vec<(usize, f64)>>,
    n_cols: usize,
}

impl CenteredMatrix {
    /// `X v` (length R).
    fn mul(&self, v: &DVector<f64>) -> DVector<f64> {
        DVector::from_iterator(
            self.rows.len(),
            self.rows
                .iter()
                .map(|row| row.iter().map(|&(c, x)| x * v[c]).sum::<f64>()),
        )
    }

    /// `Xᵀ u` (length C).
    fn tr_mul(&self, u: &DVector<f64>) -> DVector<f64> {
        let mut out = DVector::zeros(self.n_cols);
        for (r, row) in self.rows.iter().enumerate() {
            for &(c, x) in row {
                out[c] += x * u[r];
            }
        }
        out
    }

    /// Covariance operator `Xᵀ X v / (R - 1)`.
    #[allow(clippy::cast_precision_loss)]
    fn cov_mul(&self, v: &DVector<f64>) -> DVector<f64> {
        let denom = (self.rows.len().saturating_sub(1)).max(1) as f64;
        self.tr_mul(&self.mul(v)) / denom
    }

    fn row_dot(&self, r: usize, v: &DVector<f64>) -> f64 {
        self.rows[r].iter().map(|&(c, x)| x * v[c]).sum()
    }
}

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

/// Project every participant of a snapshot onto its first two principal
/// components.
///
/// # Errors
///
/// - [`ComputeError::InsufficientData`] when the snapshot has fewer than
///   two participants or two statements.
/// - [`ComputeError::NumericalFault`] if a non-finite value appears.
#[instrument(skip(snapshot, config), fields(
    participants = snapshot.participant_count(),
    statements = snapshot.statement_count(),
))]
pub fn project(
    snapshot: &MatrixSnapshot,
    config: &PcaConfig,
) -> Result<ProjectionResult, ComputeError> {
    let participants: Vec<ParticipantId> = snapshot.participants().collect();
    let statements: Vec<StatementId> = snapshot.statements().collect();

    if participants.len() < 2 || statements.len() < 2 {
        return Err(ComputeError::InsufficientData {
            participants: participants.len(),
            statements: statements.len(),
        });
    }

    let column_means = column_means(snapshot, &statements);
    let matrix = center(snapshot, &participants, &statements, &column_means);
    let n = statements.len();

    let first = power_iteration(|v| matrix.cov_mul(v), &seeds(n), config)?;

    let u1 = DVector::from_column_slice(&first.loadings);
    let lambda1 = first.eigenvalue;
    let deflated = |v: &DVector<f64>| {
        let mut w = matrix.cov_mul(v);
        w.axpy(-lambda1 * u1.dot(v), &u1, 1.0);
        // Re-orthogonalize against u1 to keep rounding drift out.
        let drift = u1.dot(&w);
        w.axpy(-drift, &u1, 1.0);
        w
    };
    let second_seeds: Vec<DVector<f64>> = seeds(n)
        .into_iter()
        .map(|mut s| {
            let along = u1.dot(&s);
            s.axpy(-along, &u1, 1.0);
            s
        })
        .collect();
    let second = power_iteration(deflated, &second_seeds, config)?;

    let u2 = DVector::from_column_slice(&second.loadings);
    let points = participants
        .iter()
        .enumerate()
        .map(|(r, participant)| {
            let scale = if config.scale_sparse_voters {
                sparse_scale(n, matrix.rows[r].len())
            } else {
                1.0
            };
            let point = Point::new(matrix.row_dot(r, &u1) * scale, matrix.row_dot(r, &u2) * scale);
            (*participant, point)
        })
        .collect::<BTreeMap<_, _>>();

    if points.values().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
        return Err(ComputeError::NumericalFault {
            stage: "pca",
            detail: "non-finite projection".to_string(),
        });
    }

    debug!(
        first_iterations = first.iterations,
        second_iterations = second.iterations,
        converged = first.converged && second.converged,
        "projection complete"
    );

    Ok(ProjectionResult {
        points,
        statements,
        column_means,
        components: [first, second],
    })
}

#[allow(clippy::cast_precision_loss)]
fn column_means(snapshot: &MatrixSnapshot, statements: &[StatementId]) -> Vec<f64> {
    statements
        .iter()
        .map(|&statement| {
            let (sum, count) = snapshot
                .column(statement)
                .filter_map(|p| snapshot.get(p, statement))
                .fold((0.0, 0usize), |(sum, count), value| {
                    (sum + value.as_f64(), count + 1)
                });
            if count == 0 { 0.0 } else { sum / count as f64 }
        })
        .collect()
}

fn center(
    snapshot: &MatrixSnapshot,
    participants: &[ParticipantId],
    statements: &[StatementId],
    means: &[f64],
) -> CenteredMatrix {
    let col_index: BTreeMap<StatementId, usize> = statements
        .iter()
        .enumerate()
        .map(|(i, s)| (*s, i))
        .collect();

    let rows = participants
        .iter()
        .map(|&participant| {
            snapshot
                .row(participant)
                .filter_map(|(statement, value)| {
                    col_index
                        .get(&statement)
                        .map(|&c| (c, value.as_f64() - means[c]))
                })
                .collect()
        })
        .collect();

    CenteredMatrix {
        rows,
        n_cols: statements.len(),
    }
}

/// `sqrt(C / votes_cast)`; 1.0 for someone who voted on everything.
#[allow(clippy::cast_precision_loss)]
fn sparse_scale(n_cols: usize, votes_cast: usize) -> f64 {
    if votes_cast == 0 {
        return 1.0;
    }
    (n_cols as f64 / votes_cast as f64).sqrt()
}

/// Deterministic seeds tried in order: all-ones, alternating signs, ramp.
///
/// The later seeds only matter when the earlier ones lie in the operator's
/// null space (e.g. rows that sum to zero annihilate the all-ones seed).
#[allow(clippy::cast_precision_loss)]
fn seeds(n: usize) -> Vec<DVector<f64>> {
    vec![
        DVector::from_element(n, 1.0),
        DVector::from_fn(n, |i, _| if i % 2 == 0 { 1.0 } else { -1.0 }),
        DVector::from_fn(n, |i, _| (i + 1) as f64),
    ]
}

// ---------------------------------------------------------------------------
// Power iteration
// ---------------------------------------------------------------------------

fn power_iteration(
    apply: impl Fn(&DVector<f64>) -> DVector<f64>,
    seeds: &[DVector<f64>],
    config: &PcaConfig,
) -> Result<PrincipalComponent, ComputeError> {
    let n = seeds.first().map_or(0, DVector::len);

    // Pick the first seed with a non-vanishing image.
    let mut start = None;
    for seed in seeds {
        let seed_norm = seed.norm();
        if seed_norm <= ZERO_NORM {
            continue;
        }
        let v = seed / seed_norm;
        let image_norm = apply(&v).norm();
        check_finite(image_norm)?;
        if image_norm > ZERO_NORM {
            start = Some(v);
            break;
        }
    }

    let Some(mut v) = start else {
        // The operator is zero on every seed: no variance left. Any unit
        // vector is an eigenvector with eigenvalue 0.
        let fallback = seeds
            .iter()
            .find(|s| s.norm() > ZERO_NORM)
            .map_or_else(|| DVector::zeros(n), DVector::normalize);
        return Ok(PrincipalComponent {
            loadings: fallback.as_slice().to_vec(),
            eigenvalue: 0.0,
            iterations: 0,
            converged: true,
        });
    };

    let mut iterations = 0;
    let mut converged = false;

    for iter in 0..config.max_iter {
        iterations = iter + 1;

        let w = apply(&v);
        let norm = w.norm();
        check_finite(norm)?;
        if norm <= ZERO_NORM {
            converged = true;
            break;
        }

        let next = w / norm;
        let distance = 1.0 - next.dot(&v).abs();
        v = next;

        if distance < config.tolerance {
            converged = true;
            break;
        }
    }

    let eigenvalue = v.dot(&apply(&v));
    check_finite(eigenvalue)?;
    normalize_sign(&mut v);

    Ok(PrincipalComponent {
        loadings: v.as_slice().to_vec(),
        eigenvalue,
        iterations,
        converged,
    })
}

/// Flip so the largest-magnitude loading is positive (first index on ties).
fn normalize_sign(v: &mut DVector<f64>) {
    let mut pivot = 0.0_f64;
    for &x in v.iter() {
        if x.abs() > pivot.abs() {
            pivot = x;
        }
    }
    if pivot < 0.0 {
        v.neg_mut();
    }
}

fn check_finite(value: f64) -> Result<(), ComputeError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ComputeError::NumericalFault {
            stage: "pca",
            detail: format!("non-finite value {value} during power iteration"),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::{Vote, VoteMatrix, VoteValue};

    fn matrix(rows: &[&[i8]]) -> MatrixSnapshot {
        let mut m = VoteMatrix::new();
        for (p, row) in rows.iter().enumerate() {
            for (s, &raw) in row.iter().enumerate() {
                if let Some(value) = VoteValue::from_i8(raw) {
                    m.apply_vote(&Vote::new(
                        ParticipantId(p as u64),
                        StatementId(s as u64),
                        value,
                        1,
                    ));
                }
            }
        }
        m.snapshot()
    }

    fn unit_norm(loadings: &[f64]) -> f64 {
        loadings.iter().map(|x| x * x).sum::<f64>().sqrt()
    }

    #[test]
    fn single_participant_is_insufficient() {
        let snap = matrix(&[&[1, 1, -1, 0, 1]]);
        let err = project(&snap, &PcaConfig::default()).unwrap_err();
        assert_eq!(
            err,
            ComputeError::InsufficientData {
                participants: 1,
                statements: 5
            }
        );
    }

    #[test]
    fn single_statement_is_insufficient() {
        let snap = matrix(&[&[1], &[-1], &[1]]);
        assert!(matches!(
            project(&snap, &PcaConfig::default()),
            Err(ComputeError::InsufficientData { statements: 1, .. })
        ));
    }

    #[test]
    fn opposed_blocs_separate_on_first_axis() {
        let snap = matrix(&[
            &[1, 1, -1, -1],
            &[1, 1, -1, -1],
            &[-1, -1, 1, 1],
            &[-1, -1, 1, 1],
        ]);
        let result = project(&snap, &PcaConfig::default()).unwrap();

        let a = result.points[&ParticipantId(0)];
        let b = result.points[&ParticipantId(2)];
        assert!((a.x + b.x).abs() < 1e-9, "blocs mirror each other");
        assert!(a.x.abs() > 1.0);
        assert!(result.components[0].converged);
        assert!((unit_norm(&result.components[0].loadings) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn zero_sum_rows_do_not_hide_variance() {
        // Every centered row sums to zero, so the all-ones seed is in the
        // null space; the alternate seed must find the real axis.
        let snap = matrix(&[&[1, -1], &[1, -1], &[-1, 1], &[-1, 1]]);
        let result = project(&snap, &PcaConfig::default()).unwrap();
        assert!(result.components[0].eigenvalue > 0.5);
        assert!(result.points[&ParticipantId(0)].x.abs() > 0.5);
    }

    #[test]
    fn components_are_orthogonal() {
        let snap = matrix(&[
            &[1, 0, -1, 1, 1],
            &[1, 1, -1, -1, 0],
            &[-1, 1, 1, 0, -1],
            &[0, -1, 1, 1, 1],
            &[1, 1, 0, -1, -1],
            &[-1, 0, -1, 1, 1],
        ]);
        let result = project(&snap, &PcaConfig::default()).unwrap();
        let dot: f64 = result.components[0]
            .loadings
            .iter()
            .zip(&result.components[1].loadings)
            .map(|(a, b)| a * b)
            .sum();
        assert!(dot.abs() < 1e-6, "dot = {dot}");
        assert!(result.components[0].eigenvalue >= result.components[1].eigenvalue - 1e-9);
    }

    #[test]
    fn missing_cells_are_mean_imputed() {
        // Participant 2 skipped statement 0; the imputed cell centers to 0.
        let snap = matrix(&[&[1, 1, -1], &[-1, -1, 1], &[9, 1, -1]]);
        let result = project(&snap, &PcaConfig::default()).unwrap();
        assert!((result.column_means[0] - 0.0).abs() < 1e-12);
        assert!((result.column_means[1] - (1.0 / 3.0)).abs() < 1e-12);
        assert_eq!(result.points.len(), 3);
    }

    #[test]
    fn projection_is_deterministic() {
        let rows: &[&[i8]] = &[
            &[1, 0, -1, 1, 9, 1],
            &[1, 1, -1, -1, 0, 9],
            &[-1, 9, 1, 0, -1, 1],
            &[0, -1, 1, 1, 1, -1],
            &[1, 1, 0, 9, -1, 0],
        ];
        let first = project(&matrix(rows), &PcaConfig::default()).unwrap();
        let second = project(&matrix(rows), &PcaConfig::default()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn iteration_cap_reports_not_converged() {
        let snap = matrix(&[
            &[1, 0, -1, 1, 1],
            &[1, 1, -1, -1, 0],
            &[-1, 1, 1, 0, -1],
            &[0, -1, 1, 1, 1],
            &[1, 1, 0, -1, -1],
        ]);
        let config = PcaConfig {
            tolerance: 1e-300,
            max_iter: 2,
            scale_sparse_voters: false,
        };
        let result = project(&snap, &config).unwrap();
        assert!(!result.converged());
        assert_eq!(result.components[0].iterations, 2);
        assert_eq!(result.points.len(), 5);
    }

    #[test]
    fn uniform_votes_have_no_variance() {
        let snap = matrix(&[&[1, 1, 1], &[1, 1, 1], &[1, 1, 1]]);
        let result = project(&snap, &PcaConfig::default()).unwrap();
        assert!(result.components[0].eigenvalue.abs() < 1e-12);
        assert!(result.converged());
        for point in result.points.values() {
            assert!(point.x.abs() < 1e-12 && point.y.abs() < 1e-12);
        }
    }

    #[test]
    fn sparse_voters_are_scaled_out_from_center() {
        let rows: &[&[i8]] = &[
            &[1, 1, -1, -1],
            &[-1, -1, 1, 1],
            &[1, 9, 9, 9],
            &[-1, -1, 1, 1],
        ];
        let scaled = project(
            &matrix(rows),
            &PcaConfig {
                scale_sparse_voters: true,
                ..PcaConfig::default()
            },
        )
        .unwrap();
        let plain = project(&matrix(rows), &PcaConfig::default()).unwrap();
        let p = ParticipantId(2);
        assert!((scaled.points[&p].x - plain.points[&p].x * 2.0).abs() < 1e-9);
    }

    #[test]
    fn default_projection_is_centered_row_dot_components() {
        let rows: &[&[i8]] = &[
            &[1, 1, -1, -1],
            &[-1, -1, 1, 1],
            &[1, 9, 9, 9],
            &[0, -1, 1, 9],
            &[1, 1, 0, -1],
        ];
        let snap = matrix(rows);
        let result = project(&snap, &PcaConfig::default()).unwrap();

        for (participant, point) in &result.points {
            // Imputed cells equal the column mean and center to zero.
            let centered: Vec<f64> = result
                .statements
                .iter()
                .zip(&result.column_means)
                .map(|(s, mean)| snap.get(*participant, *s).map_or(0.0, |v| v.as_f64() - mean))
                .collect();
            let dot = |loadings: &[f64]| -> f64 {
                centered.iter().zip(loadings).map(|(c, l)| c * l).sum()
            };
            assert!((point.x - dot(&result.components[0].loadings)).abs() < 1e-9);
            assert!((point.y - dot(&result.components[1].loadings)).abs() < 1e-9);
        }
    }

    #[test]
    fn loading_lookup_by_statement() {
        let snap = matrix(&[&[1, -1, 1], &[-1, 1, -1], &[1, -1, 0]]);
        let result = project(&snap, &PcaConfig::default()).unwrap();
        assert!(result.loading(0, StatementId(1)).is_some());
        assert!(result.loading(0, StatementId(7)).is_none());
    }
}
