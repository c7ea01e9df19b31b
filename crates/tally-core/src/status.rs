//! Health of a published revision.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A non-fatal condition met while computing a revision. The revision is
/// still valid and published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Degradation {
    /// Power iteration for a principal component hit its iteration cap.
    PcaNotConverged { component: u8, iterations: usize },
    /// Not enough eligible participants to split; everyone is one group.
    TooFewForClustering { eligible: usize, required: usize },
    /// Lloyd's algorithm hit its iteration cap for the chosen `k`.
    ClusteringNotConverged { k: usize },
}

impl Degradation {
    /// Short machine-readable reason.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::PcaNotConverged { .. } => "pca_not_converged",
            Self::TooFewForClustering { .. } => "too_few_for_clustering",
            Self::ClusteringNotConverged { .. } => "clustering_not_converged",
        }
    }
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PcaNotConverged {
                component,
                iterations,
            } => write!(
                f,
                "{}: component {component} after {iterations} iterations",
                self.reason()
            ),
            Self::TooFewForClustering { eligible, required } => write!(
                f,
                "{}: {eligible} eligible participants, {required} required",
                self.reason()
            ),
            Self::ClusteringNotConverged { k } => write!(f, "{}: k={k}", self.reason()),
        }
    }
}

/// Status carried by every published revision.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", content = "reasons", rename_all = "snake_case")]
pub enum Status {
    #[default]
    Ok,
    Degraded(Vec<Degradation>),
}

impl Status {
    /// Build a status from the degradations collected by a run.
    #[must_use]
    pub fn from_degradations(degradations: Vec<Degradation>) -> Self {
        if degradations.is_empty() {
            Self::Ok
        } else {
            Self::Degraded(degradations)
        }
    }

    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Degradations recorded, empty when `Ok`.
    #[must_use]
    pub fn degradations(&self) -> &[Degradation] {
        match self {
            Self::Ok => &[],
            Self::Degraded(reasons) => reasons,
        }
    }

    /// Returns `true` if a degradation with the given reason was recorded.
    #[must_use]
    pub fn has_reason(&self, reason: &str) -> bool {
        self.degradations().iter().any(|d| d.reason() == reason)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str("ok"),
            Self::Degraded(reasons) => {
                f.write_str("degraded(")?;
                for (i, reason) in reasons.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    f.write_str(reason.reason())?;
                }
                f.write_str(")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_degradations_is_ok() {
        assert!(Status::from_degradations(Vec::new()).is_ok());
    }

    #[test]
    fn display_lists_reasons() {
        let status = Status::from_degradations(vec![
            Degradation::PcaNotConverged {
                component: 1,
                iterations: 100,
            },
            Degradation::TooFewForClustering {
                eligible: 3,
                required: 6,
            },
        ]);
        assert_eq!(
            status.to_string(),
            "degraded(pca_not_converged, too_few_for_clustering)"
        );
        assert!(status.has_reason("pca_not_converged"));
        assert!(!status.has_reason("clustering_not_converged"));
    }

    #[test]
    fn serializes_with_reason_tags() {
        let status = Status::Degraded(vec![Degradation::ClusteringNotConverged { k: 3 }]);
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["reasons"][0]["reason"], "clustering_not_converged");
        assert_eq!(json["reasons"][0]["k"], 3);
    }
}
