#![forbid(unsafe_code)]
//! tally-analysis library.
//!
//! The numerical pipeline that turns a vote matrix snapshot into a
//! revision's worth of results:
//!
//! 1. [`pca`]: mean imputation and a 2-component projection by power
//!    iteration.
//! 2. [`cluster`]: k-means over the projected points with silhouette-based
//!    choice of `k`.
//! 3. [`repness`]: per-group significance tests ranking representative
//!    statements.
//! 4. [`consensus`]: statements every group agrees (or disagrees) on.
//!
//! [`pipeline::analyze`] runs all four in order on one snapshot.
//!
//! # Conventions
//!
//! - **Errors**: stages return `Result<_, ComputeError>`; non-fatal
//!   conditions are reported as [`tally_core::status::Degradation`]s.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod cluster;
pub mod consensus;
pub mod pca;
pub mod pipeline;
pub mod repness;
pub mod stats;

pub use pca::Point;
pub use pipeline::{Analysis, analyze};
