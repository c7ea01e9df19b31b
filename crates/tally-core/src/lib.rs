#![forbid(unsafe_code)]
//! tally-core library.
//!
//! Vote and moderation model, the copy-on-write [`matrix::VoteMatrix`],
//! engine configuration and the error taxonomy shared by the analysis and
//! engine crates.
//!
//! # Conventions
//!
//! - **Errors**: typed `thiserror` enums in library code, `anyhow::Result`
//!   for config loading and binaries.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod config;
pub mod error;
pub mod event;
pub mod ids;
pub mod matrix;
pub mod model;
pub mod status;

pub use ids::{ConversationId, GroupId, ParticipantId, StatementId};
pub use matrix::{MatrixSnapshot, VoteMatrix};
pub use model::statement::{ModerationState, Statement};
pub use model::vote::{Vote, VoteValue};
