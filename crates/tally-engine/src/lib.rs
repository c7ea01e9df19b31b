#![forbid(unsafe_code)]
//! tally-engine library.
//!
//! Owns conversations: folds ingested events into each conversation's
//! [`tally_core::VoteMatrix`], decides when to recompute, runs the
//! analysis pipeline on a worker pool and publishes immutable, numbered
//! [`state::ConversationState`] revisions.
//!
//! # Concurrency
//!
//! - Events enter through a bounded channel drained by one ingestion
//!   thread, or synchronously through [`Engine::apply`].
//! - A ticker thread applies the batching policy and hands due
//!   conversations to a fixed pool of workers.
//! - Each conversation guards its own matrix, control state and published
//!   revision; unrelated conversations never contend.
//!
//! # Conventions
//!
//! - **Errors**: [`EngineError`] for every fallible call.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod conversation;
pub mod engine;
pub mod error;
pub mod policy;
pub mod state;

pub use conversation::{Health, Phase};
pub use engine::{Engine, IngestHandle};
pub use error::EngineError;
pub use state::{ConversationState, LatestState};
