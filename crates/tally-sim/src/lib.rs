#![forbid(unsafe_code)]
//! tally-sim library.
//!
//! Seeded generators for synthetic conversations: participants split into
//! opinion blocs, each bloc agreeing with its own slice of statements, with
//! configurable noise and partial participation.
//!
//! # Conventions
//!
//! - **Errors**: Use `anyhow::Result` for return types.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod scenario;

pub use scenario::BlocScenario;
