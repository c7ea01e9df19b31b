//! `tally simulate`: synthetic opinion-bloc feeds.

use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::Args;
use tracing::debug;

use tally_core::ConversationId;
use tally_core::config::EngineConfig;
use tally_sim::BlocScenario;

use crate::cmd::analyze::{render_reports, run_feed};
use crate::output::OutputMode;

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Conversation id stamped on every event.
    #[arg(long, default_value = "sim")]
    pub conversation: String,

    /// Number of participants.
    #[arg(long, default_value = "20")]
    pub participants: u64,

    /// Number of statements.
    #[arg(long, default_value = "15")]
    pub statements: u64,

    /// Number of opinion blocs.
    #[arg(long, default_value = "2")]
    pub blocs: u64,

    /// Percent chance that a vote flips to the opposite stance.
    #[arg(long, default_value = "0")]
    pub noise: u8,

    /// Percent chance that a participant votes on a statement.
    #[arg(long, default_value = "100")]
    pub participation: u8,

    /// RNG seed; the same seed always yields the same feed.
    #[arg(long, default_value = "0")]
    pub seed: u64,

    /// Deliver votes in random order.
    #[arg(long)]
    pub shuffle: bool,

    /// Run the feed through the engine instead of printing it.
    #[arg(long)]
    pub analyze: bool,
}

impl SimulateArgs {
    fn scenario(&self) -> BlocScenario {
        BlocScenario {
            conversation: ConversationId::new(self.conversation.as_str()),
            participants: self.participants,
            statements: self.statements,
            blocs: self.blocs,
            noise_percent: self.noise,
            participation_percent: self.participation,
            seed: self.seed,
            shuffle: self.shuffle,
            ..BlocScenario::default()
        }
    }
}

pub fn run_simulate(args: &SimulateArgs, config: &EngineConfig, output: OutputMode) -> Result<()> {
    let events = args
        .scenario()
        .generate()
        .context("Failed to generate scenario")?;
    debug!(events = events.len(), "scenario generated");

    if args.analyze {
        let reports = run_feed(events, config, None)?;
        return render_reports(&reports, output);
    }

    // The feed itself is the output: always JSONL, whatever the mode.
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for envelope in &events {
        writeln!(out, "{}", envelope.to_json_line()?)?;
    }
    Ok(())
}
