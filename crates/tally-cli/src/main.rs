#![forbid(unsafe_code)]

mod cmd;
mod output;

use clap::{Parser, Subcommand};
use output::OutputMode;
use std::env;
use std::path::{Path, PathBuf};
use tally_core::config::{EngineConfig, load_config};
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "tally: opinion-group analysis for live conversations",
    long_about = None
)]
struct Cli {
    /// Debug-level logs when `TALLY_LOG` is unset.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Output format (overrides --json and TALLY_FORMAT).
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    /// Engine configuration file (TOML). Missing files fall back to defaults.
    #[arg(long, global = true, default_value = "tally.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn output_mode(&self) -> OutputMode {
        output::resolve_output_mode(self.format, self.json)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Analyze a JSONL event feed",
        long_about = "Feed every event of a JSONL file through the engine, compute each \
                      conversation once the feed drains, and print its opinion groups, \
                      representative statements and consensus.",
        after_help = "EXAMPLES:\n    # Analyze every conversation in a feed\n    tally analyze events.jsonl\n\n    # Only one conversation, as JSON\n    tally analyze events.jsonl --conversation c1 --json"
    )]
    Analyze(cmd::analyze::AnalyzeArgs),

    #[command(
        about = "Generate a synthetic bloc conversation",
        long_about = "Emit a deterministic JSONL vote feed in which participants split into \
                      opinion blocs, or run it straight through the engine with --analyze.",
        after_help = "EXAMPLES:\n    # Two blocs, 20 participants, 15 statements\n    tally simulate > feed.jsonl\n\n    # Three noisy blocs analyzed in-process\n    tally simulate --participants 90 --blocs 3 --noise 10 --analyze"
    )]
    Simulate(cmd::simulate::SimulateArgs),

    #[command(
        about = "Print the effective configuration",
        long_about = "Print the configuration the engine would run with: the config file \
                      (or defaults) with TALLY_* environment overrides applied.",
        after_help = "EXAMPLES:\n    # Show defaults as TOML\n    tally config\n\n    # Show a file's effective values as JSON\n    tally --config tally.toml config --json"
    )]
    Config,
}

fn default_directives(verbose: bool, debug_env: bool) -> &'static str {
    if verbose || debug_env {
        "tally=debug,info"
    } else {
        "tally=info,warn"
    }
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("TALLY_LOG").unwrap_or_else(|_| {
        EnvFilter::new(default_directives(verbose, env::var("DEBUG").is_ok()))
    });

    let format = env::var("TALLY_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());
    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so stdout stays parseable.
    match format.as_str() {
        "json" => registry
            .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
            .init(),
        _ => registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .init(),
    }
}

/// Config file (or defaults) with environment overrides, validated.
fn effective_config(path: &Path) -> anyhow::Result<EngineConfig> {
    let config = load_config(path)?.with_env_overrides();
    config.validate()?;
    debug!(path = %path.display(), "configuration loaded");
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    debug!(verbose = cli.verbose, "logging initialised");

    let output = cli.output_mode();
    let config = effective_config(&cli.config)?;

    match cli.command {
        Commands::Analyze(ref args) => cmd::analyze::run_analyze(args, &config, output),
        Commands::Simulate(ref args) => cmd::simulate::run_simulate(args, &config, output),
        Commands::Config => cmd::config::run_config(&config, output),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
