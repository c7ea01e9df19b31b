use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Args;
use serde::Serialize;
use tracing::{info, warn};

use tally_analysis::consensus::ConsensusStatement;
use tally_analysis::repness::{Direction, StatementRepness};
use tally_core::ConversationId;
use tally_core::config::EngineConfig;
use tally_core::event::Envelope;
use tally_engine::{ConversationState, Engine, EngineError};

use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// JSONL event feed, one vote or moderation event per line.
    pub events: PathBuf,

    /// Only analyze this conversation.
    #[arg(long)]
    pub conversation: Option<String>,
}

/// Result of one conversation's batch run.
#[derive(Debug, Serialize)]
pub struct ConversationReport {
    pub conversation: ConversationId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<ConversationState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
}

#[derive(Debug, Serialize)]
pub struct ErrorReport {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<&'static str>,
}

impl From<&EngineError> for ErrorReport {
    fn from(err: &EngineError) -> Self {
        Self {
            code: err.code().code(),
            message: err.to_string(),
            hint: err.hint(),
        }
    }
}

pub fn run_analyze(args: &AnalyzeArgs, config: &EngineConfig, output: OutputMode) -> Result<()> {
    let filter = args.conversation.as_deref().map(ConversationId::new);
    let events = read_feed(&args.events)?;
    let reports = run_feed(events, config, filter.as_ref())?;
    render_reports(&reports, output)
}

/// Parse a JSONL feed. Blank lines and `#` comments are skipped.
pub fn read_feed(path: &Path) -> Result<Vec<Envelope>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    parse_feed(BufReader::new(file), path)
}

fn parse_feed(reader: impl BufRead, path: &Path) -> Result<Vec<Envelope>> {
    let mut events = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line_no = index + 1;
        let line =
            line.with_context(|| format!("Failed to read {}:{line_no}", path.display()))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let envelope = Envelope::from_json_line(trimmed)
            .with_context(|| format!("Invalid event at {}:{line_no}", path.display()))?;
        events.push(envelope);
    }
    Ok(events)
}

/// Feed `events` through a fresh engine and compute each conversation once.
///
/// # Errors
///
/// Returns an error if the engine cannot start, the filtered conversation
/// never appears in the feed, or ingestion fails. Per-conversation compute
/// failures are reported, not returned.
pub fn run_feed(
    events: Vec<Envelope>,
    config: &EngineConfig,
    filter: Option<&ConversationId>,
) -> Result<Vec<ConversationReport>> {
    // Batch run: the ticker never fires, each conversation is computed
    // exactly once after the feed drains.
    let mut batch = config.clone();
    batch.scheduler.min_new_votes = u64::MAX;
    batch.scheduler.debounce_ms = u64::MAX;

    let engine = Engine::start(batch).context("Failed to start engine")?;
    let mut submitted = 0usize;
    for envelope in events {
        if filter.is_some_and(|id| *id != envelope.conversation) {
            continue;
        }
        engine.submit(envelope)?;
        submitted += 1;
    }
    engine.flush()?;

    let conversations = engine.conversations();
    if let Some(id) = filter.filter(|id| !conversations.contains(id)) {
        bail!("conversation {id} not found in feed");
    }
    info!(
        events = submitted,
        conversations = conversations.len(),
        "feed ingested"
    );

    conversations
        .into_iter()
        .map(|id| match engine.compute_now(&id) {
            Ok(state) => Ok(ConversationReport {
                conversation: id,
                state: Some(Arc::unwrap_or_clone(state)),
                error: None,
            }),
            Err(err @ EngineError::Compute(_)) => {
                warn!(conversation = %id, error = %err, "conversation not analyzed");
                Ok(ConversationReport {
                    conversation: id,
                    state: None,
                    error: Some(ErrorReport::from(&err)),
                })
            }
            Err(err) => Err(err.into()),
        })
        .collect()
}

pub fn render_reports(reports: &[ConversationReport], output: OutputMode) -> Result<()> {
    render_mode(
        output,
        reports,
        |reports, w| {
            for report in reports {
                write_text(report, w)?;
            }
            Ok(())
        },
        |reports, w| {
            for (i, report) in reports.iter().enumerate() {
                if i > 0 {
                    writeln!(w)?;
                }
                write_pretty(report, w)?;
            }
            Ok(())
        },
    )
}

fn statement_list(stats: &[StatementRepness]) -> String {
    if stats.is_empty() {
        return "-".to_string();
    }
    stats
        .iter()
        .map(|s| s.statement.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn write_text(report: &ConversationReport, w: &mut dyn Write) -> io::Result<()> {
    let id = &report.conversation;
    let Some(state) = &report.state else {
        if let Some(err) = &report.error {
            writeln!(w, "{id} error={} {}", err.code, err.message)?;
        }
        return Ok(());
    };
    writeln!(
        w,
        "{id} revision={} status={} participants={} groups={}",
        state.revision,
        state.status,
        state.participation.len(),
        state.group_count()
    )?;
    for group in &state.clusters.groups {
        let (agree, disagree) = state
            .representatives(group.id)
            .map_or_else(
                || ("-".to_string(), "-".to_string()),
                |r| (statement_list(&r.agree), statement_list(&r.disagree)),
            );
        writeln!(
            w,
            "{id} {} size={} agree={agree} disagree={disagree}",
            group.id,
            group.size()
        )?;
    }
    writeln!(
        w,
        "{id} consensus agree={} disagree={}",
        consensus_list(&state.consensus.agree),
        consensus_list(&state.consensus.disagree)
    )
}

fn consensus_list(list: &[ConsensusStatement]) -> String {
    if list.is_empty() {
        return "-".to_string();
    }
    list.iter()
        .map(|c| c.statement.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn write_repness_line(w: &mut dyn Write, label: &str, s: &StatementRepness) -> io::Result<()> {
    let (group_hits, rest_hits) = match s.direction {
        Direction::Agree => (s.agree, s.rest.agree),
        Direction::Disagree => (s.disagree, s.rest.disagree),
    };
    writeln!(
        w,
        "  {label:<9} {:<6} p={:.4} z={:>6.2} ratio={:.2}  ({group_hits}/{} vs {rest_hits}/{})",
        s.statement.to_string(),
        s.p_value,
        s.z_score,
        s.ratio,
        s.group_size,
        s.rest.total()
    )
}

fn write_pretty(report: &ConversationReport, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, &format!("Conversation {}", report.conversation))?;
    let Some(state) = &report.state else {
        if let Some(err) = &report.error {
            pretty_kv(w, "error", format!("{} {}", err.code, err.message))?;
            if let Some(hint) = err.hint {
                pretty_kv(w, "hint", hint)?;
            }
        }
        return Ok(());
    };

    pretty_kv(w, "revision", state.revision.to_string())?;
    pretty_kv(w, "status", state.status.to_string())?;
    pretty_kv(w, "participants", state.participation.len().to_string())?;
    pretty_kv(w, "statements", state.projection.statements.len().to_string())?;
    pretty_kv(w, "clustered", state.clusters.eligible.to_string())?;
    pretty_kv(w, "groups", state.group_count().to_string())?;
    if state.repness.underpowered > 0 {
        pretty_kv(w, "underpowered", state.repness.underpowered.to_string())?;
    }

    for group in &state.clusters.groups {
        writeln!(w)?;
        writeln!(w, "Group {} ({} members)", group.id, group.size())?;
        let Some(reps) = state.representatives(group.id) else {
            continue;
        };
        if reps.agree.is_empty() && reps.disagree.is_empty() {
            writeln!(w, "  no representative statements")?;
        }
        for s in &reps.agree {
            write_repness_line(w, "agree", s)?;
        }
        for s in &reps.disagree {
            write_repness_line(w, "disagree", s)?;
        }
    }

    if !state.consensus.agree.is_empty() || !state.consensus.disagree.is_empty() {
        writeln!(w)?;
        writeln!(w, "Consensus")?;
        for c in &state.consensus.agree {
            writeln!(w, "  {:<9} {:<6} score={:.3}", "agree", c.statement.to_string(), c.score)?;
        }
        for c in &state.consensus.disagree {
            writeln!(w, "  {:<9} {:<6} score={:.3}", "disagree", c.statement.to_string(), c.score)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
