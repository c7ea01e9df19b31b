//! `tally config`: the configuration the engine would run with.

use std::io::Write;

use anyhow::Result;
use tally_core::config::EngineConfig;

use crate::output::{OutputMode, render_mode};

pub fn run_config(config: &EngineConfig, output: OutputMode) -> Result<()> {
    let rendered = toml::to_string_pretty(config)?;
    render_mode(
        output,
        config,
        |config, w| {
            writeln!(
                w,
                "workers={} debounce_ms={} min_new_votes={} max_k={} min_group_size={} significance={}",
                config.scheduler.workers,
                config.scheduler.debounce_ms,
                config.scheduler.min_new_votes,
                config.clustering.max_k,
                config.clustering.min_group_size,
                config.repness.significance
            )
        },
        |_, w| write!(w, "{rendered}"),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendered_toml_reads_back() {
        let config = EngineConfig::default();
        let rendered = toml::to_string_pretty(&config).unwrap();
        assert!(rendered.contains("[scheduler]"));
        let parsed: EngineConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
