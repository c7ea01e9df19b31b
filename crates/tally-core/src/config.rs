use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Full engine configuration, loaded from TOML.
///
/// Every section and field has a default, so an empty file (or no file at
/// all) yields [`EngineConfig::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub pca: PcaConfig,
    #[serde(default)]
    pub clustering: ClusterConfig,
    #[serde(default)]
    pub repness: RepnessConfig,
    #[serde(default)]
    pub consensus: ConsensusConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PcaConfig {
    /// Stop when the cosine distance between successive iterates drops
    /// below this value.
    #[serde(default = "default_pca_tolerance")]
    pub tolerance: f64,
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,
    /// Scale each projection by `sqrt(C / votes_cast)`. Off by default: the
    /// plain projection is the centered row dotted with each component.
    #[serde(default)]
    pub scale_sparse_voters: bool,
}

impl Default for PcaConfig {
    fn default() -> Self {
        Self {
            tolerance: default_pca_tolerance(),
            max_iter: default_max_iter(),
            scale_sparse_voters: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_max_k")]
    pub max_k: usize,
    /// Votes a participant needs to be clustered. Capped at the number of
    /// statements in the snapshot.
    #[serde(default = "default_min_votes")]
    pub min_votes: usize,
    #[serde(default = "default_min_group_size")]
    pub min_group_size: usize,
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,
    /// Silhouette a split must exceed before it beats a single group.
    #[serde(default = "default_silhouette_margin")]
    pub silhouette_margin: f64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            max_k: default_max_k(),
            min_votes: default_min_votes(),
            min_group_size: default_min_group_size(),
            max_iter: default_max_iter(),
            silhouette_margin: default_silhouette_margin(),
        }
    }
}

/// Which significance test the representativeness analyzer runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TestFamily {
    /// Fisher's exact test for small cells, z-test otherwise.
    #[default]
    Adaptive,
    ZTest,
    FisherExact,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepnessConfig {
    /// Votes a group needs on a statement before it can be ranked.
    #[serde(default = "default_min_group_votes")]
    pub min_group_votes: u32,
    #[serde(default = "default_significance")]
    pub significance: f64,
    /// Statements kept per direction per group.
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    /// Adaptive mode switches to the exact test when any 2x2 cell is below
    /// this count.
    #[serde(default = "default_exact_test_below")]
    pub exact_test_below: u32,
    #[serde(default)]
    pub test: TestFamily,
}

impl Default for RepnessConfig {
    fn default() -> Self {
        Self {
            min_group_votes: default_min_group_votes(),
            significance: default_significance(),
            top_n: default_top_n(),
            exact_test_below: default_exact_test_below(),
            test: TestFamily::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusConfig {
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    /// Smoothed probability every group must exceed.
    #[serde(default = "default_min_agree")]
    pub min_agree: f64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
            min_agree: default_min_agree(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Minimum time between two triggers for the same conversation.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Accumulated changes that trigger a computation regardless of the
    /// debounce interval.
    #[serde(default = "default_min_new_votes")]
    pub min_new_votes: u64,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_ingest_capacity")]
    pub ingest_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            debounce_ms: default_debounce_ms(),
            min_new_votes: default_min_new_votes(),
            tick_ms: default_tick_ms(),
            ingest_capacity: default_ingest_capacity(),
        }
    }
}

impl SchedulerConfig {
    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    #[must_use]
    pub const fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

const fn default_pca_tolerance() -> f64 {
    1e-6
}

const fn default_max_iter() -> usize {
    100
}

const fn default_max_k() -> usize {
    5
}

const fn default_min_votes() -> usize {
    7
}

const fn default_min_group_size() -> usize {
    3
}

const fn default_silhouette_margin() -> f64 {
    0.25
}

const fn default_min_group_votes() -> u32 {
    5
}

const fn default_significance() -> f64 {
    0.05
}

const fn default_top_n() -> usize {
    5
}

const fn default_exact_test_below() -> u32 {
    5
}

const fn default_min_agree() -> f64 {
    0.6
}

const fn default_workers() -> usize {
    4
}

const fn default_debounce_ms() -> u64 {
    2_000
}

const fn default_min_new_votes() -> u64 {
    50
}

const fn default_tick_ms() -> u64 {
    100
}

const fn default_ingest_capacity() -> usize {
    1_024
}

impl EngineConfig {
    /// Reject values no run could use.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if !(self.pca.tolerance > 0.0) {
            bail!("pca.tolerance must be > 0");
        }
        if self.pca.max_iter == 0 {
            bail!("pca.max_iter must be > 0");
        }
        if self.clustering.max_k < 2 {
            bail!("clustering.max_k must be >= 2");
        }
        if self.clustering.min_group_size == 0 {
            bail!("clustering.min_group_size must be > 0");
        }
        if self.clustering.max_iter == 0 {
            bail!("clustering.max_iter must be > 0");
        }
        if !(self.repness.significance > 0.0 && self.repness.significance < 1.0) {
            bail!("repness.significance must be in (0, 1)");
        }
        if !(self.consensus.min_agree >= 0.0 && self.consensus.min_agree < 1.0) {
            bail!("consensus.min_agree must be in [0, 1)");
        }
        if self.scheduler.workers == 0 {
            bail!("scheduler.workers must be > 0");
        }
        if self.scheduler.tick_ms == 0 {
            bail!("scheduler.tick_ms must be > 0");
        }
        if self.scheduler.ingest_capacity == 0 {
            bail!("scheduler.ingest_capacity must be > 0");
        }
        Ok(())
    }

    /// Apply `TALLY_WORKERS`, `TALLY_DEBOUNCE_MS` and `TALLY_MIN_NEW_VOTES`.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(workers) = parse_override::<usize>(&lookup, "TALLY_WORKERS") {
            self.scheduler.workers = workers;
        }
        if let Some(debounce) = parse_override::<u64>(&lookup, "TALLY_DEBOUNCE_MS") {
            self.scheduler.debounce_ms = debounce;
        }
        if let Some(min_new) = parse_override::<u64>(&lookup, "TALLY_MIN_NEW_VOTES") {
            self.scheduler.min_new_votes = min_new;
        }
        self
    }
}

fn parse_override<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    let parsed = raw.trim().parse::<T>().ok();
    if parsed.is_none() {
        tracing::warn!(key, value = %raw, "ignoring unparsable override");
    }
    parsed
}

/// Load an [`EngineConfig`] from a TOML file.
///
/// A missing file yields the defaults.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read, parsed, or
/// fails [`EngineConfig::validate`].
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        return Ok(EngineConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let config = toml::from_str::<EngineConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    config
        .validate()
        .with_context(|| format!("Invalid config in {}", path.display()))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert!((config.pca.tolerance - 1e-6).abs() < f64::EPSILON);
        assert_eq!(config.pca.max_iter, 100);
        assert_eq!(config.clustering.min_votes, 7);
        assert_eq!(config.repness.min_group_votes, 5);
        assert_eq!(config.repness.test, TestFamily::Adaptive);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("tally.toml")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tally.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[clustering]\nmax_k = 3\n\n[repness]\ntest = \"fisher_exact\"\ntop_n = 8"
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.clustering.max_k, 3);
        assert_eq!(config.clustering.min_votes, 7);
        assert_eq!(config.repness.test, TestFamily::FisherExact);
        assert_eq!(config.repness.top_n, 8);
        assert_eq!(config.scheduler, SchedulerConfig::default());
    }

    #[test]
    fn malformed_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tally.toml");
        std::fs::write(&path, "[pca\ntolerance = ").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("tally.toml"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tally.toml");
        std::fs::write(&path, "[repness]\nsignificance = 1.5\n").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("significance"));
    }

    #[test]
    fn validate_rejects_zero_workers() {
        let mut config = EngineConfig::default();
        config.scheduler.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn overrides_apply_and_ignore_garbage() {
        let vars: HashMap<&str, &str> = [
            ("TALLY_WORKERS", "8"),
            ("TALLY_DEBOUNCE_MS", "soon"),
            ("TALLY_MIN_NEW_VOTES", " 10 "),
        ]
        .into_iter()
        .collect();

        let config = EngineConfig::default()
            .with_overrides(|key| vars.get(key).map(|v| (*v).to_string()));
        assert_eq!(config.scheduler.workers, 8);
        assert_eq!(config.scheduler.debounce_ms, 2_000);
        assert_eq!(config.scheduler.min_new_votes, 10);
    }
}
