//! Static engine configuration (`reel.yaml`) with environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cassette::matcher::MatchCriteria;
use crate::cassette::sanitize::SanitizeRules;
use crate::error::EngineError;

/// Config file read when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "reel.yaml";

/// Scheduling options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    /// Refuse parallel recording instead of reducing to one worker.
    pub strict: bool,
}

/// Staleness options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StalenessConfig {
    /// Fail units whose cassette is stale instead of warning.
    pub fatal: bool,
}

/// Refresh options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Default age limit for `reel refresh --max-age`.
    pub max_age_days: Option<i64>,
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding cassette files.
    pub cassette_root: PathBuf,
    /// Suite manifest listing the test units.
    pub manifest: PathBuf,
    /// Requested worker count.
    pub workers: usize,
    /// Timeout for each live request, in seconds.
    pub timeout_secs: u64,
    /// Redaction rules applied before anything is persisted.
    pub sanitize: SanitizeRules,
    /// How live requests are matched against recordings.
    pub matching: MatchCriteria,
    /// Scheduling options.
    pub scheduling: SchedulingConfig,
    /// Staleness options.
    pub staleness: StalenessConfig,
    /// Refresh options.
    pub refresh: RefreshConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cassette_root: PathBuf::from("cassettes"),
            manifest: PathBuf::from("reel-suite.yaml"),
            workers: 1,
            timeout_secs: 30,
            sanitize: SanitizeRules::recommended(),
            matching: MatchCriteria::default(),
            scheduling: SchedulingConfig::default(),
            staleness: StalenessConfig::default(),
            refresh: RefreshConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Loads `path`, or `reel.yaml` if it exists, or the defaults; then
    /// applies environment overrides.
    ///
    /// An explicitly named file must exist.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if the file cannot be read or parsed,
    /// an override is not a number, or the result fails [`Self::validate`].
    pub fn load(path: Option<&Path>) -> Result<Self, EngineError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings no run can work with.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] for a zero timeout or worker count.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.timeout_secs == 0 {
            return Err(EngineError::Config(
                "timeout_secs must be at least 1; a zero timeout fails every live request".into(),
            ));
        }
        if self.workers == 0 {
            return Err(EngineError::Config("workers must be at least 1".into()));
        }
        Ok(())
    }

    /// Parses a config file without applying overrides.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("failed to read {}: {e}", path.display())))?;
        let config: Self = serde_yaml::from_str(&content)
            .map_err(|e| EngineError::Config(format!("failed to parse {}: {e}", path.display())))?;
        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Applies `REEL_CASSETTE_ROOT`, `REEL_WORKERS`, and `REEL_TIMEOUT_SECS`
    /// as looked up by `var`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if a numeric override does not parse.
    pub fn apply_env(
        &mut self,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<(), EngineError> {
        if let Some(root) = var("REEL_CASSETTE_ROOT") {
            self.cassette_root = PathBuf::from(root);
        }
        if let Some(workers) = var("REEL_WORKERS") {
            self.workers = workers
                .parse()
                .map_err(|e| EngineError::Config(format!("REEL_WORKERS={workers}: {e}")))?;
        }
        if let Some(secs) = var("REEL_TIMEOUT_SECS") {
            self.timeout_secs = secs
                .parse()
                .map_err(|e| EngineError::Config(format!("REEL_TIMEOUT_SECS={secs}: {e}")))?;
        }
        Ok(())
    }

    /// Live request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
