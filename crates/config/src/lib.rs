//! Kit configuration
//!
//! Loaded from a YAML file named by `ORGKIT_CONFIG_FILE`, or else from the
//! defaults overridden by individual `ORGKIT_*` environment variables.

use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use orgkit_core::{Pct, PCT_BASE};

/// Errors that can occur in configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidEnvVar(String, String),

    #[error("Failed to read file: {0}")]
    FileReadError(String),

    #[error("Failed to parse YAML: {0}")]
    YamlParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Support required by the supermajority engine (two thirds)
pub const SUPERMAJORITY_SUPPORT: Pct = Pct::from_raw(666_666_666_666_666_666);

/// Voting requirements of one engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingParams {
    #[serde(default = "default_support")]
    pub support_required: Pct,
    #[serde(default)]
    pub min_accept_quorum: Pct,
}

impl VotingParams {
    fn validate(&self, engine: &str) -> ConfigResult<()> {
        if self.support_required.raw() >= PCT_BASE || self.support_required < self.min_accept_quorum {
            return Err(ConfigError::Invalid(format!(
                "{}: support {} must be below 100% and at least quorum {}",
                engine, self.support_required, self.min_accept_quorum
            )));
        }
        Ok(())
    }
}

impl Default for VotingParams {
    fn default() -> Self {
        Self {
            support_required: default_support(),
            min_accept_quorum: Pct::ZERO,
        }
    }
}

/// A token-holding cohort with its own voting engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CohortConfig {
    pub token_name: String,
    pub token_symbol: String,
    #[serde(default)]
    pub voting: VotingParams,
}

/// Main kit configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KitConfig {
    /// Name-service domain application packages are published under
    #[serde(default = "default_registry_domain")]
    pub registry_domain: String,
    #[serde(default = "default_membership")]
    pub membership: CohortConfig,
    #[serde(default = "default_supermajority")]
    pub supermajority: VotingParams,
    #[serde(default = "default_council")]
    pub council: CohortConfig,
    /// Vote duration of every engine unless both overrides are set
    #[serde(default = "default_vote_duration")]
    pub vote_duration: u64,
    #[serde(default)]
    pub membership_vote_duration: Option<u64>,
    #[serde(default)]
    pub supermajority_vote_duration: Option<u64>,
    /// Accounting period of the finance app, in seconds
    #[serde(default = "default_finance_period")]
    pub finance_period: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_support() -> Pct {
    Pct::from_percent(50)
}

fn default_registry_domain() -> String {
    "orgkit.pkg".to_string()
}

fn default_membership() -> CohortConfig {
    CohortConfig {
        token_name: "Membership Token".to_string(),
        token_symbol: "MEMB".to_string(),
        voting: VotingParams::default(),
    }
}

fn default_supermajority() -> VotingParams {
    VotingParams {
        support_required: SUPERMAJORITY_SUPPORT,
        min_accept_quorum: Pct::ZERO,
    }
}

fn default_council() -> CohortConfig {
    CohortConfig {
        token_name: "Council Token".to_string(),
        token_symbol: "CNCL".to_string(),
        voting: VotingParams::default(),
    }
}

fn default_vote_duration() -> u64 {
    48 * 60 * 60
}

fn default_finance_period() -> u64 {
    30 * 24 * 60 * 60
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Resolved vote durations of the three engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteDurations {
    pub membership: u64,
    pub supermajority: u64,
    pub council: u64,
}

impl Default for KitConfig {
    fn default() -> Self {
        Self {
            registry_domain: default_registry_domain(),
            membership: default_membership(),
            supermajority: default_supermajority(),
            council: default_council(),
            vote_duration: default_vote_duration(),
            membership_vote_duration: None,
            supermajority_vote_duration: None,
            finance_period: default_finance_period(),
            log_level: default_log_level(),
        }
    }
}

impl KitConfig {
    /// Load configuration from the environment
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through a variable lookup function
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("ORGKIT_CONFIG_FILE") {
            if Path::new(&path).exists() {
                return Self::from_file(&path);
            }
            debug!(path = %path, "Config file not found, using environment");
        }

        let mut config = Self::default();
        if let Some(domain) = lookup("ORGKIT_REGISTRY_DOMAIN") {
            config.registry_domain = domain;
        }
        if let Some(level) = lookup("ORGKIT_LOG_LEVEL") {
            config.log_level = level;
        }
        if let Some(v) = parse_var(&lookup, "ORGKIT_VOTE_DURATION")? {
            config.vote_duration = v;
        }
        if let Some(v) = parse_var(&lookup, "ORGKIT_FINANCE_PERIOD")? {
            config.finance_period = v;
        }
        config.membership_vote_duration = parse_var(&lookup, "ORGKIT_MEMBERSHIP_VOTE_DURATION")?;
        config.supermajority_vote_duration = parse_var(&lookup, "ORGKIT_SUPERMAJORITY_VOTE_DURATION")?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    pub fn from_file(path: &str) -> ConfigResult<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| ConfigError::FileReadError(format!("Failed to read {}: {}", path, e)))?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml(contents: &str) -> ConfigResult<Self> {
        let config: KitConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Render as YAML
    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Check voting requirements, vote durations and the registry domain
    ///
    /// Zero durations are rejected, overrides included.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.registry_domain.is_empty() {
            return Err(ConfigError::Invalid("registry_domain is empty".to_string()));
        }
        if self.finance_period == 0 {
            return Err(ConfigError::Invalid("finance_period must be positive".to_string()));
        }
        let durations = [
            ("vote_duration", Some(self.vote_duration)),
            ("membership_vote_duration", self.membership_vote_duration),
            ("supermajority_vote_duration", self.supermajority_vote_duration),
        ];
        for (key, value) in durations {
            if value == Some(0) {
                return Err(ConfigError::Invalid(format!("{} must be positive", key)));
            }
        }
        self.membership.voting.validate("membership")?;
        self.supermajority.validate("supermajority")?;
        self.council.voting.validate("council")?;
        Ok(())
    }

    /// Vote durations per engine
    ///
    /// When both overrides are positive, membership and council votes last
    /// `membership_vote_duration` and supermajority votes last
    /// `supermajority_vote_duration`; otherwise every engine uses
    /// `vote_duration`.
    pub fn vote_durations(&self) -> VoteDurations {
        match (self.membership_vote_duration, self.supermajority_vote_duration) {
            (Some(membership), Some(supermajority)) if membership > 0 && supermajority > 0 => VoteDurations {
                membership,
                supermajority,
                council: membership,
            },
            _ => VoteDurations {
                membership: self.vote_duration,
                supermajority: self.vote_duration,
                council: self.vote_duration,
            },
        }
    }
}

fn parse_var<F>(lookup: &F, key: &str) -> ConfigResult<Option<u64>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string())),
        None => Ok(None),
    }
}
