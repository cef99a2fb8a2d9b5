//! Replay configuration
//!
//! Loaded from an optional TOML file and overridden by command line flags.
//! Defaults reproduce what the tracer's analysis script has always reported:
//! one global lock stack, permissive rwlocks, abort on unknown records.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Upper bound on `histogram_buckets`; every histogram allocates this many slots
pub const MAX_HISTOGRAM_BUCKETS: usize = 1000;

/// What to do with a record whose action cannot be parsed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordPolicy {
    /// Stop the run with a diagnostic naming the record
    #[default]
    Abort,
    /// Log the record and continue with the next one
    Skip,
}

/// How currently-held locks are grouped for nesting-order analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockStackScope {
    /// One stack shared by every thread (what the tracer analyzer has always reported)
    #[default]
    Global,
    /// One stack per thread id
    PerThread,
}

/// How strictly rwlock holders are checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RwLockPolicy {
    /// Only a thread re-acquiring a rwlock it already holds is reported
    #[default]
    Permissive,
    /// Additionally report writers overlapping with other holders
    Exclusive,
}

/// Configuration for one replay run
///
/// # Example
/// ```
/// use lockreplay::config::ReplayConfig;
///
/// let config = ReplayConfig::default();
/// assert_eq!(config.max_lock_stack_depth, 1024);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Lock stacks deeper than this stop being recorded
    pub max_lock_stack_depth: usize,

    /// Handling of unrecognized records
    pub unknown_records: RecordPolicy,

    pub lock_stack_scope: LockStackScope,

    pub rwlock_policy: RwLockPolicy,

    /// Treat same-thread re-locking of a recursive mutex as nesting instead of
    /// a double lock
    pub allow_recursive_reentry: bool,

    /// Include the lock stack frequency table in the report
    pub include_lock_stacks: bool,

    /// Number of equal-width buckets in the hold duration histograms
    pub histogram_buckets: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            max_lock_stack_depth: 1024,
            unknown_records: RecordPolicy::Abort,
            lock_stack_scope: LockStackScope::Global,
            rwlock_policy: RwLockPolicy::Permissive,
            allow_recursive_reentry: true,
            include_lock_stacks: false,
            histogram_buckets: 10,
        }
    }
}

impl ReplayConfig {
    /// Every check enabled: per-thread stacks, writer exclusivity, no recursive
    /// re-entry allowance
    pub fn strict() -> Self {
        Self {
            lock_stack_scope: LockStackScope::PerThread,
            rwlock_policy: RwLockPolicy::Exclusive,
            allow_recursive_reentry: false,
            ..Self::default()
        }
    }

    /// Skip records that cannot be parsed instead of aborting
    pub fn lenient() -> Self {
        Self {
            unknown_records: RecordPolicy::Skip,
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file
    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).with_context(|| {
            format!("Failed to read config file: {}", path.as_ref().display())
        })?;

        let config: Self =
            toml::from_str(&content).with_context(|| "Failed to parse TOML replay config")?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_lock_stack_depth == 0 {
            return Err("max_lock_stack_depth must be >= 1, got 0".to_string());
        }

        if self.histogram_buckets == 0 {
            return Err("histogram_buckets must be >= 1, got 0".to_string());
        }

        if self.histogram_buckets > MAX_HISTOGRAM_BUCKETS {
            return Err(format!(
                "histogram_buckets must be <= {}, got {}",
                MAX_HISTOGRAM_BUCKETS, self.histogram_buckets
            ));
        }

        Ok(())
    }
}
