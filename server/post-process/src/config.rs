//! Pipeline configuration with sane defaults.
//!
//! Loaded from an optional JSON file, then overridden by environment
//! variables for the two feature flags.

use serde::Deserialize;

use crate::error::PipelineError;
use crate::types::Rule;

pub const ENV_CONFIG_PATH: &str = "POST_PROCESS_CONFIG";
pub const ENV_EXPLORE_USERS: &str = "POST_PROCESS_EXPLORE_USERS";
pub const ENV_EXPLORE_CODE: &str = "POST_PROCESS_EXPLORE_CODE";

/// Feature flags, grouping and sampling knobs, logging, and the rule set.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Tag groups with the user affected by each event.
  pub explore_users: bool,
  /// Tag groups with hashed in-app filenames and functions.
  pub explore_code: bool,
  /// Max stack frames to include in fingerprint.
  pub fingerprint_max_frames: usize,
  /// Events of a group are never sampled until it has been seen this many times.
  pub sample_threshold: u64,
  /// Past the threshold, one event in `sample_rate` is kept unsampled. 0 disables sampling.
  pub sample_rate: u64,
  pub log_level: String,
  pub log_json: bool,
  pub rules: Vec<Rule>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      explore_users: true,
      explore_code: false,
      fingerprint_max_frames: 5,
      sample_threshold: 50,
      sample_rate: 10,
      log_level: "info".into(),
      log_json: false,
      rules: Vec::new(),
    }
  }
}

impl Config {
  pub fn from_json(raw: &str) -> Result<Self, PipelineError> {
    Ok(serde_json::from_str(raw)?)
  }

  /// Read the file at `path` (if any) and apply environment overrides.
  pub fn load(path: Option<&str>) -> Result<Self, PipelineError> {
    let config = match path {
      Some(path) => {
        let raw = std::fs::read_to_string(path)
          .map_err(|e| PipelineError::config(format!("read {}: {}", path, e)))?;
        Self::from_json(&raw)?
      }
      None => Self::default(),
    };
    config.with_overrides(|key| std::env::var(key).ok())
  }

  /// Apply flag overrides from `lookup` (normally the process environment).
  pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, PipelineError>
  where
    F: Fn(&str) -> Option<String>,
  {
    if let Some(v) = lookup(ENV_EXPLORE_USERS) {
      self.explore_users = parse_flag(ENV_EXPLORE_USERS, &v)?;
    }
    if let Some(v) = lookup(ENV_EXPLORE_CODE) {
      self.explore_code = parse_flag(ENV_EXPLORE_CODE, &v)?;
    }
    Ok(self)
  }

  /// Whether the `times_seen`-th event of a group is sampled (not kept in full).
  pub fn should_sample(&self, times_seen: u64) -> bool {
    if self.sample_rate == 0 || times_seen <= self.sample_threshold {
      return false;
    }
    times_seen % self.sample_rate != 0
  }
}

fn parse_flag(name: &str, raw: &str) -> Result<bool, PipelineError> {
  match raw.trim().to_ascii_lowercase().as_str() {
    "1" | "true" | "yes" | "on" => Ok(true),
    "0" | "false" | "no" | "off" | "" => Ok(false),
    other => Err(PipelineError::config(format!(
      "{}: expected a boolean, got {:?}",
      name, other
    ))),
  }
}
