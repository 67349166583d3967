//! Build configuration.
//!
//! Defaults can be overridden from the environment:
//!
//! - `STARFORGE_PARALLELISM`: maximum concurrent asset tasks
//! - `STARFORGE_ENGINE_SHA`: engine sha used for cache invalidation

use std::time::Duration;

use tracing::warn;

use crate::consts::{DEFAULT_DEBOUNCE_MS, DEFAULT_PARALLELISM};

pub const PARALLELISM_ENV: &str = "STARFORGE_PARALLELISM";
pub const ENGINE_SHA_ENV: &str = "STARFORGE_ENGINE_SHA";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfig {
  /// Maximum number of asset tasks running at once.
  pub parallelism: usize,

  /// Quiet period the file watcher waits for after the first event.
  pub debounce: Duration,

  /// Overrides the engine sha otherwise taken from the manifest or git.
  pub engine_sha: Option<String>,
}

impl Default for BuildConfig {
  fn default() -> Self {
    Self {
      parallelism: DEFAULT_PARALLELISM,
      debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
      engine_sha: None,
    }
  }
}

impl BuildConfig {
  /// Defaults with environment overrides applied.
  pub fn from_env() -> Self {
    let mut config = Self::default();

    if let Ok(value) = std::env::var(PARALLELISM_ENV) {
      match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => config.parallelism = n,
        _ => warn!(
          var = PARALLELISM_ENV,
          value = %value,
          default = DEFAULT_PARALLELISM,
          "ignoring invalid parallelism"
        ),
      }
    }

    if let Ok(sha) = std::env::var(ENGINE_SHA_ENV) {
      let sha = sha.trim();
      if !sha.is_empty() {
        config.engine_sha = Some(sha.to_string());
      }
    }

    config
  }
}
