//! Engine configuration.
//!
//! Every field has a default; [`EngineConfig::from_env`] overrides them from
//! `TIDAL_*` environment variables.

use tidal_core::error::{Error, Result};

/// Default number of commit attempts before a conflict is surfaced.
pub const DEFAULT_MAX_COMMIT_ATTEMPTS: usize = 5;

/// Upper bound accepted for `TIDAL_MAX_COMMIT_ATTEMPTS`.
pub const MAX_COMMIT_ATTEMPTS_LIMIT: usize = 100;

/// Engine tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Attempts to append a log entry before `ConcurrentCommitConflict`.
    pub max_commit_attempts: usize,
    /// Data files written concurrently by the local write coordinator.
    pub write_concurrency: usize,
    /// Data files read concurrently by the local read coordinator.
    pub read_concurrency: usize,
    /// Rows per data file before the writer starts a new file.
    pub target_rows_per_file: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_commit_attempts: DEFAULT_MAX_COMMIT_ATTEMPTS,
            write_concurrency: 8,
            read_concurrency: 8,
            target_rows_per_file: 1_000_000,
        }
    }
}

impl EngineConfig {
    /// Loads configuration from the process environment.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `TIDAL_MAX_COMMIT_ATTEMPTS` | 5 (1 to 100) |
    /// | `TIDAL_WRITE_CONCURRENCY` | 8 |
    /// | `TIDAL_READ_CONCURRENCY` | 8 |
    /// | `TIDAL_TARGET_ROWS_PER_FILE` | 1000000 |
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] naming the variable if a value is
    /// malformed or out of range.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Same as [`EngineConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(attempts) = env_usize(&lookup, "TIDAL_MAX_COMMIT_ATTEMPTS")? {
            if !(1..=MAX_COMMIT_ATTEMPTS_LIMIT).contains(&attempts) {
                return Err(Error::InvalidInput(format!(
                    "TIDAL_MAX_COMMIT_ATTEMPTS must be between 1 and {MAX_COMMIT_ATTEMPTS_LIMIT}, got {attempts}"
                )));
            }
            config.max_commit_attempts = attempts;
        }
        if let Some(n) = env_positive(&lookup, "TIDAL_WRITE_CONCURRENCY")? {
            config.write_concurrency = n;
        }
        if let Some(n) = env_positive(&lookup, "TIDAL_READ_CONCURRENCY")? {
            config.read_concurrency = n;
        }
        if let Some(n) = env_positive(&lookup, "TIDAL_TARGET_ROWS_PER_FILE")? {
            config.target_rows_per_file = n;
        }

        Ok(config)
    }

    /// Sets the commit attempt bound (at least 1).
    #[must_use]
    pub fn with_max_commit_attempts(mut self, attempts: usize) -> Self {
        self.max_commit_attempts = attempts.max(1);
        self
    }

    /// Sets the rows-per-file target (at least 1).
    #[must_use]
    pub fn with_target_rows_per_file(mut self, rows: usize) -> Self {
        self.target_rows_per_file = rows.max(1);
        self
    }
}

fn env_string(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_usize(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<usize>> {
    let Some(v) = env_string(lookup, name) else {
        return Ok(None);
    };
    v.parse::<usize>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} must be a usize: {e}")))
}

fn env_positive(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<usize>> {
    match env_usize(lookup, name)? {
        Some(0) => Err(Error::InvalidInput(format!("{name} must be greater than 0"))),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.max_commit_attempts, 5);
    }

    #[test]
    fn test_overrides() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("TIDAL_MAX_COMMIT_ATTEMPTS", "12"),
            ("TIDAL_WRITE_CONCURRENCY", " 2 "),
            ("TIDAL_TARGET_ROWS_PER_FILE", "1000"),
        ]))
        .unwrap();
        assert_eq!(config.max_commit_attempts, 12);
        assert_eq!(config.write_concurrency, 2);
        assert_eq!(config.read_concurrency, 8);
        assert_eq!(config.target_rows_per_file, 1000);
    }

    #[test]
    fn test_malformed_values_name_the_variable() {
        for (name, value) in [
            ("TIDAL_MAX_COMMIT_ATTEMPTS", "0"),
            ("TIDAL_MAX_COMMIT_ATTEMPTS", "101"),
            ("TIDAL_READ_CONCURRENCY", "many"),
            ("TIDAL_TARGET_ROWS_PER_FILE", "0"),
        ] {
            let err = EngineConfig::from_lookup(lookup(&[(name, value)])).unwrap_err();
            assert!(err.to_string().contains(name), "{name}={value}: {err}");
        }
    }
}
