use std::path::PathBuf;

use bindery_pipeline::archive::DEFAULT_UNRAR_BIN;

/// Default number of work items fetched per page.
pub const DEFAULT_PAGE_SIZE: i64 = 100;

/// Default number of items between checkpoint flushes.
pub const DEFAULT_FLUSH_EVERY: usize = 1;

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} has invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Batch engine configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Postgres connection string.
    pub database_url: String,
    /// Global gate for rename and template-rename batches.
    pub renaming_enabled: bool,
    /// Holding area for corrupt archives; quarantine is skipped when unset.
    pub quarantine_dir: Option<PathBuf>,
    /// Deleted files are moved here; when unset deletes are permanent.
    pub trash_dir: Option<PathBuf>,
    /// Parent of extraction temp dirs (system temp when unset).
    pub scratch_dir: Option<PathBuf>,
    /// `unrar` binary used for RAR archives.
    pub unrar_bin: PathBuf,
    /// Work items fetched per page.
    pub page_size: i64,
    /// Items processed between checkpoint flushes.
    pub flush_every: usize,
    /// Resume paused batches after startup recovery.
    pub resume_on_start: bool,
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default          |
    /// |------------------------|------------------|
    /// | `DATABASE_URL`         | (required)       |
    /// | `RENAMING_ENABLED`     | `true`           |
    /// | `QUARANTINE_DIR`       | unset            |
    /// | `TRASH_DIR`            | unset            |
    /// | `SCRATCH_DIR`          | system temp      |
    /// | `UNRAR_BIN`            | `unrar`          |
    /// | `BATCH_PAGE_SIZE`      | `100`            |
    /// | `PROGRESS_FLUSH_EVERY` | `1`              |
    /// | `RESUME_ON_START`      | `false`          |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let database_url = var("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let page_size = parse_number("BATCH_PAGE_SIZE", var("BATCH_PAGE_SIZE"), DEFAULT_PAGE_SIZE)?;
        let flush_every = parse_number(
            "PROGRESS_FLUSH_EVERY",
            var("PROGRESS_FLUSH_EVERY"),
            DEFAULT_FLUSH_EVERY,
        )?;

        Ok(Self {
            database_url,
            renaming_enabled: parse_bool("RENAMING_ENABLED", var("RENAMING_ENABLED"), true)?,
            quarantine_dir: var("QUARANTINE_DIR").map(PathBuf::from),
            trash_dir: var("TRASH_DIR").map(PathBuf::from),
            scratch_dir: var("SCRATCH_DIR").map(PathBuf::from),
            unrar_bin: var("UNRAR_BIN")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_UNRAR_BIN)),
            page_size,
            flush_every,
            resume_on_start: parse_bool("RESUME_ON_START", var("RESUME_ON_START"), false)?,
        })
    }
}

fn parse_bool(var: &'static str, value: Option<String>, default: bool) -> Result<bool, ConfigError> {
    let Some(value) = value else {
        return Ok(default);
    };
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var,
            value,
            reason: "expected true or false".into(),
        }),
    }
}

/// Parse a strictly positive number.
fn parse_number<T>(var: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    let Some(value) = value else {
        return Ok(default);
    };
    match value.parse::<T>() {
        Ok(n) if n > T::default() => Ok(n),
        Ok(_) => Err(ConfigError::Invalid {
            var,
            value,
            reason: "must be greater than zero".into(),
        }),
        Err(e) => Err(ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<EngineConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EngineConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_only_database_url_is_set() {
        let config = load(&[("DATABASE_URL", "postgres://localhost/bindery")]).unwrap();
        assert!(config.renaming_enabled);
        assert!(!config.resume_on_start);
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.flush_every, DEFAULT_FLUSH_EVERY);
        assert_eq!(config.unrar_bin, PathBuf::from("unrar"));
        assert!(config.trash_dir.is_none());
    }

    #[test]
    fn database_url_is_required() {
        assert_matches!(load(&[]), Err(ConfigError::Missing("DATABASE_URL")));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            ("DATABASE_URL", "postgres://db/bindery"),
            ("RENAMING_ENABLED", "off"),
            ("TRASH_DIR", "/srv/trash"),
            ("BATCH_PAGE_SIZE", "25"),
            ("PROGRESS_FLUSH_EVERY", "10"),
            ("RESUME_ON_START", "yes"),
        ])
        .unwrap();
        assert!(!config.renaming_enabled);
        assert!(config.resume_on_start);
        assert_eq!(config.trash_dir, Some(PathBuf::from("/srv/trash")));
        assert_eq!(config.page_size, 25);
        assert_eq!(config.flush_every, 10);
    }

    #[test]
    fn zero_and_garbage_numbers_are_rejected() {
        assert_matches!(
            load(&[("DATABASE_URL", "x"), ("BATCH_PAGE_SIZE", "0")]),
            Err(ConfigError::Invalid { var: "BATCH_PAGE_SIZE", .. })
        );
        assert_matches!(
            load(&[("DATABASE_URL", "x"), ("RENAMING_ENABLED", "maybe")]),
            Err(ConfigError::Invalid { var: "RENAMING_ENABLED", .. })
        );
    }
}
