use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::model::SourceType;
use crate::shortcuts::{default_shortcuts, ShortcutEntry};
use crate::sources::SearchFilters;

pub const HOME_ENV: &str = "LAUNCHSEARCH_HOME";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write config '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid toml in '{path}': {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid json5 in '{path}': {source}")]
    Json5 {
        path: PathBuf,
        #[source]
        source: json5::Error,
    },
    #[error("failed to encode config: {0}")]
    Encode(#[from] toml::ser::Error),
    #[error("{0}")]
    Invalid(String),
}

/// Minimum trimmed query length, in characters, before a source is queried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinQueryLength {
    pub apps: usize,
    pub app_shortcuts: usize,
    pub contacts: usize,
    pub files: usize,
    pub settings: usize,
}

impl Default for MinQueryLength {
    fn default() -> Self {
        Self {
            apps: 1,
            app_shortcuts: 1,
            contacts: 2,
            files: 2,
            settings: 1,
        }
    }
}

impl MinQueryLength {
    pub fn for_source(&self, source: SourceType) -> usize {
        match source {
            SourceType::App => self.apps,
            SourceType::AppShortcut => self.app_shortcuts,
            SourceType::Contact => self.contacts,
            SourceType::File => self.files,
            SourceType::Setting => self.settings,
        }
    }

    fn max(&self) -> usize {
        SourceType::ALL
            .into_iter()
            .map(|source| self.for_source(source))
            .max()
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file_enabled: bool,
    pub logs_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_enabled: false,
            logs_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub max_results_per_section: usize,
    pub min_query_length: MinQueryLength,
    pub sort_by_usage: bool,
    pub debounce_ms: u64,
    pub settle_timeout_ms: u64,
    pub worker_threads: usize,
    pub skip_after_empty_prefix: bool,
    pub suggestion_count: usize,
    pub filters: SearchFilters,
    pub file_roots: Vec<PathBuf>,
    pub file_scan_depth: usize,
    pub preferences_db_path: PathBuf,
    pub shortcuts: Vec<ShortcutEntry>,
    pub logging: LoggingConfig,
    #[serde(skip)]
    pub config_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let base = stable_app_data_dir();
        Self {
            max_results_per_section: 20,
            min_query_length: MinQueryLength::default(),
            sort_by_usage: false,
            debounce_ms: 150,
            settle_timeout_ms: 2_000,
            worker_threads: 4,
            skip_after_empty_prefix: false,
            suggestion_count: 8,
            filters: SearchFilters::default(),
            file_roots: Vec::new(),
            file_scan_depth: 4,
            preferences_db_path: base.join("preferences.sqlite3"),
            shortcuts: default_shortcuts(),
            logging: LoggingConfig::default(),
            config_path: base.join("config.toml"),
        }
    }
}

pub fn stable_app_data_dir() -> PathBuf {
    match std::env::var_os(HOME_ENV) {
        Some(value) if !value.is_empty() => PathBuf::from(value),
        _ => std::env::temp_dir().join("launchsearch"),
    }
}

pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.max_results_per_section == 0 || cfg.max_results_per_section > 200 {
        return Err(ConfigError::Invalid(
            "max_results_per_section must be between 1 and 200".into(),
        ));
    }

    if cfg.worker_threads == 0 || cfg.worker_threads > 32 {
        return Err(ConfigError::Invalid(
            "worker_threads must be between 1 and 32".into(),
        ));
    }

    if cfg.min_query_length.max() > 8 {
        return Err(ConfigError::Invalid(
            "min_query_length values must be at most 8".into(),
        ));
    }

    if cfg.debounce_ms > 2_000 {
        return Err(ConfigError::Invalid("debounce_ms must be at most 2000".into()));
    }

    if cfg.file_scan_depth == 0 {
        return Err(ConfigError::Invalid("file_scan_depth must be at least 1".into()));
    }

    if cfg.preferences_db_path.as_os_str().is_empty() {
        return Err(ConfigError::Invalid("preferences_db_path is required".into()));
    }

    Ok(())
}

pub fn default_config_path() -> PathBuf {
    stable_app_data_dir().join("config.toml")
}

/// Loads the config at `path` (or the default location); a missing file yields defaults.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        let cfg = Config {
            config_path: path,
            ..Config::default()
        };
        validate(&cfg)?;
        return Ok(cfg);
    }

    let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;
    let mut cfg = parse(&raw, &path)?;
    cfg.config_path = path;
    validate(&cfg)?;
    Ok(cfg)
}

fn parse(raw: &str, path: &Path) -> Result<Config, ConfigError> {
    let extension = path
        .extension()
        .and_then(|value| value.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match extension.as_str() {
        "json" | "json5" => json5::from_str(raw).map_err(|source| ConfigError::Json5 {
            path: path.to_path_buf(),
            source,
        }),
        _ => toml::from_str(raw).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        }),
    }
}

pub fn save(cfg: &Config) -> Result<(), ConfigError> {
    let encoded = toml::to_string_pretty(cfg)?;
    if let Some(parent) = cfg.config_path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    std::fs::write(&cfg.config_path, encoded).map_err(|source| ConfigError::Write {
        path: cfg.config_path.clone(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::{parse, MinQueryLength};
    use crate::model::SourceType;
    use std::path::Path;

    #[test]
    fn parses_partial_toml_over_defaults() {
        let cfg = parse(
            "sort_by_usage = true\n[min_query_length]\ncontacts = 3\n",
            Path::new("config.toml"),
        )
        .expect("toml should parse");
        assert!(cfg.sort_by_usage);
        assert_eq!(cfg.min_query_length.contacts, 3);
        assert_eq!(cfg.min_query_length.files, 2);
        assert_eq!(cfg.max_results_per_section, 20);
    }

    #[test]
    fn parses_json5_with_comments() {
        let cfg = parse(
            "{ // trailing commas and comments are fine\n worker_threads: 2, }",
            Path::new("config.json5"),
        )
        .expect("json5 should parse");
        assert_eq!(cfg.worker_threads, 2);
    }

    #[test]
    fn min_query_length_defaults_gate_slow_sources_harder() {
        let lengths = MinQueryLength::default();
        assert_eq!(lengths.for_source(SourceType::App), 1);
        assert_eq!(lengths.for_source(SourceType::Contact), 2);
        assert_eq!(lengths.for_source(SourceType::File), 2);
    }
}
