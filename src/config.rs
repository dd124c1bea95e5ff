//! Configuration file loading
//!
//! Reads an optional TOML file. Every field may be omitted and falls back to
//! its default, so an empty file is a valid configuration.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use logscope_types::{CacheConfig, TailConfig};

/// Top-level configuration
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application root; the log directory defaults to `<root>/var/log`
    pub root: Option<PathBuf>,

    /// Explicit log directory, overrides `root`
    pub log_dir: Option<PathBuf>,

    /// Explicit report directory, overrides `root`
    pub report_dir: Option<PathBuf>,

    /// Where tail state is persisted between sessions
    pub state_file: Option<PathBuf>,

    pub tail: TailConfig,

    pub cache: CacheConfig,
}

impl AppConfig {
    /// Load from `path` when given, else from the default location if it exists
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content)?;
        config.cache = config.cache.normalized();
        Ok(config)
    }

    /// `<config dir>/logscope/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("logscope").join("config.toml"))
    }

    /// Directory listed when no directory is given on the command line
    pub fn log_dir(&self) -> PathBuf {
        self.var_dir(self.log_dir.as_deref(), "log")
    }

    /// Report directory, `<root>/var/report` unless configured
    pub fn report_dir(&self) -> PathBuf {
        self.var_dir(self.report_dir.as_deref(), "report")
    }

    fn var_dir(&self, explicit: Option<&Path>, name: &str) -> PathBuf {
        if let Some(dir) = explicit {
            return expand_path(dir);
        }
        let root = self
            .root
            .as_deref()
            .map(expand_path)
            .unwrap_or_else(|| PathBuf::from("."));
        root.join("var").join(name)
    }

    /// Tail state file, `~/.logscope/state.json` unless configured
    pub fn state_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.state_file {
            return Some(expand_path(path));
        }
        let home = dirs::home_dir()?;
        Some(home.join(".logscope").join("state.json"))
    }
}

/// Expand a leading `~` to the home directory
pub fn expand_path(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logscope_types::{PollInterval, ResumeMode};
    use tempfile::TempDir;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.tail, TailConfig::default());
        assert_eq!(config.cache, CacheConfig::default());
        assert_eq!(config.log_dir(), PathBuf::from("./var/log"));
        assert_eq!(config.report_dir(), PathBuf::from("./var/report"));
    }

    #[test]
    fn test_parse_full_config() {
        let config = AppConfig::parse(
            r#"
root = "/srv/shop"
state_file = "/tmp/logscope-state.json"

[tail]
poll_interval = "1s"
persist_across_sessions = true
resume_mode = "offset"

[cache]
max_entries = 0
max_file_size_bytes = 2048
log_statistics = true
"#,
        )
        .unwrap();

        assert_eq!(config.log_dir(), PathBuf::from("/srv/shop/var/log"));
        assert_eq!(config.state_path(), Some(PathBuf::from("/tmp/logscope-state.json")));
        assert_eq!(config.tail.poll_interval, PollInterval::Sec1);
        assert!(config.tail.persist_across_sessions);
        assert_eq!(config.tail.resume_mode, ResumeMode::Offset);
        assert_eq!(config.tail.max_tailed_files, 5);
        assert_eq!(config.cache.max_entries, CacheConfig::DEFAULT_MAX_ENTRIES);
        assert_eq!(config.cache.max_file_size_bytes, 2048);
        assert!(config.cache.log_statistics);
    }

    #[test]
    fn test_unknown_poll_interval_falls_back() {
        let config = AppConfig::parse("[tail]\npoll_interval = \"sometimes\"\n").unwrap();
        assert_eq!(config.tail.poll_interval, PollInterval::Ms500);
    }

    #[test]
    fn test_log_dir_overrides_root() {
        let config = AppConfig::parse("root = \"/srv/shop\"\nlog_dir = \"/var/log/shop\"\n").unwrap();
        assert_eq!(config.log_dir(), PathBuf::from("/var/log/shop"));
        assert_eq!(config.report_dir(), PathBuf::from("/srv/shop/var/report"));
    }

    #[test]
    fn test_report_dir_overrides_root() {
        let config =
            AppConfig::parse("root = \"/srv/shop\"\nreport_dir = \"/tmp/reports\"\n").unwrap();
        assert_eq!(config.report_dir(), PathBuf::from("/tmp/reports"));
        assert_eq!(config.log_dir(), PathBuf::from("/srv/shop/var/log"));
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[tail]\nmax_tailed_files = 2\n").unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.tail.max_tailed_files, 2);
    }

    #[test]
    fn test_load_invalid_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[tail\n").unwrap();
        assert!(AppConfig::load(Some(&path)).is_err());
        assert!(AppConfig::load(Some(&dir.path().join("missing.toml"))).is_err());
    }

    #[test]
    fn test_expand_path_absolute() {
        assert_eq!(expand_path(Path::new("/var/log")), PathBuf::from("/var/log"));
    }
}
