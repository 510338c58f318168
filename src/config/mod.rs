//! Node configuration.
//!
//! Values come from three layers, highest priority first:
//!
//! 1. command-line flags
//! 2. the node config file (positional argument)
//! 3. built-in defaults
//!
//! # Config file
//!
//! ```toml
//! pages-dir = "~/nomad/pages"
//! files-dir = "~/nomad/files"
//! node-name = "My Node"
//! announce-interval = 360       # minutes
//! identity-dir = "~/nomad/node-config"
//! page-refresh-interval = 0     # seconds, 0 disables
//! file-refresh-interval = 0
//! log-level = "INFO"
//! stats-file = "~/nomad/stats.json"
//! script-timeout = 30           # seconds, 0 for none
//! interface = "127.0.0.1"
//! port = 4280
//! ```
//!
//! Unknown keys are reported and ignored.
//!
//! A file that is not valid TOML is read as plain `key = value` lines with
//! the same keys and no quoting. `#` starts a comment line. Malformed lines
//! and unparsable values are skipped with a warning, keeping the default.

mod error;

pub use error::ConfigError;

use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::cli::Cli;
use crate::logger::LogLevel;
use crate::warn;

/// Fully resolved node settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct NodeConfig {
    pub pages_dir: PathBuf,
    pub files_dir: PathBuf,
    pub node_name: Option<String>,
    /// Minutes
    pub announce_interval: u64,
    pub identity_dir: PathBuf,
    /// Seconds, 0 disables
    pub page_refresh_interval: u64,
    /// Seconds, 0 disables
    pub file_refresh_interval: u64,
    pub log_level: LogLevel,
    pub stats_file: Option<PathBuf>,
    /// Seconds, 0 for none
    pub script_timeout: u64,
    pub interface: IpAddr,
    pub port: u16,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            pages_dir: PathBuf::from("pages"),
            files_dir: PathBuf::from("files"),
            node_name: None,
            announce_interval: 360,
            identity_dir: PathBuf::from("node-config"),
            page_refresh_interval: 0,
            file_refresh_interval: 0,
            log_level: LogLevel::Info,
            stats_file: None,
            script_timeout: 30,
            interface: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 4280,
        }
    }
}

impl NodeConfig {
    /// Build the configuration for this run from the CLI and the optional
    /// config file, then resolve paths and validate.
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut config = match &cli.node_config {
            Some(path) => Self::from_path(path)?,
            None => Self::default(),
        };
        config.apply_cli(cli);

        let cwd = std::env::current_dir().context("failed to get current working directory")?;
        config.resolve_paths(&cwd);
        config.validate()?;
        Ok(config)
    }

    /// Load a config file, warning about unknown keys.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path).map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;

        let (config, ignored) = match Self::parse_with_ignored(&content) {
            Ok(parsed) => parsed,
            Err(ConfigError::Toml(err)) => {
                warn!("config"; "{} is not TOML ({}), reading as key=value lines",
                    path.display(), err.message());
                Self::parse_plain(&content, path)
            }
            Err(err) => return Err(err),
        };
        if !ignored.is_empty() {
            warn!("config"; "ignoring unknown keys in {}: {}", path.display(), ignored.join(", "));
        }
        Ok(config)
    }

    /// Parse TOML content, collecting any unknown keys.
    fn parse_with_ignored(content: &str) -> Result<(Self, Vec<String>), ConfigError> {
        let mut ignored = Vec::new();
        let deserializer = toml::Deserializer::new(content);
        let config = serde_ignored::deserialize(deserializer, |path: serde_ignored::Path| {
            ignored.push(path.to_string());
        })?;
        Ok((config, ignored))
    }

    /// Parse plain `key = value` lines. Never fails: bad lines and values
    /// are reported and skipped.
    fn parse_plain(content: &str, path: &Path) -> (Self, Vec<String>) {
        let mut config = Self::default();
        let mut ignored = Vec::new();

        for (number, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                warn!("config"; "invalid config line {} in {}: {}", number + 1, path.display(), line);
                continue;
            };
            let (key, value) = (key.trim(), value.trim());
            if key.is_empty() || value.is_empty() {
                continue;
            }
            if let Err(reason) = config.set_plain(key, value) {
                match reason {
                    PlainError::UnknownKey => ignored.push(key.to_owned()),
                    PlainError::BadValue(expected) => warn!("config";
                        "invalid {} value for {}: {}, using default", expected, key, value),
                }
            }
        }
        (config, ignored)
    }

    fn set_plain(&mut self, key: &str, value: &str) -> Result<(), PlainError> {
        fn parse<T: std::str::FromStr>(value: &str, expected: &'static str) -> Result<T, PlainError> {
            value.parse().map_err(|_| PlainError::BadValue(expected))
        }

        match key {
            "pages-dir" => self.pages_dir = PathBuf::from(value),
            "files-dir" => self.files_dir = PathBuf::from(value),
            "identity-dir" => self.identity_dir = PathBuf::from(value),
            "stats-file" => self.stats_file = Some(PathBuf::from(value)),
            "node-name" => self.node_name = Some(value.to_owned()),
            "announce-interval" => self.announce_interval = parse(value, "int")?,
            "page-refresh-interval" => self.page_refresh_interval = parse(value, "int")?,
            "file-refresh-interval" => self.file_refresh_interval = parse(value, "int")?,
            "script-timeout" => self.script_timeout = parse(value, "int")?,
            "port" => self.port = parse(value, "port")?,
            "interface" => self.interface = parse(value, "address")?,
            "log-level" => {
                self.log_level = LogLevel::try_from(value.to_owned())
                    .map_err(|_| PlainError::BadValue("log level"))?;
            }
            _ => return Err(PlainError::UnknownKey),
        }
        Ok(())
    }

    /// Overlay explicitly given flags.
    fn apply_cli(&mut self, cli: &Cli) {
        macro_rules! overlay {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = &cli.$field {
                    self.$field = value.clone();
                })*
            };
        }
        overlay!(
            pages_dir,
            files_dir,
            announce_interval,
            identity_dir,
            page_refresh_interval,
            file_refresh_interval,
            log_level,
            script_timeout,
            interface,
            port,
        );

        if cli.node_name.is_some() {
            self.node_name.clone_from(&cli.node_name);
        }
        if cli.stats_file.is_some() {
            self.stats_file.clone_from(&cli.stats_file);
        }
    }

    /// Expand `~` and make relative paths absolute against `cwd`.
    fn resolve_paths(&mut self, cwd: &Path) {
        self.pages_dir = resolve_path(&self.pages_dir, cwd);
        self.files_dir = resolve_path(&self.files_dir, cwd);
        self.identity_dir = resolve_path(&self.identity_dir, cwd);
        if let Some(stats) = &self.stats_file {
            self.stats_file = Some(resolve_path(stats, cwd));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.announce_interval == 0 {
            return Err(ConfigError::Validation(
                "announce-interval must be at least 1 minute".into(),
            ));
        }
        for (key, dir) in [("pages-dir", &self.pages_dir), ("files-dir", &self.files_dir)] {
            if !dir.is_dir() {
                return Err(ConfigError::Validation(format!(
                    "{key} `{}` does not exist or is not a directory",
                    dir.display()
                )));
            }
        }
        if let Some(name) = &self.node_name
            && name.trim().is_empty()
        {
            return Err(ConfigError::Validation("node-name must not be blank".into()));
        }
        Ok(())
    }

    pub fn announce_interval(&self) -> Duration {
        Duration::from_secs(self.announce_interval.saturating_mul(60))
    }

    pub fn page_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.page_refresh_interval)
    }

    pub fn file_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.file_refresh_interval)
    }

    /// `None` when scripts may run unbounded.
    pub fn script_timeout(&self) -> Option<Duration> {
        (self.script_timeout > 0).then(|| Duration::from_secs(self.script_timeout))
    }
}

enum PlainError {
    UnknownKey,
    BadValue(&'static str),
}

fn resolve_path(path: &Path, cwd: &Path) -> PathBuf {
    let expanded = shellexpand::tilde(&path.to_string_lossy()).into_owned();
    let path = PathBuf::from(expanded);
    if path.is_relative() { cwd.join(path) } else { path }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn roots() -> (TempDir, PathBuf, PathBuf) {
        let temp = TempDir::new().unwrap();
        let pages = temp.path().join("pages");
        let files = temp.path().join("files");
        fs::create_dir_all(&pages).unwrap();
        fs::create_dir_all(&files).unwrap();
        (temp, pages, files)
    }

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.announce_interval(), Duration::from_secs(360 * 60));
        assert_eq!(config.page_refresh_interval(), Duration::ZERO);
        assert_eq!(config.script_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.port, 4280);
    }

    #[test]
    fn test_parse_kebab_case_file() {
        let (config, ignored) = NodeConfig::parse_with_ignored(
            r#"
            pages-dir = "/srv/pages"
            node-name = "Test Node"
            announce-interval = 60
            page-refresh-interval = 300
            log-level = "debug"
            script-timeout = 0
            "#,
        )
        .unwrap();

        assert!(ignored.is_empty());
        assert_eq!(config.pages_dir, PathBuf::from("/srv/pages"));
        assert_eq!(config.files_dir, PathBuf::from("files"));
        assert_eq!(config.node_name.as_deref(), Some("Test Node"));
        assert_eq!(config.announce_interval, 60);
        assert_eq!(config.page_refresh_interval, 300);
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.script_timeout(), None);
    }

    #[test]
    fn test_unknown_keys_collected() {
        let (_, ignored) =
            NodeConfig::parse_with_ignored("reticulum-config = \"/x\"\nport = 1\n").unwrap();
        assert_eq!(ignored, vec!["reticulum-config"]);
    }

    #[test]
    fn test_bad_values_rejected() {
        assert!(NodeConfig::parse_with_ignored("announce-interval = \"soon\"").is_err());
        assert!(NodeConfig::parse_with_ignored("log-level = \"loud\"").is_err());
    }

    #[test]
    fn test_plain_key_value_lines() {
        let (config, ignored) = NodeConfig::parse_plain(
            "# node settings\n\
             reticulum-config = /etc/rns\n\
             pages-dir = /srv/pages\n\
             node-name = My Node = Best\n\
             announce-interval = 45\n\
             log-level = DEBUG\n\
             no equals sign here\n\
             page-refresh-interval = often\n\
             files-dir =\n",
            Path::new("node.conf"),
        );

        assert_eq!(ignored, vec!["reticulum-config"]);
        assert_eq!(config.pages_dir, PathBuf::from("/srv/pages"));
        assert_eq!(config.node_name.as_deref(), Some("My Node = Best"));
        assert_eq!(config.announce_interval, 45);
        assert_eq!(config.log_level, LogLevel::Debug);
        // Bad int and empty value keep the defaults
        assert_eq!(config.page_refresh_interval, 0);
        assert_eq!(config.files_dir, PathBuf::from("files"));
    }

    #[test]
    fn test_plain_file_loaded_when_not_toml() {
        let (temp, pages, files) = roots();
        let config_path = temp.path().join("node.conf");
        fs::write(
            &config_path,
            format!(
                "pages-dir = {}\nfiles-dir = {}\nnode-name = Plain Node\nport = 9000\n",
                pages.display(),
                files.display()
            ),
        )
        .unwrap();

        let cli = Cli {
            node_config: Some(config_path),
            ..Default::default()
        };
        let config = NodeConfig::load(&cli).unwrap();
        assert_eq!(config.node_name.as_deref(), Some("Plain Node"));
        assert_eq!(config.pages_dir, pages);
        assert_eq!(config.files_dir, files);
        assert_eq!(config.port, 9000);
    }

    #[test]
    fn test_cli_overrides_file_overrides_default() {
        let (temp, pages, files) = roots();
        let config_path = temp.path().join("node.toml");
        fs::write(
            &config_path,
            format!(
                "pages-dir = {:?}\nfiles-dir = {:?}\nannounce-interval = 60\nnode-name = \"File Name\"\n",
                pages.display().to_string(),
                files.display().to_string()
            ),
        )
        .unwrap();

        let cli = Cli {
            node_config: Some(config_path),
            node_name: Some("Cli Name".to_owned()),
            ..Default::default()
        };
        let config = NodeConfig::load(&cli).unwrap();

        assert_eq!(config.node_name.as_deref(), Some("Cli Name"));
        assert_eq!(config.announce_interval, 60);
        assert_eq!(config.pages_dir, pages);
        assert_eq!(config.script_timeout, 30);
    }

    #[test]
    fn test_missing_roots_fail_validation() {
        let temp = TempDir::new().unwrap();
        let cli = Cli {
            pages_dir: Some(temp.path().join("nope")),
            files_dir: Some(temp.path().to_path_buf()),
            ..Default::default()
        };
        let err = NodeConfig::load(&cli).unwrap_err();
        assert!(format!("{err:#}").contains("pages-dir"));
    }

    #[test]
    fn test_zero_announce_interval_rejected() {
        let (_temp, pages, files) = roots();
        let cli = Cli {
            pages_dir: Some(pages),
            files_dir: Some(files),
            announce_interval: Some(0),
            ..Default::default()
        };
        assert!(NodeConfig::load(&cli).is_err());
    }

    #[test]
    fn test_missing_config_file_is_error() {
        let err = NodeConfig::from_path(Path::new("/nonexistent/node.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(..)));
    }

    #[test]
    fn test_resolve_path() {
        let cwd = Path::new("/work");
        assert_eq!(resolve_path(Path::new("pages"), cwd), PathBuf::from("/work/pages"));
        assert_eq!(resolve_path(Path::new("/abs"), cwd), PathBuf::from("/abs"));
    }
}
