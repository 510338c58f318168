//! Command-line interface definitions.
//!
//! Every option is optional here: an absent flag falls back to the node
//! config file, then to the built-in default (see `config::NodeConfig`).

use clap::{ColorChoice, Parser};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::logger::LogLevel;

/// Serve micron pages and files from a directory tree
#[derive(Parser, Debug, Clone, Default)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Node config file (TOML, kebab-case keys mirroring the long flags)
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub node_config: Option<PathBuf>,

    /// Control colored output (auto, always, never)
    #[arg(long, default_value = "auto")]
    pub color: ColorChoice,

    /// Pages directory [default: ./pages]
    #[arg(short, long, value_hint = clap::ValueHint::DirPath)]
    pub pages_dir: Option<PathBuf>,

    /// Files directory [default: ./files]
    #[arg(short, long, value_hint = clap::ValueHint::DirPath)]
    pub files_dir: Option<PathBuf>,

    /// Node display name, sent with announces
    #[arg(short, long)]
    pub node_name: Option<String>,

    /// Announce interval in minutes [default: 360]
    #[arg(short, long)]
    pub announce_interval: Option<u64>,

    /// Directory holding the node identity [default: ./node-config]
    #[arg(short, long, value_hint = clap::ValueHint::DirPath)]
    pub identity_dir: Option<PathBuf>,

    /// Page rescan interval in seconds, 0 disables [default: 0]
    #[arg(long)]
    pub page_refresh_interval: Option<u64>,

    /// File rescan interval in seconds, 0 disables [default: 0]
    #[arg(long)]
    pub file_refresh_interval: Option<u64>,

    /// Logging level: DEBUG, INFO, WARNING, ERROR, CRITICAL [default: INFO]
    #[arg(short, long)]
    pub log_level: Option<LogLevel>,

    /// Stats file, written on every event and at shutdown
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    pub stats_file: Option<PathBuf>,

    /// Script page timeout in seconds, 0 for none [default: 30]
    #[arg(long)]
    pub script_timeout: Option<u64>,

    /// Network interface of the local HTTP bridge [default: 127.0.0.1]
    #[arg(long)]
    pub interface: Option<IpAddr>,

    /// Port of the local HTTP bridge [default: 4280]
    #[arg(long)]
    pub port: Option<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_arguments() {
        let cli = Cli::try_parse_from(["page-node"]).unwrap();
        assert!(cli.node_config.is_none());
        assert!(cli.pages_dir.is_none());
        assert!(cli.announce_interval.is_none());
        assert_eq!(cli.color, ColorChoice::Auto);
    }

    #[test]
    fn test_short_and_long_flags() {
        let cli = Cli::try_parse_from([
            "page-node",
            "node.toml",
            "-p",
            "/srv/pages",
            "-f",
            "/srv/files",
            "-n",
            "My Node",
            "-a",
            "60",
            "-i",
            "/srv/id",
            "--page-refresh-interval",
            "30",
            "-l",
            "debug",
            "--script-timeout",
            "0",
            "--port",
            "9000",
        ])
        .unwrap();

        assert_eq!(cli.node_config, Some(PathBuf::from("node.toml")));
        assert_eq!(cli.pages_dir, Some(PathBuf::from("/srv/pages")));
        assert_eq!(cli.files_dir, Some(PathBuf::from("/srv/files")));
        assert_eq!(cli.node_name.as_deref(), Some("My Node"));
        assert_eq!(cli.announce_interval, Some(60));
        assert_eq!(cli.identity_dir, Some(PathBuf::from("/srv/id")));
        assert_eq!(cli.page_refresh_interval, Some(30));
        assert_eq!(cli.file_refresh_interval, None);
        assert_eq!(cli.log_level, Some(LogLevel::Debug));
        assert_eq!(cli.script_timeout, Some(0));
        assert_eq!(cli.port, Some(9000));
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        assert!(Cli::try_parse_from(["page-node", "-l", "loud"]).is_err());
    }
}
