use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{ExporterError, Result};

pub const CONFIG_DIR_NAME: &str = ".prometheus-gmail-exporter";
const CONFIG_FILE_NAME: &str = "prometheus-gmail-exporter.toml";
const SYSTEM_CONFIG_FILE: &str = "/etc/prometheus-gmail-exporter.toml";

const DEFAULT_UPDATE_DELAY_SECONDS: u64 = 300;
const DEFAULT_PROM_PORT: u16 = 8080;
const DEFAULT_AUTH_POLL_SECONDS: u64 = 10;
const DEFAULT_LOG_LEVEL: &str = "info";

/// Checks gmail labels for unread messages and exposes the counts via prometheus.
#[derive(Parser, Debug, Default)]
#[command(name = "prometheus-gmail-exporter", version, about, long_about = None)]
pub struct Cli {
    /// TOML config file; CLI flags override its values
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Label ids to monitor; all labels when omitted
    #[arg(long, num_args = 0..)]
    pub labels: Vec<String>,

    /// Label ids that also get per-sender unread counts
    #[arg(long = "labels-sender-count", alias = "labelsSenderCount", num_args = 0..)]
    pub labels_sender_count: Vec<String>,

    #[arg(long, alias = "clientSecretFile")]
    pub client_secret_file: Option<PathBuf>,

    #[arg(long, alias = "credentialsPath")]
    pub credentials_path: Option<PathBuf>,

    /// File polled for the authorization code when not attached to a terminal
    #[arg(long, alias = "authCodePath")]
    pub auth_code_path: Option<PathBuf>,

    #[arg(long, alias = "updateDelaySeconds")]
    pub update_delay_seconds: Option<u64>,

    #[arg(long, alias = "promPort")]
    pub prom_port: Option<u16>,

    /// Refresh forever instead of once
    #[arg(long, short = 'D')]
    pub daemonize: bool,

    /// trace, debug, info, warn, error, or a numeric level (20 = info)
    #[arg(long, alias = "logLevel")]
    pub log_level: Option<String>,

    #[arg(long, alias = "authPollSeconds")]
    pub auth_poll_seconds: Option<u64>,

    /// Add a random instance_id label to every metric
    #[arg(long)]
    pub instance_label: bool,
}

/// Settings read from the TOML config file. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub labels_sender_count: Vec<String>,
    pub client_secret_file: Option<PathBuf>,
    pub credentials_path: Option<PathBuf>,
    pub auth_code_path: Option<PathBuf>,
    pub update_delay_seconds: Option<u64>,
    pub prom_port: Option<u16>,
    pub daemonize: Option<bool>,
    pub log_level: Option<String>,
    pub auth_poll_seconds: Option<u64>,
    pub instance_label: Option<bool>,
}

impl FileConfig {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| ExporterError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ExporterError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }
}

/// Fully resolved configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub labels: Vec<String>,
    pub labels_sender_count: Vec<String>,
    pub client_secret_file: PathBuf,
    pub credentials_path: PathBuf,
    pub auth_code_path: PathBuf,
    pub update_delay_seconds: u64,
    pub prom_port: u16,
    pub daemonize: bool,
    pub log_level: String,
    pub auth_poll_seconds: u64,
    pub instance_label: bool,
    pub source: Option<PathBuf>,
}

/// `~/.prometheus-gmail-exporter`, or a relative directory when there is no home.
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(CONFIG_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(CONFIG_DIR_NAME))
}

fn default_config_files() -> Vec<PathBuf> {
    vec![
        config_dir().join(CONFIG_FILE_NAME),
        PathBuf::from(SYSTEM_CONFIG_FILE),
    ]
}

impl Config {
    /// Loads the config file (explicit, or the first default that exists)
    /// and overlays the CLI flags on it.
    pub fn load(cli: Cli) -> Result<Self> {
        let source = match &cli.config {
            Some(path) => Some(path.clone()),
            None => default_config_files().into_iter().find(|path| path.exists()),
        };

        let file = match &source {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };

        Self::merge(cli, file, source, &config_dir())
    }

    pub fn merge(cli: Cli, file: FileConfig, source: Option<PathBuf>, config_dir: &Path) -> Result<Self> {
        let pick = |cli: Vec<String>, file: Vec<String>| if cli.is_empty() { file } else { cli };

        let config = Self {
            labels: pick(cli.labels, file.labels),
            labels_sender_count: pick(cli.labels_sender_count, file.labels_sender_count),
            client_secret_file: cli
                .client_secret_file
                .or(file.client_secret_file)
                .unwrap_or_else(|| config_dir.join("client_secret.json")),
            credentials_path: cli
                .credentials_path
                .or(file.credentials_path)
                .unwrap_or_else(|| config_dir.join("login_cookie.json")),
            auth_code_path: cli
                .auth_code_path
                .or(file.auth_code_path)
                .unwrap_or_else(|| config_dir.join("auth_code")),
            update_delay_seconds: cli
                .update_delay_seconds
                .or(file.update_delay_seconds)
                .unwrap_or(DEFAULT_UPDATE_DELAY_SECONDS),
            prom_port: cli.prom_port.or(file.prom_port).unwrap_or(DEFAULT_PROM_PORT),
            daemonize: cli.daemonize || file.daemonize.unwrap_or(false),
            log_level: cli
                .log_level
                .or(file.log_level)
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            auth_poll_seconds: cli
                .auth_poll_seconds
                .or(file.auth_poll_seconds)
                .unwrap_or(DEFAULT_AUTH_POLL_SECONDS),
            instance_label: cli.instance_label || file.instance_label.unwrap_or(false),
            source,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.update_delay_seconds == 0 {
            return Err(ExporterError::Config(
                "update_delay_seconds must be greater than 0".into(),
            ));
        }

        if self.auth_poll_seconds == 0 {
            return Err(ExporterError::Config(
                "auth_poll_seconds must be greater than 0".into(),
            ));
        }

        tracing_filter_directive(&self.log_level)?;
        Ok(())
    }

    /// Logs where the config came from and flags sender-count labels that
    /// will never be refreshed.
    pub fn log_summary(&self) {
        if let Some(source) = &self.source {
            info!("Loaded configuration from {}", source.display());
        }

        if !self.labels.is_empty() {
            for label in &self.labels_sender_count {
                if !self.labels.contains(label) {
                    warn!("Sender counts requested for {} but it is not a monitored label", label);
                }
            }
        }
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_delay_seconds)
    }

    pub fn auth_poll_interval(&self) -> Duration {
        Duration::from_secs(self.auth_poll_seconds)
    }
}

/// Maps a configured log level to a tracing filter directive. Numeric levels
/// follow the 10/20/30/40/50 scale.
pub fn tracing_filter_directive(level: &str) -> Result<&'static str> {
    let level = level.trim().to_ascii_lowercase();

    if let Ok(numeric) = level.parse::<u32>() {
        return Ok(match numeric {
            0..=9 => "trace",
            10..=19 => "debug",
            20..=29 => "info",
            30..=39 => "warn",
            _ => "error",
        });
    }

    match level.as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" | "warning" => Ok("warn"),
        "error" | "critical" | "fatal" => Ok("error"),
        other => Err(ExporterError::Config(format!("unknown log level '{}'", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn merge(cli: Cli, file: FileConfig) -> Result<Config> {
        Config::merge(cli, file, None, Path::new("/home/me/.prometheus-gmail-exporter"))
    }

    #[test]
    fn test_defaults() {
        let config = merge(Cli::default(), FileConfig::default()).unwrap();

        assert!(config.labels.is_empty());
        assert_eq!(config.update_delay_seconds, 300);
        assert_eq!(config.prom_port, 8080);
        assert!(!config.daemonize);
        assert_eq!(config.log_level, "info");
        assert_eq!(
            config.client_secret_file,
            PathBuf::from("/home/me/.prometheus-gmail-exporter/client_secret.json")
        );
        assert_eq!(
            config.auth_code_path,
            PathBuf::from("/home/me/.prometheus-gmail-exporter/auth_code")
        );
    }

    #[test]
    fn test_cli_overrides_file() {
        let file = FileConfig::from_toml(
            r#"
            labels = ["INBOX", "Label_1"]
            labels_sender_count = ["INBOX"]
            update_delay_seconds = 60
            prom_port = 9100
            daemonize = true
            "#,
        )
        .unwrap();
        let cli = Cli::parse_from(["prometheus-gmail-exporter", "--promPort", "9200", "--labels", "Label_2"]);

        let config = merge(cli, file).unwrap();

        assert_eq!(config.labels, vec!["Label_2"]);
        assert_eq!(config.labels_sender_count, vec!["INBOX"]);
        assert_eq!(config.update_delay_seconds, 60);
        assert_eq!(config.prom_port, 9200);
        assert!(config.daemonize);
    }

    #[test]
    fn test_legacy_flag_names() {
        let cli = Cli::parse_from([
            "prometheus-gmail-exporter",
            "-D",
            "--labelsSenderCount",
            "INBOX",
            "Label_3",
            "--updateDelaySeconds",
            "120",
            "--logLevel",
            "10",
        ]);

        let config = merge(cli, FileConfig::default()).unwrap();

        assert!(config.daemonize);
        assert_eq!(config.labels_sender_count, vec!["INBOX", "Label_3"]);
        assert_eq!(config.update_interval(), Duration::from_secs(120));
        assert_eq!(tracing_filter_directive(&config.log_level).unwrap(), "debug");
    }

    #[test]
    fn test_rejects_zero_interval() {
        let cli = Cli {
            update_delay_seconds: Some(0),
            ..Cli::default()
        };
        assert!(matches!(merge(cli, FileConfig::default()), Err(ExporterError::Config(_))));
    }

    #[test]
    fn test_rejects_unknown_file_keys() {
        assert!(FileConfig::from_toml("promport = 1").is_err());
    }

    #[test]
    fn test_log_levels() {
        assert_eq!(tracing_filter_directive("WARNING").unwrap(), "warn");
        assert_eq!(tracing_filter_directive("20").unwrap(), "info");
        assert_eq!(tracing_filter_directive("50").unwrap(), "error");
        assert!(tracing_filter_directive("loud").is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exporter.toml");
        std::fs::write(&path, "labels = [\"INBOX\"]\nlog_level = \"debug\"\n").unwrap();

        let cli = Cli {
            config: Some(path.clone()),
            ..Cli::default()
        };
        let config = Config::load(cli).unwrap();

        assert_eq!(config.labels, vec!["INBOX"]);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.source, Some(path));
    }
}
