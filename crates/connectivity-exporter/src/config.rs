//! Configuration loading and validation for the connectivity exporter

use crate::cli::Args;
use connectivity::{ConnectivityCheck, MeasurementSettings};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use validator::{Validate, ValidationError};

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Invalid check: {0}")]
    CheckError(#[from] common::Error),

    #[error("no checks configured")]
    NoChecks,
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub measurement: MeasurementConfig,

    /// Checks run in the background on their own interval
    #[serde(default)]
    pub checks: Vec<ConnectivityCheck>,

    /// Checks run on every `/metrics` scrape
    #[serde(default)]
    pub pull_checks: Vec<ConnectivityCheck>,

    #[serde(default)]
    pub logging: LoggingSettings,

    #[serde(default)]
    pub shutdown: ShutdownSettings,
}

impl Validate for Config {
    fn validate(&self) -> Result<(), validator::ValidationErrors> {
        self.server.validate()?;
        self.measurement.validate()?;
        self.shutdown.validate()?;
        Ok(())
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ServerSettings {
    #[validate(length(min = 1), custom = "validate_http_addr")]
    pub http_addr: String,

    /// Serve on-demand checks on `/probe`
    pub probe_enabled: bool,
}

/// Measurement tunables
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MeasurementConfig {
    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_ping_interval")]
    pub ping_interval: Duration,

    #[validate(range(min = 1, max = 10000))]
    pub flood_count: u32,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_timeout")]
    pub connect_timeout: Duration,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_timeout")]
    pub transfer_timeout: Duration,

    /// Bytes sent per transfer check
    #[validate(range(min = 1, max = 67108864))]
    pub transfer_size: usize,
}

/// Logging settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub level: Option<String>,
    pub format: Option<String>,
}

impl LoggingSettings {
    pub fn level(&self) -> &str {
        self.level.as_deref().unwrap_or("info")
    }

    pub fn json(&self) -> bool {
        self.format.as_deref() == Some("json")
    }
}

/// Shutdown settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ShutdownSettings {
    /// How long stopped checks may take to wind down
    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_timeout")]
    pub drain_timeout: Duration,
}

// Default implementations

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            http_addr: "localhost:9560".to_string(),
            probe_enabled: true,
        }
    }
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(1),
            flood_count: 200,
            connect_timeout: Duration::from_secs(10),
            transfer_timeout: Duration::from_secs(30),
            transfer_size: 1 << 20,
        }
    }
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(5),
        }
    }
}

// Custom validators

fn validate_http_addr(addr: &str) -> Result<(), ValidationError> {
    let Some((_host, port)) = addr.trim().rsplit_once(':') else {
        return Err(ValidationError::new("http_addr_missing_port"));
    };
    if port.parse::<u16>().is_err() {
        return Err(ValidationError::new("http_addr_invalid_port"));
    }
    Ok(())
}

fn validate_ping_interval(interval: &Duration) -> Result<(), ValidationError> {
    let millis = interval.as_millis();
    if !(1..=60_000).contains(&millis) {
        return Err(ValidationError::new("ping_interval_out_of_range"));
    }
    Ok(())
}

fn validate_timeout(timeout: &Duration) -> Result<(), ValidationError> {
    if timeout.is_zero() {
        return Err(ValidationError::new("timeout_zero"));
    }
    Ok(())
}

// Configuration loading implementation

impl Config {
    /// Load configuration from `path`, or from the default search paths
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            if !path.is_file() {
                return Err(ConfigError::FileNotFound(path.to_path_buf()));
            }
            tracing::info!("Loading configuration from: {}", path.display());
            return Self::load_from_file(path);
        }

        match Self::find_config_file() {
            Some(path) => {
                tracing::info!("Loading configuration from: {}", path.display());
                Self::load_from_file(&path)
            }
            None => {
                tracing::info!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/connectivity/exporter.yaml")];

        if let Some(home_path) = Self::home_config_path() {
            paths.push(home_path);
        }

        paths.push(PathBuf::from("./connectivity-exporter.yaml"));

        paths.into_iter().find(|p: &PathBuf| p.exists() && p.is_file())
    }

    /// Get home directory config path
    fn home_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config/connectivity/exporter.yaml"))
    }

    /// Apply command line overrides. `--check` flags are appended to the
    /// configured checks.
    pub fn apply_args(&mut self, args: &Args) -> Result<(), ConfigError> {
        if let Some(addr) = &args.http_addr {
            self.server.http_addr = addr.clone();
        }
        for spec in &args.checks {
            self.checks.push(ConnectivityCheck::from_flag(spec)?);
        }
        if let Some(level) = &args.log_level {
            self.logging.level = Some(level.clone());
        }
        if args.log_json {
            self.logging.format = Some("json".to_string());
        }
        Ok(())
    }

    /// Validate settings and every check, and make sure there is
    /// something to do.
    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate()?;
        for check in &self.checks {
            check.validate_scheduled()?;
        }
        for check in &self.pull_checks {
            check.validate_target()?;
        }
        if self.checks.is_empty() && self.pull_checks.is_empty() && !self.server.probe_enabled {
            return Err(ConfigError::NoChecks);
        }
        Ok(())
    }

    /// Measurement settings for the network checker
    pub fn measurement_settings(&self) -> MeasurementSettings {
        MeasurementSettings {
            ping_interval: self.measurement.ping_interval,
            flood_count: self.measurement.flood_count,
            connect_timeout: self.measurement.connect_timeout,
            transfer_timeout: self.measurement.transfer_timeout,
            transfer_size: self.measurement.transfer_size,
            ..MeasurementSettings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use connectivity::{AddressFamily, CheckKind};

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.check().is_ok());
    }

    #[test]
    fn test_valid_yaml_parsing() {
        let yaml = r#"
server:
  http_addr: "0.0.0.0:9560"
  probe_enabled: false

measurement:
  ping_interval: 500ms
  flood_count: 50
  connect_timeout: 2s
  transfer_timeout: 10s
  transfer_size: 65536

checks:
  - kind: ping
    host: default-gateway.internal
    interval: 1m
  - kind: transfer
    af: ip6
    host: echo.example.com
    service: echo
    interval: 5m

pull_checks:
  - kind: connect
    host: db
    service: "5432"

logging:
  level: debug
  format: json
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.check().is_ok());
        assert_eq!(config.server.http_addr, "0.0.0.0:9560");
        assert!(!config.server.probe_enabled);
        assert_eq!(config.measurement.flood_count, 50);
        assert_eq!(config.checks.len(), 2);
        assert_eq!(config.checks[0].kind, CheckKind::HostPing);
        assert_eq!(config.checks[0].network, AddressFamily::Ip);
        assert_eq!(config.checks[1].network, AddressFamily::Ip6);
        assert_eq!(config.checks[1].interval, Duration::from_secs(300));
        assert_eq!(config.pull_checks[0].service.as_deref(), Some("5432"));
        assert_eq!(config.logging.level(), "debug");
        assert!(config.logging.json());
    }

    #[test]
    fn test_minimal_yaml_uses_defaults() {
        let yaml = r#"
measurement:
  flood_count: 10
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.http_addr, "localhost:9560");
        assert_eq!(config.measurement.ping_interval, Duration::from_secs(1));
        assert_eq!(config.shutdown.drain_timeout, Duration::from_secs(5));
        assert_eq!(config.logging.level(), "info");
        assert!(!config.logging.json());
    }

    #[test]
    fn test_unknown_check_kind_fails_parsing() {
        let yaml = r#"
checks:
  - kind: traceroute
    host: a
    interval: 1m
"#;
        let err = serde_yaml::from_str::<Config>(yaml).unwrap_err();
        assert!(err.to_string().contains("unknown connectivity check kind"));
    }

    #[test]
    fn test_invalid_ping_interval() {
        let yaml = r#"
measurement:
  ping_interval: 2m  # Invalid: > 60s
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_flood_count() {
        let yaml = r#"
measurement:
  flood_count: 0  # Invalid: < 1
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_http_addr_validation() {
        assert!(validate_http_addr("localhost:9560").is_ok());
        assert!(validate_http_addr(":9560").is_ok());
        assert!(validate_http_addr("[::1]:9560").is_ok());

        assert!(validate_http_addr("localhost").is_err());
        assert!(validate_http_addr("localhost:http").is_err());
    }

    #[test]
    fn test_scheduled_check_needs_interval() {
        let yaml = r#"
checks:
  - kind: ping
    host: a
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let err = config.check().unwrap_err();
        assert!(matches!(err, ConfigError::CheckError(_)));
        assert!(err.to_string().contains("missing interval parameter"));
    }

    #[test]
    fn test_pull_check_needs_service() {
        let yaml = r#"
pull_checks:
  - kind: transfer
    host: a
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let err = config.check().unwrap_err();
        assert!(err.to_string().contains("missing service parameter"));
    }

    #[test]
    fn test_no_checks_configured() {
        let mut config = Config::default();
        config.server.probe_enabled = false;
        assert!(matches!(config.check(), Err(ConfigError::NoChecks)));
    }

    #[test]
    fn test_apply_args_appends_checks() {
        let yaml = r#"
checks:
  - kind: ping
    host: a
    interval: 1m
"#;
        let mut config: Config = serde_yaml::from_str(yaml).unwrap();
        let args = Args {
            http_addr: Some("127.0.0.1:9999".to_string()),
            checks: vec!["kind=connect,host=b,service=ssh,interval=30s".to_string()],
            log_level: Some("debug".to_string()),
            log_json: true,
            ..Default::default()
        };

        config.apply_args(&args).unwrap();
        assert_eq!(config.server.http_addr, "127.0.0.1:9999");
        assert_eq!(config.checks.len(), 2);
        assert_eq!(config.checks[1].host, "b");
        assert_eq!(config.logging.level(), "debug");
        assert!(config.logging.json());
        assert!(config.check().is_ok());
    }

    #[test]
    fn test_apply_args_rejects_bad_check() {
        let mut config = Config::default();
        let args = Args {
            checks: vec!["kind=ping,interval=1m".to_string()],
            ..Default::default()
        };

        let err = config.apply_args(&args).unwrap_err();
        assert!(err.to_string().contains("missing host parameter"));
    }

    #[test]
    fn test_load_missing_explicit_file() {
        let err = Config::load(Some(Path::new("/nonexistent/exporter.yaml"))).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn test_measurement_settings_conversion() {
        let config = Config::default();
        let settings = config.measurement_settings();

        assert_eq!(settings.ping_interval, Duration::from_secs(1));
        assert_eq!(settings.ping_count, 3);
        assert_eq!(settings.flood_count, 200);
        assert_eq!(settings.connect_timeout, Duration::from_secs(10));
        assert_eq!(settings.transfer_size, 1024 * 1024);
    }
}
