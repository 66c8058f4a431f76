//! Command line arguments

use clap::Parser;
use std::path::PathBuf;

/// Export network connectivity measurements as Prometheus metrics
#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file (searched in standard locations when unset)
    #[arg(long, env = "CONNECTIVITY_CONFIG")]
    pub config: Option<PathBuf>,

    /// HTTP listen address, overrides server.http_addr
    #[arg(long, env = "CONNECTIVITY_HTTP_ADDR")]
    pub http_addr: Option<String>,

    /// Scheduled check as kind=X,af=Y,host=Z,service=W,interval=T (repeatable)
    #[arg(long = "check", value_name = "SPEC")]
    pub checks: Vec<String>,

    /// Log level (trace, debug, info, warn, error), overrides logging.level
    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_repeated_checks() {
        let args = Args::try_parse_from([
            "connectivity-exporter",
            "--http-addr",
            ":9560",
            "--check",
            "kind=ping,host=a,interval=1m",
            "--check",
            "kind=connect,host=b,service=ssh,interval=30s",
            "--log-json",
        ])
        .unwrap();

        assert_eq!(args.http_addr.as_deref(), Some(":9560"));
        assert_eq!(args.checks.len(), 2);
        assert!(args.log_json);
        assert!(args.config.is_none());
    }
}
