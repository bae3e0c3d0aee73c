//! Server configuration from command-line arguments.

use crate::persistence::FsyncPolicy;
use crate::storage::DEFAULT_SWEEP_INTERVAL;
use crate::{DEFAULT_HOST, DEFAULT_PORT};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default journal file, relative to the working directory.
pub const DEFAULT_AOF_PATH: &str = "shardkv.aof";

/// Errors from parsing command-line arguments.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} requires a value")]
    MissingValue(String),

    #[error("invalid value '{value}' for {flag}: {reason}")]
    InvalidValue {
        flag: String,
        value: String,
        reason: String,
    },

    #[error("unknown argument: {0}")]
    UnknownArgument(String),
}

/// Server settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Journal file, created if missing
    pub aof_path: PathBuf,
    pub fsync: FsyncPolicy,
    /// Time between two active expiry sweeps
    pub sweep_interval: Duration,
    /// Default tracing filter when `RUST_LOG` is not set
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            aof_path: PathBuf::from(DEFAULT_AOF_PATH),
            fsync: FsyncPolicy::default(),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            log_level: "info".to_string(),
        }
    }
}

/// What the binary was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliAction {
    Run(ServerConfig),
    Help,
    Version,
}

impl ServerConfig {
    /// Parses arguments, excluding the program name.
    pub fn from_args<I>(args: I) -> Result<CliAction, ConfigError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut config = ServerConfig::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            let mut value = |flag: &str| {
                args.next()
                    .ok_or_else(|| ConfigError::MissingValue(flag.to_string()))
            };

            match arg.as_str() {
                "--host" | "-h" => config.host = value("--host")?,
                "--port" | "-p" => {
                    let raw = value("--port")?;
                    config.port = raw
                        .parse()
                        .map_err(|e: std::num::ParseIntError| invalid("--port", &raw, e))?;
                }
                "--aof" => config.aof_path = PathBuf::from(value("--aof")?),
                "--fsync" => {
                    let raw = value("--fsync")?;
                    config.fsync = raw.parse().map_err(|e: String| invalid("--fsync", &raw, e))?;
                }
                "--sweep-interval" => {
                    let raw = value("--sweep-interval")?;
                    let ms: u64 = raw
                        .parse()
                        .map_err(|e: std::num::ParseIntError| invalid("--sweep-interval", &raw, e))?;
                    if ms == 0 {
                        return Err(invalid("--sweep-interval", &raw, "must be positive"));
                    }
                    config.sweep_interval = Duration::from_millis(ms);
                }
                "--log-level" => config.log_level = value("--log-level")?,
                "--help" => return Ok(CliAction::Help),
                "--version" | "-v" => return Ok(CliAction::Version),
                _ => return Err(ConfigError::UnknownArgument(arg.clone())),
            }
        }

        Ok(CliAction::Run(config))
    }

    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn invalid(flag: &str, value: &str, reason: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        flag: flag.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Usage text for `--help`.
pub const HELP: &str = r#"
ShardKV - A sharded in-memory key-value store with an append-only journal

USAGE:
    shardkv [OPTIONS]

OPTIONS:
    -h, --host <HOST>              Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>              Port to listen on (default: 6379)
        --aof <PATH>               Journal file (default: shardkv.aof)
        --fsync <POLICY>           always | everysec | no (default: everysec)
        --sweep-interval <MS>      Active expiry interval in ms (default: 5000)
        --log-level <LEVEL>        Log filter when RUST_LOG is unset (default: info)
    -v, --version                  Print version information
        --help                     Print this help message

EXAMPLES:
    shardkv                                  # 127.0.0.1:6379, ./shardkv.aof
    shardkv --port 6380 --aof /var/lib/kv.aof
    shardkv --fsync always                   # sync every write

CONNECTING:
    Use redis-cli or any Redis client to connect:
    $ redis-cli -p 6379
    127.0.0.1:6379> LPUSH jobs a b
    (integer) 2
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<CliAction, ConfigError> {
        ServerConfig::from_args(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_defaults() {
        let config = match parse(&[]).unwrap() {
            CliAction::Run(config) => config,
            other => panic!("unexpected {:?}", other),
        };

        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.bind_address(), "127.0.0.1:6379");
        assert_eq!(config.sweep_interval, Duration::from_secs(5));
        assert_eq!(config.fsync, FsyncPolicy::EverySec);
    }

    #[test]
    fn test_all_flags() {
        let action = parse(&[
            "-h",
            "0.0.0.0",
            "--port",
            "7000",
            "--aof",
            "/tmp/x.aof",
            "--fsync",
            "always",
            "--sweep-interval",
            "250",
            "--log-level",
            "debug",
        ])
        .unwrap();

        assert_eq!(
            action,
            CliAction::Run(ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 7000,
                aof_path: PathBuf::from("/tmp/x.aof"),
                fsync: FsyncPolicy::Always,
                sweep_interval: Duration::from_millis(250),
                log_level: "debug".to_string(),
            })
        );
    }

    #[test]
    fn test_help_and_version() {
        assert_eq!(parse(&["--help"]), Ok(CliAction::Help));
        assert_eq!(parse(&["-v"]), Ok(CliAction::Version));
    }

    #[test]
    fn test_errors() {
        assert_eq!(
            parse(&["--port"]),
            Err(ConfigError::MissingValue("--port".to_string()))
        );
        assert!(matches!(
            parse(&["--port", "99999"]),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            parse(&["--fsync", "sometimes"]),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            parse(&["--sweep-interval", "0"]),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert_eq!(
            parse(&["--verbose"]),
            Err(ConfigError::UnknownArgument("--verbose".to_string()))
        );
    }
}
