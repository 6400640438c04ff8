//! Server configuration
//!
//! A small line-based format, one `key value` pair per line, `#` starts a
//! comment. The path comes in as the binary's first positional argument;
//! with no path the defaults apply.
//!
//! ```text
//! # cinderkv.conf
//! port 6379
//! loglevel info
//! aof-enabled yes
//! aof-file appendonly.aof
//! appendfsync everysec
//! ```
//!
//! An unreadable file, an unknown key, or a malformed value is an
//! initialization failure: the process reports it and exits nonzero.

use crate::aof::FsyncPolicy;
use std::path::Path;
use thiserror::Error;
use tracing::Level;

pub const DEFAULT_PORT: u16 = 6379;
pub const DEFAULT_AOF_FILE: &str = "appendonly.aof";

/// Configuration errors that abort startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    /// A line failed to parse
    #[error("config line {line}: {message}")]
    Invalid { line: usize, message: String },
}

/// Values the server core consumes.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP listen port.
    pub port: u16,
    /// Log filter level for the tracing subscriber.
    pub loglevel: Level,
    /// Whether mutations are logged to (and replayed from) the AOF.
    pub aof_enabled: bool,
    /// AOF path.
    pub aof_file: String,
    /// AOF durability policy.
    pub appendfsync: FsyncPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            loglevel: Level::INFO,
            aof_enabled: false,
            aof_file: DEFAULT_AOF_FILE.to_string(),
            appendfsync: FsyncPolicy::Everysec,
        }
    }
}

impl Config {
    /// Reads and parses a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Parses config file contents.
    pub fn parse(text: &str) -> Result<Config, ConfigError> {
        let mut config = Config::default();

        for (index, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let line_no = index + 1;
            let (key, value) = match line.split_once(char::is_whitespace) {
                Some((key, value)) => (key, value.trim()),
                None => {
                    return Err(ConfigError::Invalid {
                        line: line_no,
                        message: format!("missing value for '{}'", line),
                    })
                }
            };

            match key {
                "port" => {
                    config.port = value.parse::<u16>().ok().filter(|p| *p != 0).ok_or_else(
                        || ConfigError::Invalid {
                            line: line_no,
                            message: format!("invalid port '{}'", value),
                        },
                    )?;
                }
                "loglevel" => {
                    config.loglevel = match value {
                        "debug" => Level::DEBUG,
                        "info" => Level::INFO,
                        "warn" => Level::WARN,
                        "error" => Level::ERROR,
                        other => {
                            return Err(ConfigError::Invalid {
                                line: line_no,
                                message: format!("invalid loglevel '{}'", other),
                            })
                        }
                    };
                }
                "aof-enabled" => {
                    config.aof_enabled = parse_yes_no(value).ok_or_else(|| ConfigError::Invalid {
                        line: line_no,
                        message: format!("expected yes/no, got '{}'", value),
                    })?;
                }
                "aof-file" => {
                    if value.is_empty() {
                        return Err(ConfigError::Invalid {
                            line: line_no,
                            message: "empty aof-file path".to_string(),
                        });
                    }
                    config.aof_file = value.to_string();
                }
                "appendfsync" => {
                    config.appendfsync =
                        FsyncPolicy::from_config(value).ok_or_else(|| ConfigError::Invalid {
                            line: line_no,
                            message: format!("invalid appendfsync policy '{}'", value),
                        })?;
                }
                other => {
                    return Err(ConfigError::Invalid {
                        line: line_no,
                        message: format!("unknown key '{}'", other),
                    })
                }
            }
        }

        Ok(config)
    }

    /// The address the listener binds.
    pub fn listen_addr(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }
}

fn parse_yes_no(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "yes" => Some(true),
        "no" => Some(false),
        _ => None,
    }
}
