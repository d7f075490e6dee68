//! Configuration module for the zds-pipe server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::protocols::zds::{Deadlines, WorkloadInfo, WorkloadRequest};
use crate::transport::{default_pipe_path, FrameFormat, PipeOptions, DEFAULT_MAX_FRAME_SIZE};

/// Command-line arguments for the pipe server
#[derive(Parser, Debug, Default)]
#[command(name = "zds-pipe")]
#[command(version)]
#[command(about = "Workload registration server over a local named pipe", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Pipe path to listen on (e.g., \\.\pipe\istio-zds or /tmp/istio-zds.sock)
    #[arg(short = 'p', long)]
    pub pipe: Option<String>,

    /// How messages are delimited on the pipe
    #[arg(long, value_enum)]
    pub framing: Option<FrameFormat>,

    /// Maximum payload size of one message in bytes
    #[arg(long)]
    pub max_frame_size: Option<usize>,

    /// Deadline for the peer's hello, in milliseconds
    #[arg(long)]
    pub handshake_timeout_ms: Option<u64>,

    /// Deadline for each request write and reply read, in milliseconds
    #[arg(long)]
    pub request_timeout_ms: Option<u64>,

    /// Maximum number of concurrent sessions
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Number of runtime worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub pipe: PipeConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Requests sent on every session after the handshake.
    #[serde(default)]
    pub requests: Vec<RequestSpec>,
}

/// Pipe endpoint configuration
#[derive(Debug, Deserialize)]
pub struct PipeConfig {
    #[serde(default = "default_pipe_path")]
    pub path: String,
    #[serde(default = "default_buffer_size")]
    pub in_buffer_size: u32,
    #[serde(default = "default_buffer_size")]
    pub out_buffer_size: u32,
    #[serde(default = "default_message_mode")]
    pub message_mode: bool,
    /// Unix socket permission bits, e.g. 0o660
    pub socket_mode: Option<u32>,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            path: default_pipe_path(),
            in_buffer_size: default_buffer_size(),
            out_buffer_size: default_buffer_size(),
            message_mode: default_message_mode(),
            socket_mode: None,
        }
    }
}

/// Protocol framing and deadline configuration
#[derive(Debug, Deserialize)]
pub struct ProtocolConfig {
    #[serde(default)]
    pub framing: FrameFormat,
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    #[serde(default = "default_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            framing: FrameFormat::default(),
            max_frame_size: default_max_frame_size(),
            handshake_timeout_ms: default_timeout_ms(),
            request_timeout_ms: default_timeout_ms(),
        }
    }
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Number of worker threads
    pub workers: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            workers: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// One scripted request, as written in the config file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RequestSpec {
    Add {
        uid: String,
        name: String,
        namespace: String,
        service_account: String,
        #[serde(default)]
        namespace_id: String,
    },
    Keep {
        uid: String,
    },
    Remove {
        uid: String,
    },
}

impl From<RequestSpec> for WorkloadRequest {
    fn from(spec: RequestSpec) -> Self {
        match spec {
            RequestSpec::Add {
                uid,
                name,
                namespace,
                service_account,
                namespace_id,
            } => WorkloadRequest::add(
                uid,
                WorkloadInfo::new(name, namespace, service_account),
                namespace_id,
            ),
            RequestSpec::Keep { uid } => WorkloadRequest::keep(uid),
            RequestSpec::Remove { uid } => WorkloadRequest::remove(uid),
        }
    }
}

fn default_buffer_size() -> u32 {
    1024
}

fn default_message_mode() -> bool {
    true
}

fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_max_connections() -> usize {
    64
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub pipe: PipeOptions,
    pub framing: FrameFormat,
    pub max_frame_size: usize,
    pub deadlines: Deadlines,
    pub max_connections: usize,
    pub workers: Option<usize>,
    pub log_level: String,
    /// Empty means the built-in demo script.
    pub requests: Vec<WorkloadRequest>,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args over TOML values and validate the result.
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let protocol = toml_config.protocol;

        let config = Config {
            pipe: PipeOptions {
                path: cli.pipe.unwrap_or(toml_config.pipe.path),
                in_buffer_size: toml_config.pipe.in_buffer_size,
                out_buffer_size: toml_config.pipe.out_buffer_size,
                message_mode: toml_config.pipe.message_mode,
                socket_mode: toml_config.pipe.socket_mode,
            },
            framing: cli.framing.unwrap_or(protocol.framing),
            max_frame_size: cli.max_frame_size.unwrap_or(protocol.max_frame_size),
            deadlines: Deadlines {
                handshake: Duration::from_millis(
                    cli.handshake_timeout_ms
                        .unwrap_or(protocol.handshake_timeout_ms),
                ),
                request: Duration::from_millis(
                    cli.request_timeout_ms.unwrap_or(protocol.request_timeout_ms),
                ),
            },
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            workers: cli.workers.or(toml_config.server.workers),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
            requests: toml_config.requests.into_iter().map(Into::into).collect(),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.pipe.path.is_empty() {
            return Err(ConfigError::Invalid("pipe path must not be empty".to_string()));
        }
        if self.max_frame_size == 0 || self.max_frame_size > u32::MAX as usize {
            return Err(ConfigError::Invalid(format!(
                "max_frame_size must be between 1 and {}",
                u32::MAX
            )));
        }
        if self.deadlines.handshake.is_zero() || self.deadlines.request.is_zero() {
            return Err(ConfigError::Invalid("timeouts must be non-zero".to_string()));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.workers == Some(0) {
            return Err(ConfigError::Invalid("workers must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
