//! Logging configuration and initialization
//!
//! All binaries in the workspace log through `tracing`. This module builds the
//! global subscriber from a [`LogConfig`]:
//!
//! - console, rolling file, or both
//! - human-readable text or JSON lines
//! - level plus extra `EnvFilter` directives (e.g. `sqlx=warn`)
//!
//! Library code never prints; it uses `info!`/`warn!`/`error!` with structured
//! fields such as `event_id = %id`.
//!
//! # Example
//!
//! ```no_run
//! use ap_common::logging::{init_logging, LogConfig};
//!
//! let config = LogConfig::from_env().unwrap_or_default();
//! let _guard = init_logging(&config).unwrap();
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, MakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::error::{ApError, Result};

/// Case-insensitive lookup of `value` among `(alias, variant)` pairs
fn parse_choice<T: Copy>(kind: &str, value: &str, choices: &[(&str, T)]) -> Result<T> {
    let wanted = value.trim().to_ascii_lowercase();
    choices
        .iter()
        .find(|(alias, _)| *alias == wanted)
        .map(|(_, variant)| *variant)
        .ok_or_else(|| ApError::config(format!("Invalid log {kind}: '{value}'")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl FromStr for LogLevel {
    type Err = ApError;

    fn from_str(s: &str) -> Result<Self> {
        parse_choice(
            "level",
            s,
            &[
                ("trace", Self::Trace),
                ("debug", Self::Debug),
                ("info", Self::Info),
                ("warn", Self::Warn),
                ("warning", Self::Warn),
                ("error", Self::Error),
            ],
        )
    }
}

/// Where log lines are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Console,
    File,
    Both,
}

impl LogOutput {
    fn writes_console(self) -> bool {
        self != Self::File
    }

    fn writes_file(self) -> bool {
        self != Self::Console
    }
}

impl FromStr for LogOutput {
    type Err = ApError;

    fn from_str(s: &str) -> Result<Self> {
        parse_choice(
            "output",
            s,
            &[
                ("console", Self::Console),
                ("stdout", Self::Console),
                ("file", Self::File),
                ("both", Self::Both),
                ("all", Self::Both),
            ],
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ApError;

    fn from_str(s: &str) -> Result<Self> {
        parse_choice("format", s, &[("text", Self::Text), ("pretty", Self::Text), ("json", Self::Json)])
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: LogLevel,
    pub output: LogOutput,
    pub format: LogFormat,
    /// Directory for rolling log files
    pub log_dir: PathBuf,
    /// File name prefix, e.g. "ap-server" -> "ap-server.2025-07-18"
    pub log_file_prefix: String,
    /// Extra comma separated `EnvFilter` directives
    pub filter_directives: Option<String>,
    pub include_location: bool,
    pub include_thread_ids: bool,
    pub include_targets: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            output: LogOutput::Console,
            format: LogFormat::Text,
            log_dir: PathBuf::from("./logs"),
            log_file_prefix: "action-processor".to_string(),
            filter_directives: None,
            include_location: false,
            include_thread_ids: false,
            include_targets: true,
        }
    }
}

/// Non-empty value of an environment variable
fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_flag(key: &str) -> Option<bool> {
    env_value(key).map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

impl LogConfig {
    /// Defaults overridden by `LOG_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::default().merge_env()
    }

    /// Apply `LOG_LEVEL`, `LOG_OUTPUT`, `LOG_FORMAT`, `LOG_DIR`,
    /// `LOG_FILE_PREFIX`, `LOG_FILTER`, `LOG_INCLUDE_LOCATION` and
    /// `LOG_INCLUDE_THREAD_IDS` on top of `self`. Unset variables leave the
    /// current value alone; unparseable ones are an error.
    pub fn merge_env(mut self) -> Result<Self> {
        if let Some(level) = env_value("LOG_LEVEL") {
            self.level = level.parse()?;
        }
        if let Some(output) = env_value("LOG_OUTPUT") {
            self.output = output.parse()?;
        }
        if let Some(format) = env_value("LOG_FORMAT") {
            self.format = format.parse()?;
        }
        if let Some(dir) = env_value("LOG_DIR") {
            self.log_dir = PathBuf::from(dir);
        }
        if let Some(prefix) = env_value("LOG_FILE_PREFIX") {
            self.log_file_prefix = prefix;
        }
        if let Some(filter) = env_value("LOG_FILTER") {
            self.filter_directives = Some(filter);
        }
        self.include_location = env_flag("LOG_INCLUDE_LOCATION").unwrap_or(self.include_location);
        self.include_thread_ids = env_flag("LOG_INCLUDE_THREAD_IDS").unwrap_or(self.include_thread_ids);
        Ok(self)
    }

    pub fn builder() -> LogConfigBuilder {
        LogConfigBuilder::default()
    }

    /// `RUST_LOG` first, then the configured level, then extra directives
    fn env_filter(&self) -> Result<EnvFilter> {
        let base = EnvFilter::from_default_env().add_directive(Level::from(self.level).into());

        self.filter_directives
            .iter()
            .flat_map(|d| d.split(','))
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .try_fold(base, |filter, directive| {
                let parsed = directive
                    .parse()
                    .map_err(|e| ApError::config(format!("Invalid filter directive '{directive}': {e}")))?;
                Ok(filter.add_directive(parsed))
            })
    }
}

/// Builder for [`LogConfig`]
#[derive(Default)]
pub struct LogConfigBuilder {
    config: LogConfig,
}

impl LogConfigBuilder {
    pub fn level(mut self, level: LogLevel) -> Self {
        self.config.level = level;
        self
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.config.output = output;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.config.format = format;
        self
    }

    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.log_dir = dir.into();
        self
    }

    pub fn log_file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.log_file_prefix = prefix.into();
        self
    }

    pub fn filter_directives(mut self, filter: impl Into<String>) -> Self {
        self.config.filter_directives = Some(filter.into());
        self
    }

    pub fn build(self) -> LogConfig {
        self.config
    }
}

/// Keeps the non-blocking file writer flushing; drop it on shutdown.
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber. Call once at startup.
pub fn init_logging(config: &LogConfig) -> Result<LogGuard> {
    let filter = config.env_filter()?;
    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut file_guard = None;

    if config.output.writes_console() {
        layers.push(format_layer(config, std::io::stdout, true));
    }

    if config.output.writes_file() {
        std::fs::create_dir_all(&config.log_dir)?;
        let appender = tracing_appender::rolling::daily(&config.log_dir, &config.log_file_prefix);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        layers.push(format_layer(config, writer, false));
        file_guard = Some(guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| ApError::config(format!("Global tracing subscriber already installed: {e}")))?;

    Ok(LogGuard { _file: file_guard })
}

fn format_layer<W>(config: &LogConfig, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(config.include_targets)
        .with_thread_ids(config.include_thread_ids)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    match config.format {
        LogFormat::Text => layer.boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}
