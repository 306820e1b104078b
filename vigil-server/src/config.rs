//! Server configuration
//!
//! Settings resolve in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (clap `env`, folded into 1 by the binary)
//! 3. TOML config file
//! 4. Built-in defaults
//!
//! Sources can be listed inline as `[[sources]]` tables and/or in a legacy
//! `sources_file` with one `ID,URL` pair per line (`#` starts a comment).

use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use vigil_common::config::{load_toml, resolve_config_path};
use vigil_common::protocol::{DEFAULT_ARTIFACT_PORT, DEFAULT_EVENT_PORT};
use vigil_common::time::millis_to_duration;

use crate::detector::{CommandInvoker, DEFAULT_CONFIDENCE_THRESHOLD};
use crate::error::{Error, Result};
use crate::source::{sanitize_source_id, FfmpegOptions, SourceInput, WorkerConfig, WorkerTiming};
use crate::store::{OverflowPolicy, DEFAULT_CAPACITY};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "VIGIL_CONFIG";

/// Application name used for config file discovery
pub const APP_NAME: &str = "vigil";

/// Default frame-skip ratio (process 1 of every 30 frames)
pub const DEFAULT_FRAME_SKIP: u64 = 30;

/// Complete server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub event_port: u16,
    pub artifact_port: u16,
    pub bind_host: String,
    pub artifact_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub capacity: usize,
    pub overflow_policy: OverflowPolicy,
    pub frame_skip: u64,
    pub confidence_threshold: f64,
    pub detector: DetectorConfig,
    pub ffmpeg: FfmpegConfig,
    /// Image directory replayed when a source cannot be (re)opened
    pub fallback_sequence_dir: Option<PathBuf>,
    pub sources: Vec<SourceConfig>,
    /// Legacy `ID,URL` source list, merged after `sources`
    pub sources_file: Option<PathBuf>,
    pub timing: TimingConfig,
    pub logging: LoggingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            event_port: DEFAULT_EVENT_PORT,
            artifact_port: DEFAULT_ARTIFACT_PORT,
            bind_host: "0.0.0.0".to_string(),
            artifact_dir: PathBuf::from("./detection_images"),
            temp_dir: PathBuf::from("./temp_frames"),
            capacity: DEFAULT_CAPACITY,
            overflow_policy: OverflowPolicy::default(),
            frame_skip: DEFAULT_FRAME_SKIP,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            detector: DetectorConfig::default(),
            ffmpeg: FfmpegConfig::default(),
            fallback_sequence_dir: None,
            sources: Vec::new(),
            sources_file: None,
            timing: TimingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// One configured source
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    /// Stream URL, video file path, or `sequence:<dir>`
    pub input: String,
    /// Per-source override of the global frame-skip ratio
    #[serde(default)]
    pub frame_skip: Option<u64>,
}

impl SourceConfig {
    pub fn new(id: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            input: input.into(),
            frame_skip: None,
        }
    }
}

/// External detector command
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub program: String,
    pub args: Vec<String>,
    /// Per-invocation limit; 0 disables it
    pub timeout_secs: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["./detect.py".to_string()],
            timeout_secs: 30,
        }
    }
}

impl DetectorConfig {
    pub fn invoker(&self) -> CommandInvoker {
        let timeout = (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs));
        CommandInvoker::new(self.program.clone(), self.args.clone()).with_timeout(timeout)
    }
}

/// ffmpeg decoder settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FfmpegConfig {
    pub program: String,
    pub open_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub jpeg_quality: u8,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        let options = FfmpegOptions::default();
        Self {
            program: options.program,
            open_timeout_secs: options.open_timeout.as_secs(),
            read_timeout_secs: options.read_timeout.as_secs(),
            jpeg_quality: options.jpeg_quality,
        }
    }
}

impl FfmpegConfig {
    pub fn options(&self) -> FfmpegOptions {
        FfmpegOptions {
            program: self.program.clone(),
            open_timeout: Duration::from_secs(self.open_timeout_secs),
            read_timeout: Duration::from_secs(self.read_timeout_secs),
            jpeg_quality: self.jpeg_quality,
        }
    }
}

/// Worker pacing, in milliseconds
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub live_frame_delay_ms: u64,
    pub file_frame_delay_ms: u64,
    pub sequence_frame_delay_ms: u64,
    pub read_error_delay_ms: u64,
    pub reopen_backoff_ms: u64,
    pub max_consecutive_errors: u32,
    /// Delay between starting consecutive workers
    pub worker_start_stagger_ms: u64,
    /// How long shutdown waits for each worker
    pub worker_join_timeout_ms: u64,
    /// Per-connection I/O deadline of both servers
    pub connection_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            live_frame_delay_ms: 100,
            file_frame_delay_ms: 1000,
            sequence_frame_delay_ms: 3000,
            read_error_delay_ms: 500,
            reopen_backoff_ms: 1000,
            max_consecutive_errors: 5,
            worker_start_stagger_ms: 500,
            worker_join_timeout_ms: 5000,
            connection_timeout_ms: 30_000,
        }
    }
}

impl TimingConfig {
    pub fn worker_timing(&self) -> WorkerTiming {
        WorkerTiming {
            live_frame_delay: millis_to_duration(self.live_frame_delay_ms),
            file_frame_delay: millis_to_duration(self.file_frame_delay_ms),
            sequence_frame_delay: millis_to_duration(self.sequence_frame_delay_ms),
            read_error_delay: millis_to_duration(self.read_error_delay_ms),
            reopen_backoff: millis_to_duration(self.reopen_backoff_ms),
            max_consecutive_errors: self.max_consecutive_errors,
        }
    }
}

/// Log output settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    /// Also append log lines to this file
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "vigil_server=info".to_string(),
            file: None,
        }
    }
}

/// Values supplied on the command line (or through their env variables)
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub event_port: Option<u16>,
    pub artifact_port: Option<u16>,
    pub bind_host: Option<String>,
    pub artifact_dir: Option<PathBuf>,
    pub temp_dir: Option<PathBuf>,
    pub capacity: Option<usize>,
    pub frame_skip: Option<u64>,
    pub confidence_threshold: Option<f64>,
    pub detector_program: Option<String>,
    pub detector_args: Option<Vec<String>>,
    pub fallback_sequence_dir: Option<PathBuf>,
    pub sources_file: Option<PathBuf>,
    pub log_level: Option<String>,
}

impl ServerConfig {
    /// Resolve, read, override, merge sources and validate
    pub fn load(cli_config: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self> {
        let mut config = match resolve_config_path(cli_config, CONFIG_ENV_VAR, APP_NAME) {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                load_toml::<ServerConfig>(&path)?
            }
            None => {
                debug!("No configuration file found, using defaults");
                ServerConfig::default()
            }
        };

        config.apply_overrides(overrides);
        config.merge_sources_file()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid configuration: {}", e)))
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(port) = overrides.event_port {
            self.event_port = port;
        }
        if let Some(port) = overrides.artifact_port {
            self.artifact_port = port;
        }
        if let Some(host) = &overrides.bind_host {
            self.bind_host = host.clone();
        }
        if let Some(dir) = &overrides.artifact_dir {
            self.artifact_dir = dir.clone();
        }
        if let Some(dir) = &overrides.temp_dir {
            self.temp_dir = dir.clone();
        }
        if let Some(capacity) = overrides.capacity {
            self.capacity = capacity;
        }
        if let Some(skip) = overrides.frame_skip {
            self.frame_skip = skip;
        }
        if let Some(threshold) = overrides.confidence_threshold {
            self.confidence_threshold = threshold;
        }
        if let Some(program) = &overrides.detector_program {
            self.detector.program = program.clone();
        }
        if let Some(args) = &overrides.detector_args {
            self.detector.args = args.clone();
        }
        if let Some(dir) = &overrides.fallback_sequence_dir {
            self.fallback_sequence_dir = Some(dir.clone());
        }
        if let Some(file) = &overrides.sources_file {
            self.sources_file = Some(file.clone());
        }
        if let Some(level) = &overrides.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Append the entries of `sources_file`, if configured
    pub fn merge_sources_file(&mut self) -> Result<()> {
        let Some(path) = self.sources_file.clone() else {
            return Ok(());
        };

        let content = std::fs::read_to_string(&path).map_err(|e| {
            Error::Config(format!("Cannot read sources file {}: {}", path.display(), e))
        })?;
        let sources = parse_sources_list(&content);
        info!("Loaded {} sources from {}", sources.len(), path.display());
        self.sources.extend(sources);
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(Error::Config(
                "No sources configured; add [[sources]] entries or a sources_file \
                 with lines like 'CAM1,rtsp://192.168.1.100:554/stream'"
                    .to_string(),
            ));
        }
        if self.capacity == 0 {
            return Err(Error::Config("capacity must be at least 1".to_string()));
        }
        if self.frame_skip == 0 {
            return Err(Error::Config("frame_skip must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(Error::Config(format!(
                "confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        if self.timing.max_consecutive_errors == 0 {
            return Err(Error::Config("timing.max_consecutive_errors must be at least 1".to_string()));
        }

        // Scratch frame files are named after the sanitized id
        let mut seen: HashMap<String, &str> = HashMap::new();
        for source in &self.sources {
            if source.id.trim().is_empty() {
                return Err(Error::Config(format!("Source '{}' has an empty id", source.input)));
            }
            if source.input.trim().is_empty() {
                return Err(Error::Config(format!("Source '{}' has an empty input", source.id)));
            }
            if source.frame_skip == Some(0) {
                return Err(Error::Config(format!("Source '{}': frame_skip must be at least 1", source.id)));
            }
            if let Some(previous) = seen.insert(sanitize_source_id(&source.id), source.id.as_str()) {
                if previous == source.id {
                    return Err(Error::Config(format!("Duplicate source id '{}'", source.id)));
                }
                return Err(Error::Config(format!(
                    "Source ids '{}' and '{}' map to the same file name",
                    previous, source.id
                )));
            }
        }
        Ok(())
    }

    pub async fn event_addr(&self) -> Result<SocketAddr> {
        socket_addr(&self.bind_host, self.event_port).await
    }

    pub async fn artifact_addr(&self) -> Result<SocketAddr> {
        socket_addr(&self.bind_host, self.artifact_port).await
    }

    /// Worker parameters for one configured source
    pub fn worker_config(&self, source: &SourceConfig) -> WorkerConfig {
        WorkerConfig {
            source_id: source.id.clone(),
            frame_skip: source.frame_skip.unwrap_or(self.frame_skip),
            confidence_threshold: self.confidence_threshold,
            temp_dir: self.temp_dir.clone(),
            artifact_dir: self.artifact_dir.clone(),
            timing: self.timing.worker_timing(),
        }
    }

    /// Classified input of one configured source
    pub fn source_input(&self, source: &SourceConfig) -> SourceInput {
        SourceInput::parse(&source.input)
    }

    pub fn connection_timeout(&self) -> Duration {
        millis_to_duration(self.timing.connection_timeout_ms)
    }

    pub fn worker_start_stagger(&self) -> Duration {
        millis_to_duration(self.timing.worker_start_stagger_ms)
    }

    pub fn worker_join_timeout(&self) -> Duration {
        millis_to_duration(self.timing.worker_join_timeout_ms)
    }
}

/// Resolve `host:port`; IP literals parse directly, host names go through the resolver
async fn socket_addr(host: &str, port: u16) -> Result<SocketAddr> {
    let host = host.trim();
    // Bare IPv6 literals need brackets in `host:port` form
    let candidate = if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    };
    if let Ok(addr) = candidate.parse::<SocketAddr>() {
        return Ok(addr);
    }

    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| Error::Config(format!("Invalid bind address '{}': {}", candidate, e)))?;
    let addr = addrs
        .next()
        .ok_or_else(|| Error::Config(format!("Bind host '{}' resolved to no address", host)))?;
    debug!("Resolved bind host {} to {}", host, addr);
    Ok(addr)
}

/// Parse a legacy source list: `ID,URL` per line, blank lines and `#` comments ignored
///
/// Everything after the first comma is the input, so URLs may contain commas.
/// Lines without a comma are skipped with a warning.
pub fn parse_sources_list(content: &str) -> Vec<SourceConfig> {
    let mut sources = Vec::new();

    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match line.split_once(',') {
            Some((id, input)) if !id.trim().is_empty() && !input.trim().is_empty() => {
                sources.push(SourceConfig::new(id.trim(), input.trim()));
            }
            _ => warn!("Ignoring malformed source line {}: '{}'", index + 1, line),
        }
    }

    sources
}
