// ── Context ──
//
// Explicit application context, constructed once and handed to every
// component that needs it. Validation happens up front so a misconfigured
// context fails at construction instead of at first use.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::error::CoreError;
use crate::model::{BridgeRequirements, DEFAULT_STREAMING_PORT};

/// Bridges truncate `devicetype` beyond this many characters.
const MAX_DEVICE_TYPE_LEN: usize = 40;

/// Frame cadence and destination port for the streaming loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    pub update_frequency_hz: u32,
    pub port: u16,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            update_frequency_hz: 50,
            port: DEFAULT_STREAMING_PORT,
        }
    }
}

impl StreamSettings {
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs(1) / self.update_frequency_hz.max(1)
    }
}

/// Timeouts and poll intervals of the connection flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowTiming {
    pub discovery_timeout: Duration,
    pub push_link_timeout: Duration,
    pub push_link_poll_interval: Duration,
    pub http_timeout: Duration,
    /// Bridge check period while a stream is running.
    pub monitor_streaming_interval: Duration,
    /// Bridge check period while connected but idle.
    pub monitor_idle_interval: Duration,
}

impl Default for FlowTiming {
    fn default() -> Self {
        Self {
            discovery_timeout: Duration::from_secs(5),
            push_link_timeout: Duration::from_secs(30),
            push_link_poll_interval: Duration::from_millis(1000),
            http_timeout: Duration::from_secs(10),
            monitor_streaming_interval: Duration::from_secs(5),
            monitor_idle_interval: Duration::from_secs(15),
        }
    }
}

/// Caller-supplied configuration, validated by [`Context::new`].
#[derive(Debug, Clone)]
pub struct ContextConfig {
    pub app_name: String,
    pub device_name: String,
    /// Path of the encrypted credential store file.
    pub storage_path: PathBuf,
    pub encryption_key: SecretString,
    pub stream: StreamSettings,
    pub timing: FlowTiming,
    pub requirements: BridgeRequirements,
    /// Start streaming as soon as a connect reaches ReadyToStart.
    pub auto_start: bool,
}

impl ContextConfig {
    pub fn new(
        app_name: impl Into<String>,
        device_name: impl Into<String>,
        storage_path: impl Into<PathBuf>,
        encryption_key: SecretString,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            device_name: device_name.into(),
            storage_path: storage_path.into(),
            encryption_key,
            stream: StreamSettings::default(),
            timing: FlowTiming::default(),
            requirements: BridgeRequirements::default(),
            auto_start: true,
        }
    }
}

/// Validated, immutable application context.
#[derive(Debug)]
pub struct Context {
    config: ContextConfig,
}

impl Context {
    pub fn new(config: ContextConfig) -> Result<Arc<Self>, CoreError> {
        if config.app_name.trim().is_empty() {
            return Err(config_error("app_name must not be empty"));
        }
        if config.device_name.trim().is_empty() {
            return Err(config_error("device_name must not be empty"));
        }
        if config.storage_path.as_os_str().is_empty() {
            return Err(config_error("storage_path must be set"));
        }
        if config.encryption_key.expose_secret().is_empty() {
            return Err(config_error("encryption key must not be empty"));
        }
        if !(1..=100).contains(&config.stream.update_frequency_hz) {
            return Err(config_error(&format!(
                "update frequency must be within 1..=100 Hz, got {}",
                config.stream.update_frequency_hz
            )));
        }
        if config.timing.push_link_poll_interval.is_zero() {
            return Err(config_error("push-link poll interval must be non-zero"));
        }
        if config.timing.monitor_streaming_interval.is_zero()
            || config.timing.monitor_idle_interval.is_zero()
        {
            return Err(config_error("bridge monitor intervals must be non-zero"));
        }
        Ok(Arc::new(Self { config }))
    }

    pub fn app_name(&self) -> &str {
        &self.config.app_name
    }

    pub fn device_name(&self) -> &str {
        &self.config.device_name
    }

    pub fn storage_path(&self) -> &std::path::Path {
        &self.config.storage_path
    }

    pub(crate) fn encryption_key(&self) -> &SecretString {
        &self.config.encryption_key
    }

    pub fn stream(&self) -> &StreamSettings {
        &self.config.stream
    }

    pub fn timing(&self) -> &FlowTiming {
        &self.config.timing
    }

    pub fn requirements(&self) -> &BridgeRequirements {
        &self.config.requirements
    }

    pub fn auto_start(&self) -> bool {
        self.config.auto_start
    }

    /// `devicetype` sent during push-link: `app#device`, capped at 40 chars.
    pub fn device_type(&self) -> String {
        format!("{}#{}", self.config.app_name, self.config.device_name)
            .chars()
            .take(MAX_DEVICE_TYPE_LEN)
            .collect()
    }
}

fn config_error(message: &str) -> CoreError {
    CoreError::Config {
        message: message.to_owned(),
    }
}
