use clap::ArgMatches;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::modbus::protocol::{DataType, ReadRequest};
use crate::modbus::session::{
    SessionOptions, DEFAULT_CONNECT_TIMEOUT, DEFAULT_DISCONNECT_TIMEOUT, DEFAULT_READ_BUFFER_SIZE,
};
use crate::utils::error::ModbusError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    pub connection: ConnectionConfig,
    pub request: RequestConfig,
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u32,
    /// 0 disables the limit.
    pub connect_timeout_ms: u64,
    /// 0 disables response timeouts.
    pub response_timeout_ms: u64,
    pub disconnect_timeout_ms: u64,
    pub read_buffer_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
    pub address: String,
    pub data_type: DataType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Console,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub format: OutputFormat,
    pub display_as_hex: bool,
    pub show_sent_frames: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 502,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT.as_millis() as u64,
            response_timeout_ms: 0,
            disconnect_timeout_ms: DEFAULT_DISCONNECT_TIMEOUT.as_millis() as u64,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            address: "100".to_string(),
            data_type: DataType::Int,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Console,
            display_as_hex: false,
            show_sent_frames: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            connection: ConnectionConfig::default(),
            request: RequestConfig::default(),
            display: DisplayConfig::default(),
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = ModbusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "console" => Ok(OutputFormat::Console),
            "json" => Ok(OutputFormat::Json),
            other => Err(ModbusError::ConfigError(format!(
                "unknown output format '{}'",
                other
            ))),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ModbusError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ModbusError::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        info!("📋 Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ModbusError> {
        let path = path.as_ref();
        // Create directory if it doesn't exist
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("💾 Configuration written to {}", path.display());
        Ok(())
    }

    /// Overrides file or default values with command line arguments.
    pub fn apply_matches(&mut self, matches: &ArgMatches) -> Result<(), ModbusError> {
        if let Some(host) = matches.get_one::<String>("host") {
            self.connection.host = host.clone();
        }
        if let Some(port) = matches.get_one::<String>("port") {
            self.connection.port = port
                .trim()
                .parse()
                .map_err(|_| ModbusError::ConfigError(format!("invalid port '{}'", port)))?;
        }
        if let Some(format) = matches.get_one::<String>("format") {
            self.display.format = format.parse()?;
        }
        if matches.get_flag("hex") {
            self.display.display_as_hex = true;
        }
        debug!("Effective configuration: {:?}", self);
        self.validate()
    }

    /// Checks values that would otherwise only fail at connect time.
    pub fn validate(&self) -> Result<(), ModbusError> {
        if self.connection.host.trim().is_empty() {
            return Err(ModbusError::InvalidAddress(self.connection.host.clone()));
        }
        if self.connection.port == 0 || self.connection.port > u16::MAX as u32 {
            return Err(ModbusError::InvalidPort(self.connection.port));
        }
        if self.connection.read_buffer_size == 0 {
            return Err(ModbusError::ConfigError(
                "read_buffer_size must be greater than zero".to_string(),
            ));
        }
        ReadRequest::parse(&self.request.address, self.request.data_type.as_str())?;
        Ok(())
    }

    pub fn session_options(&self) -> SessionOptions {
        let optional = |ms: u64| (ms > 0).then(|| Duration::from_millis(ms));
        SessionOptions {
            connect_timeout: optional(self.connection.connect_timeout_ms),
            response_timeout: optional(self.connection.response_timeout_ms),
            disconnect_timeout: Duration::from_millis(self.connection.disconnect_timeout_ms),
            read_buffer_size: self.connection.read_buffer_size,
        }
    }
}
