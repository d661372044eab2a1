//! Service configuration
//!
//! Loaded from YAML and overridden by `ACQSRV_`-prefixed environment
//! variables (`__` separates nesting levels, e.g. `ACQSRV_ARCHIVE__PATH`).

use crate::archive::{check_id, ArchiveLayout};
use crate::calc::CalculationElementPayload;
use crate::error::{AcqError, Result};
use crate::request::RequestLimits;
use crate::variable::VariablePayload;
use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use voltage_codec::Protocol;

pub const DEFAULT_CONFIG_PATH: &str = "config/acqsrv.yaml";

/// Complete service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcqConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerConfig {
    /// Milliseconds per tick
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

fn default_tick_ms() -> u64 {
    100
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 60_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArchiveConfig {
    /// SQLite database file
    pub path: String,
    /// Window capacity per series
    pub buffer_size: usize,
    pub layout: ArchiveLayout,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            path: "data/acqsrv.db".to_string(),
            buffer_size: 100,
            layout: ArchiveLayout::Table,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// Filter directive applied after startup (e.g. `debug`, `info,acqsrv=trace`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

/// Transport of one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TransportConfig {
    #[serde(rename_all = "camelCase")]
    ModbusTcp {
        host: String,
        #[serde(default = "default_modbus_port")]
        port: u16,
        #[serde(default = "default_unit_id")]
        unit_id: u8,
        #[serde(default = "default_timeout_ms")]
        timeout_ms: u64,
    },
    /// In-process PLC image
    Simulated,
}

fn default_modbus_port() -> u16 {
    502
}

fn default_unit_id() -> u8 {
    1
}

fn default_timeout_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub protocol: Protocol,
    pub transport: TransportConfig,
    #[serde(default)]
    pub limits: RequestLimits,
    #[serde(default)]
    pub variables: Vec<VariablePayload>,
    #[serde(default)]
    pub calculation_elements: Vec<CalculationElementPayload>,
}

impl DeviceConfig {
    /// Device with a simulated transport and no variables
    pub fn simulated(id: impl Into<String>, protocol: Protocol) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            protocol,
            transport: TransportConfig::Simulated,
            limits: RequestLimits::default(),
            variables: Vec::new(),
            calculation_elements: Vec::new(),
        }
    }
}

impl AcqConfig {
    /// Load from a YAML file plus environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(AcqError::config(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }

        let config: Self = Figment::new()
            .merge(Yaml::file(path))
            .merge(
                Env::prefixed("ACQSRV_")
                    .ignore(&["config", "log_dir"])
                    .split("__"),
            )
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse YAML text without environment overrides
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = Figment::from(Yaml::string(yaml)).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Cross-field checks that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.tick_ms == 0 {
            return Err(AcqError::config("scheduler.tickMs must be greater than zero"));
        }
        if self.archive.buffer_size == 0 {
            return Err(AcqError::config("archive.bufferSize must be greater than zero"));
        }
        if self.scheduler.reconnect.backoff_multiplier < 1.0 {
            return Err(AcqError::config(
                "scheduler.reconnect.backoffMultiplier must be at least 1.0",
            ));
        }

        let mut ids = HashSet::new();
        for device in &self.devices {
            if device.id.trim().is_empty() {
                return Err(AcqError::config("device id is required"));
            }
            check_id("device", &device.id)?;
            if !ids.insert(device.id.as_str()) {
                return Err(AcqError::AlreadyExists {
                    resource: "Device",
                    id: device.id.clone(),
                });
            }
            if device.protocol == Protocol::S7
                && matches!(device.transport, TransportConfig::ModbusTcp { .. })
            {
                return Err(AcqError::config(format!(
                    "device {}: s7 devices cannot use a modbusTcp transport",
                    device.id
                )));
            }
        }
        Ok(())
    }
}
