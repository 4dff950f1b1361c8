use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::errors::{ConfigError, ConfigResult};
use crate::mux::{MuxAddressRange, MAX_CHANNELS};
use crate::sensors::TimingPreset;

/// Root of `tof.toml`
#[derive(Debug, Clone, Deserialize)]
pub struct ArrayConfig {
    pub bus: BusSettings,
    #[serde(default)]
    pub mux: MuxSettings,
    #[serde(default)]
    pub sensor: SensorSettings,
    #[serde(default)]
    pub mode: RegistryMode,
    #[serde(default)]
    pub manual: ManualSettings,
    #[serde(default)]
    pub reading: ReadingSettings,
}

/// `[bus]` section
#[derive(Debug, Clone, Deserialize)]
pub struct BusSettings {
    pub path: String,
    pub sda_pin: Option<u8>,
    pub scl_pin: Option<u8>,
    #[serde(default = "default_clock_hz")]
    pub clock_hz: u32,
}

/// `[mux]` section: the candidate multiplexer block and bus timing
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MuxSettings {
    pub first_address: u8,
    pub count: u8,
    /// Idle time after clearing channel masks
    pub settle_us: u64,
    /// Propagation time after enabling a channel
    pub switch_delay_ms: u64,
    /// Pause between probes while scanning
    pub scan_delay_ms: u64,
}

impl Default for MuxSettings {
    fn default() -> Self {
        Self {
            first_address: MuxAddressRange::DEFAULT_FIRST,
            count: MuxAddressRange::MAX_COUNT,
            settle_us: 200,
            switch_delay_ms: 10,
            scan_delay_ms: 10,
        }
    }
}

impl MuxSettings {
    pub fn address_range(&self) -> ConfigResult<MuxAddressRange> {
        MuxAddressRange::new(self.first_address, self.count).ok_or_else(|| {
            ConfigError::InvalidValue {
                field: "mux".to_string(),
                reason: format!(
                    "{} multiplexer(s) from {:#04x} must be 1..=8 addresses within 0x00..=0x7f",
                    self.count, self.first_address
                ),
            }
        })
    }

    pub fn settle(&self) -> Duration {
        Duration::from_micros(self.settle_us)
    }

    pub fn switch_delay(&self) -> Duration {
        Duration::from_millis(self.switch_delay_ms)
    }

    pub fn scan_delay(&self) -> Duration {
        Duration::from_millis(self.scan_delay_ms)
    }
}

/// `[sensor]` section: which driver sits behind every channel
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SensorSettings {
    pub driver: String,
    pub address: u8,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            driver: "vl53l0x".to_string(),
            address: 0x29,
        }
    }
}

/// How the registry is populated at startup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryMode {
    #[default]
    Discover,
    Manual,
}

/// `[manual]` section, used when `mode = "manual"`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ManualSettings {
    pub mux_address: u8,
    pub capacity: usize,
    #[serde(rename = "sensor")]
    pub sensors: Vec<ManualSensor>,
}

impl Default for ManualSettings {
    fn default() -> Self {
        Self {
            mux_address: MuxAddressRange::DEFAULT_FIRST,
            capacity: MAX_CHANNELS as usize,
            sensors: Vec::new(),
        }
    }
}

/// One `[[manual.sensor]]` entry
#[derive(Debug, Clone, Deserialize)]
pub struct ManualSensor {
    pub channel: u8,
    pub address: Option<u8>,
    pub preset: Option<TimingPreset>,
    pub timing_budget_us: Option<u32>,
}

/// `[reading]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReadingSettings {
    pub stabilize_ms: u64,
    pub interval_ms: u64,
    pub rescan_interval_s: Option<u64>,
}

impl Default for ReadingSettings {
    fn default() -> Self {
        Self {
            stabilize_ms: 1,
            interval_ms: 100,
            rescan_interval_s: None,
        }
    }
}

impl ReadingSettings {
    pub fn stabilize(&self) -> Duration {
        Duration::from_millis(self.stabilize_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn rescan_interval(&self) -> Option<Duration> {
        self.rescan_interval_s.map(Duration::from_secs)
    }
}

fn default_clock_hz() -> u32 {
    100_000
}

impl ArrayConfig {
    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        let parsed: ArrayConfig = toml::from_str(content)?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Cross-field checks serde cannot express
    pub fn validate(&self) -> ConfigResult<()> {
        let range = self.mux.address_range()?;

        if self.sensor.address > 0x7f || range.contains(self.sensor.address) {
            return Err(ConfigError::InvalidValue {
                field: "sensor.address".to_string(),
                reason: format!(
                    "{:#04x} is not a 7-bit address outside the multiplexer block",
                    self.sensor.address
                ),
            });
        }

        if self.mode == RegistryMode::Manual {
            if !range.contains(self.manual.mux_address) {
                return Err(ConfigError::InvalidValue {
                    field: "manual.mux_address".to_string(),
                    reason: format!(
                        "{:#04x} is outside {:#04x}..={:#04x}",
                        self.manual.mux_address,
                        range.first(),
                        range.last()
                    ),
                });
            }
            if self.manual.capacity == 0 || self.manual.capacity > MAX_CHANNELS as usize {
                return Err(ConfigError::InvalidValue {
                    field: "manual.capacity".to_string(),
                    reason: format!("{} is not in 1..=8", self.manual.capacity),
                });
            }
            if self.manual.sensors.is_empty() {
                return Err(ConfigError::ValidationError(
                    "manual mode needs at least one [[manual.sensor]]".to_string(),
                ));
            }
            // Rescanning is a full discovery pass and would replace the configured set
            if self.reading.rescan_interval_s.is_some() {
                return Err(ConfigError::InvalidValue {
                    field: "reading.rescan_interval_s".to_string(),
                    reason: "only supported in discover mode".to_string(),
                });
            }
        }

        if self.reading.interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "reading.interval_ms".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

/// Loads config from TOML file
pub fn load_array_config(path: &str) -> ConfigResult<ArrayConfig> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::LoadError {
        path: path.to_string(),
        source,
    })?;
    ArrayConfig::from_toml(&content)
}
