use thiserror::Error;
use crate::bus::i2c::I2CError;

/// Transport and channel-selection errors
#[derive(Error, Debug)]
pub enum BusError {
    #[error("I2C communication failed: {0}")]
    I2c(#[from] I2CError),

    #[error("No acknowledge from device at {address:#04x}")]
    Nack { address: u8 },

    #[error("Short read from {address:#04x}: expected {expected} bytes, got {actual}")]
    ShortRead { address: u8, expected: usize, actual: usize },

    #[error("Multiplexer channel {channel} out of range (0..8)")]
    ChannelOutOfRange { channel: u8 },

    #[error("Multiplexer address {address:#04x} outside managed range {first:#04x}..={last:#04x}")]
    AddressOutOfRange { address: u8, first: u8, last: u8 },
}

/// Ranging sensor driver errors
#[derive(Error, Debug)]
pub enum SensorError {
    #[error("Bus transaction failed: {0}")]
    Bus(#[from] BusError),

    #[error("Sensor '{sensor}' initialization failed: {reason}")]
    InitError { sensor: String, reason: String },

    #[error("Sensor '{sensor}' wrong chip ID: expected {expected:#04x}, got {actual:#04x}")]
    WrongChipId { sensor: String, expected: u8, actual: u8 },

    #[error("Sensor '{sensor}' timed out after {timeout_ms}ms waiting for {stage}")]
    Timeout { sensor: String, stage: &'static str, timeout_ms: u64 },

    #[error("Sensor '{sensor}' rejected timing budget of {budget_us}us: {reason}")]
    InvalidTimingBudget { sensor: String, budget_us: u32, reason: String },

    #[error("Unsupported sensor driver: '{driver}'")]
    UnsupportedDriver { driver: String },
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration from '{path}': {source}")]
    LoadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration format: {0}")]
    FormatError(#[from] toml::de::Error),

    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Registry population and lookup errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Channel {channel} out of range (0..8)")]
    ChannelOutOfRange { channel: u8 },

    #[error("Registry is full ({capacity} sensors)")]
    CapacityExceeded { capacity: usize },

    #[error("A sensor is already registered at multiplexer {mux_address:#04x} channel {channel}")]
    DuplicateSlot { mux_address: u8, channel: u8 },

    #[error("No sensor registered on channel {channel}")]
    SensorNotFound { channel: u8 },

    #[error("Channel selection failed: {0}")]
    Selection(#[source] BusError),

    #[error("Sensor registration failed: {0}")]
    RegistrationError(#[source] SensorError),

    #[error("Registry configuration failed: {0}")]
    Configuration(#[from] ConfigError),
}

/// Result type aliases for convenience
pub type BusResult<T> = Result<T, BusError>;
pub type SensorResult<T> = Result<T, SensorError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
pub type RegistryResult<T> = Result<T, RegistryError>;
