use async_trait::async_trait;
#[cfg(target_os = "linux")]
use i2cdev::linux::{LinuxI2CDevice, LinuxI2CError};
#[cfg(target_os = "linux")]
use i2cdev::core::I2CDevice;
use tracing::{debug, warn};

use super::BusTransport;
use crate::config::BusSettings;
#[cfg(target_os = "linux")]
use crate::errors::BusError;
use crate::errors::BusResult;

/// I2C bus error type - platform specific
#[cfg(target_os = "linux")]
pub type I2CError = LinuxI2CError;

#[cfg(not(target_os = "linux"))]
#[derive(Debug)]
pub struct I2CError(String);

#[cfg(not(target_os = "linux"))]
impl std::fmt::Display for I2CError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "I2C not supported on this platform: {}", self.0)
    }
}

#[cfg(not(target_os = "linux"))]
impl std::error::Error for I2CError {}

/// I2C bus backed by a `/dev/i2c-N` character device
#[cfg(target_os = "linux")]
pub struct I2CBus {
    device: LinuxI2CDevice,
}

#[cfg(not(target_os = "linux"))]
pub struct I2CBus {
    _phantom: std::marker::PhantomData<()>,
}

fn log_bus_settings(settings: &BusSettings) {
    if settings.sda_pin.is_some() || settings.scl_pin.is_some() {
        warn!(
            "[bus] sda/scl pins ({:?}/{:?}) are owned by the platform; ignoring for {}",
            settings.sda_pin, settings.scl_pin, settings.path
        );
    }
    debug!("[bus] {} requested clock {}Hz", settings.path, settings.clock_hz);
}

#[cfg(target_os = "linux")]
impl I2CBus {
    /// Open the bus described by `settings`.
    ///
    /// Pin assignment and bus clock are fixed by the kernel/device tree on Linux,
    /// so they are only reported here.
    pub fn open(settings: &BusSettings) -> Result<Self, I2CError> {
        log_bus_settings(settings);
        let device = LinuxI2CDevice::new(&settings.path, 0)?;
        Ok(Self { device })
    }
}

#[cfg(target_os = "linux")]
#[async_trait]
impl BusTransport for I2CBus {
    async fn probe(&mut self, address: u8) -> BusResult<()> {
        self.device.set_slave_address(address as u16)?;
        // SMBus quick write carries no payload, same as an i2cdetect probe
        self.device.smbus_write_quick(false)?;
        Ok(())
    }

    async fn send_byte(&mut self, address: u8, byte: u8) -> BusResult<()> {
        self.device.set_slave_address(address as u16)?;
        self.device.smbus_write_byte(byte)?;
        Ok(())
    }

    async fn write_byte(&mut self, address: u8, reg: u8, byte: u8) -> BusResult<()> {
        self.device.set_slave_address(address as u16)?;
        self.device.smbus_write_byte_data(reg, byte)?;
        Ok(())
    }

    async fn write_bytes(&mut self, address: u8, reg: u8, bytes: &[u8]) -> BusResult<()> {
        self.device.set_slave_address(address as u16)?;
        self.device.smbus_write_i2c_block_data(reg, bytes)?;
        Ok(())
    }

    async fn read_bytes(&mut self, address: u8, reg: u8, buf: &mut [u8]) -> BusResult<()> {
        self.device.set_slave_address(address as u16)?;

        if let [only] = buf {
            // Use SMBus read byte data for single byte reads
            *only = self.device.smbus_read_byte_data(reg)?;
            return Ok(());
        }

        // Use SMBus block read for multi-byte reads
        let temp_buf = self.device.smbus_read_i2c_block_data(reg, buf.len() as u8)?;
        if temp_buf.len() != buf.len() {
            return Err(BusError::ShortRead {
                address,
                expected: buf.len(),
                actual: temp_buf.len(),
            });
        }
        buf.copy_from_slice(&temp_buf);
        Ok(())
    }
}

#[cfg(not(target_os = "linux"))]
impl I2CBus {
    pub fn open(settings: &BusSettings) -> Result<Self, I2CError> {
        log_bus_settings(settings);
        Err(I2CError("I2C is only supported on Linux".to_string()))
    }
}

#[cfg(not(target_os = "linux"))]
#[async_trait]
impl BusTransport for I2CBus {
    async fn probe(&mut self, _address: u8) -> BusResult<()> {
        Err(I2CError("I2C is only supported on Linux".to_string()).into())
    }

    async fn send_byte(&mut self, _address: u8, _byte: u8) -> BusResult<()> {
        Err(I2CError("I2C is only supported on Linux".to_string()).into())
    }

    async fn write_byte(&mut self, _address: u8, _reg: u8, _byte: u8) -> BusResult<()> {
        Err(I2CError("I2C is only supported on Linux".to_string()).into())
    }

    async fn write_bytes(&mut self, _address: u8, _reg: u8, _bytes: &[u8]) -> BusResult<()> {
        Err(I2CError("I2C is only supported on Linux".to_string()).into())
    }

    async fn read_bytes(&mut self, _address: u8, _reg: u8, _buf: &mut [u8]) -> BusResult<()> {
        Err(I2CError("I2C is only supported on Linux".to_string()).into())
    }
}
