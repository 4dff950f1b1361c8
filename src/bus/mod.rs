pub mod i2c;
#[cfg(test)]
pub mod sim;

use async_trait::async_trait;
use crate::errors::BusResult;

/// Raw I2C transactions the hub needs from a bus.
///
/// Each call is one independently bounded transaction: a device that does not
/// acknowledge fails that call only, so a scan can move on to the next address.
#[async_trait]
pub trait BusTransport: Send {
    /// Address-only transaction; succeeds if a device acknowledges `address`.
    async fn probe(&mut self, address: u8) -> BusResult<()>;

    /// Write a single byte with no register prefix (multiplexer control register).
    async fn send_byte(&mut self, address: u8, byte: u8) -> BusResult<()>;

    async fn write_byte(&mut self, address: u8, reg: u8, byte: u8) -> BusResult<()>;

    async fn write_bytes(&mut self, address: u8, reg: u8, bytes: &[u8]) -> BusResult<()>;

    async fn read_bytes(&mut self, address: u8, reg: u8, buf: &mut [u8]) -> BusResult<()>;
}
