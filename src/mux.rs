use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, trace};

use crate::bus::BusTransport;
use crate::errors::{BusError, BusResult};

/// Downstream ports on one multiplexer
pub const MAX_CHANNELS: u8 = 8;

/// Contiguous block of candidate multiplexer addresses.
///
/// These are read-only bounds held by the selector, never shared mutable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MuxAddressRange {
    first: u8,
    count: u8,
}

impl MuxAddressRange {
    /// Channel multiplexers sit at the top of the 7-bit address space
    pub const DEFAULT_FIRST: u8 = 0x70;
    pub const MAX_COUNT: u8 = 8;

    /// `None` unless `count` is 1..=8 and the whole block is a valid 7-bit address
    pub const fn new(first: u8, count: u8) -> Option<Self> {
        if count == 0 || count > Self::MAX_COUNT || first as u16 + count as u16 - 1 > 0x7f {
            return None;
        }
        Some(Self { first, count })
    }

    pub fn first(&self) -> u8 {
        self.first
    }

    pub fn last(&self) -> u8 {
        self.first + self.count - 1
    }

    pub fn contains(&self, address: u8) -> bool {
        (self.first..=self.last()).contains(&address)
    }

    pub fn iter(&self) -> impl Iterator<Item = u8> {
        self.first..=self.last()
    }
}

impl Default for MuxAddressRange {
    fn default() -> Self {
        Self {
            first: Self::DEFAULT_FIRST,
            count: Self::MAX_COUNT,
        }
    }
}

/// One physical sensor slot: a multiplexer address and one of its channels
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MuxChannel {
    pub mux_address: u8,
    pub channel: u8,
}

impl MuxChannel {
    pub const fn new(mux_address: u8, channel: u8) -> Self {
        Self { mux_address, channel }
    }

    /// Control-register mask enabling only this channel
    pub fn mask(&self) -> Option<u8> {
        (self.channel < MAX_CHANNELS).then(|| 1u8 << self.channel)
    }
}

impl fmt::Display for MuxChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}/{}", self.mux_address, self.channel)
    }
}

/// Keeps at most one multiplexer channel live on the shared bus.
///
/// Every ranging sensor answers at the same default address, so a second live
/// channel would put two devices on one address. `select` always clears every
/// multiplexer in range first, which makes it safe to call from any state.
#[derive(Debug, Clone)]
pub struct ChannelSelector {
    range: MuxAddressRange,
    settle: Duration,
    switch_delay: Duration,
}

impl ChannelSelector {
    pub fn new(range: MuxAddressRange, settle: Duration, switch_delay: Duration) -> Self {
        Self {
            range,
            settle,
            switch_delay,
        }
    }

    pub fn range(&self) -> MuxAddressRange {
        self.range
    }

    /// Clear the channel mask of every multiplexer in range.
    ///
    /// Absent multiplexers do not acknowledge; that is expected and ignored.
    pub async fn disable_all(&self, bus: &mut dyn BusTransport) {
        for address in self.range.iter() {
            if let Err(e) = bus.send_byte(address, 0).await {
                trace!("[mux] clear {:#04x} not acknowledged: {}", address, e);
            }
        }
        pause(self.settle).await;
    }

    /// Clear the channel mask of a single multiplexer.
    pub async fn disable(&self, bus: &mut dyn BusTransport, mux_address: u8) -> BusResult<()> {
        self.check_address(mux_address)?;
        let result = bus.send_byte(mux_address, 0).await;
        pause(self.settle).await;
        result
    }

    /// Enable exactly `slot.channel` on `slot.mux_address`, with every other
    /// channel on every managed multiplexer disabled.
    pub async fn select(&self, bus: &mut dyn BusTransport, slot: MuxChannel) -> BusResult<()> {
        let mask = slot
            .mask()
            .ok_or(BusError::ChannelOutOfRange { channel: slot.channel })?;
        self.check_address(slot.mux_address)?;

        self.disable_all(bus).await;

        trace!("[mux] {:#04x} <- {:#010b}", slot.mux_address, mask);
        bus.send_byte(slot.mux_address, mask).await?;
        pause(self.switch_delay).await;
        Ok(())
    }

    /// Whether a multiplexer acknowledges its address
    pub async fn probe(&self, bus: &mut dyn BusTransport, mux_address: u8) -> bool {
        match bus.probe(mux_address).await {
            Ok(()) => true,
            Err(e) => {
                debug!("[mux] no multiplexer at {:#04x}: {}", mux_address, e);
                false
            }
        }
    }

    fn check_address(&self, address: u8) -> BusResult<()> {
        if self.range.contains(address) {
            Ok(())
        } else {
            Err(BusError::AddressOutOfRange {
                address,
                first: self.range.first(),
                last: self.range.last(),
            })
        }
    }
}

pub(crate) async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}
