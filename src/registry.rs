use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::bus::BusTransport;
use crate::errors::{RegistryError, RegistryResult};
use crate::mux::{pause, ChannelSelector, MuxChannel, MAX_CHANNELS};
use crate::sensors::{RangingSensor, SensorFactory, TimingPreset};

/// A live sensor handle bound to the slot it was found or registered on.
///
/// The registry is the only owner of the handle; dropping the entry releases it.
pub struct SensorEntry {
    slot: MuxChannel,
    sensor: Box<dyn RangingSensor>,
}

impl SensorEntry {
    pub fn slot(&self) -> MuxChannel {
        self.slot
    }

    pub(crate) fn sensor(&self) -> &dyn RangingSensor {
        self.sensor.as_ref()
    }
}

/// Public description of a registered sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SensorInfo {
    pub slot: MuxChannel,
    pub address: u8,
    pub driver: &'static str,
}

/// Ordered set of sensors. Insertion order is discovery/registration order
/// and indices stay stable until the next `discover`.
pub struct SensorRegistry {
    selector: ChannelSelector,
    factory: Box<dyn SensorFactory>,
    entries: Vec<SensorEntry>,
    sensor_address: u8,
    manual_mux: u8,
    capacity: usize,
    scan_delay: Duration,
}

impl SensorRegistry {
    pub fn new(selector: ChannelSelector, factory: Box<dyn SensorFactory>, sensor_address: u8) -> Self {
        let manual_mux = selector.range().first();
        Self {
            selector,
            factory,
            entries: Vec::new(),
            sensor_address,
            manual_mux,
            capacity: MAX_CHANNELS as usize,
            scan_delay: Duration::ZERO,
        }
    }

    /// Multiplexer and capacity used by [`SensorRegistry::add_sensor`]
    pub fn with_manual_mux(mut self, mux_address: u8, capacity: usize) -> Self {
        self.manual_mux = mux_address;
        self.capacity = capacity;
        self
    }

    /// Pause after each probe and each channel attempt while discovering
    pub fn with_scan_delay(mut self, scan_delay: Duration) -> Self {
        self.scan_delay = scan_delay;
        self
    }

    pub fn selector(&self) -> &ChannelSelector {
        &self.selector
    }

    pub fn entries(&self) -> &[SensorEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn sensor_info(&self, index: usize) -> Option<SensorInfo> {
        self.entries.get(index).map(|entry| SensorInfo {
            slot: entry.slot,
            address: entry.sensor.address(),
            driver: entry.sensor.driver(),
        })
    }

    /// Release every handle and scan all multiplexers in range for sensors.
    ///
    /// Returns the number of sensors found. Absent multiplexers, empty
    /// channels and sensors that fail to initialise are skipped.
    pub async fn discover(&mut self, bus: &mut dyn BusTransport) -> usize {
        if !self.entries.is_empty() {
            debug!("[registry] releasing {} sensor handle(s) before rescan", self.entries.len());
            self.entries.clear();
        }

        info!(
            "[registry] scanning for multiplexers at {:#04x}..={:#04x}",
            self.selector.range().first(),
            self.selector.range().last()
        );
        self.selector.disable_all(bus).await;

        let mut present = Vec::new();
        for address in self.selector.range().iter() {
            if self.selector.probe(bus, address).await {
                info!("[registry] found multiplexer at {:#04x}", address);
                present.push(address);
            }
            pause(self.scan_delay).await;
        }

        for mux_address in present {
            for channel in 0..MAX_CHANNELS {
                let slot = MuxChannel::new(mux_address, channel);
                if let Some(sensor) = self.try_attach(bus, slot, self.sensor_address).await {
                    info!("[registry] found {} on {}", sensor.driver(), slot);
                    self.entries.push(SensorEntry { slot, sensor });
                }
                pause(self.scan_delay).await;
            }
        }

        self.selector.disable_all(bus).await;
        info!("[registry] total sensors found: {}", self.entries.len());
        self.entries.len()
    }

    /// Register one sensor on `channel` of the manual multiplexer.
    ///
    /// Returns the new entry's index.
    pub async fn add_sensor(
        &mut self,
        bus: &mut dyn BusTransport,
        channel: u8,
        sensor_address: u8,
    ) -> RegistryResult<usize> {
        if channel >= MAX_CHANNELS {
            return Err(RegistryError::ChannelOutOfRange { channel });
        }
        if self.entries.len() >= self.capacity {
            return Err(RegistryError::CapacityExceeded { capacity: self.capacity });
        }
        let slot = MuxChannel::new(self.manual_mux, channel);
        if self.index_of(slot).is_some() {
            return Err(RegistryError::DuplicateSlot {
                mux_address: slot.mux_address,
                channel,
            });
        }

        self.selector
            .select(bus, slot)
            .await
            .map_err(RegistryError::Selection)?;

        let mut sensor = self.factory.create();
        sensor
            .init(bus, sensor_address)
            .await
            .map_err(RegistryError::RegistrationError)?;

        info!("[registry] registered {} at {:#04x} on {}", sensor.driver(), sensor.address(), slot);
        self.entries.push(SensorEntry { slot, sensor });
        Ok(self.entries.len() - 1)
    }

    /// Index of the sensor on `channel` of the manual multiplexer
    pub fn sensor_index(&self, channel: u8) -> Option<usize> {
        self.index_of(MuxChannel::new(self.manual_mux, channel))
    }

    /// Linear lookup; the registry never holds more than a few dozen entries
    pub fn index_of(&self, slot: MuxChannel) -> Option<usize> {
        self.entries.iter().position(|entry| entry.slot == slot)
    }

    pub async fn set_measurement_timing_budget(
        &mut self,
        bus: &mut dyn BusTransport,
        channel: u8,
        budget_us: u32,
    ) -> RegistryResult<()> {
        let index = self
            .sensor_index(channel)
            .ok_or(RegistryError::SensorNotFound { channel })?;
        let entry = &mut self.entries[index];

        // The bus may have moved to another channel since this sensor was last used
        self.selector
            .select(bus, entry.slot)
            .await
            .map_err(RegistryError::Selection)?;

        entry
            .sensor
            .set_measurement_timing_budget(bus, budget_us)
            .await
            .map_err(RegistryError::RegistrationError)
    }

    pub async fn apply_preset(
        &mut self,
        bus: &mut dyn BusTransport,
        channel: u8,
        preset: TimingPreset,
    ) -> RegistryResult<()> {
        debug!("[registry] channel {}: applying {:?}", channel, preset);
        self.set_measurement_timing_budget(bus, channel, preset.budget_us()).await
    }

    async fn try_attach(
        &self,
        bus: &mut dyn BusTransport,
        slot: MuxChannel,
        sensor_address: u8,
    ) -> Option<Box<dyn RangingSensor>> {
        if let Err(e) = self.selector.select(bus, slot).await {
            warn!("[registry] could not select {}: {}", slot, e);
            return None;
        }

        let mut sensor = self.factory.create();
        match sensor.init(bus, sensor_address).await {
            Ok(()) => Some(sensor),
            Err(e) => {
                debug!("[registry] no sensor on {}: {}", slot, e);
                None
            }
        }
    }
}
