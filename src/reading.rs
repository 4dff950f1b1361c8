use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::bus::BusTransport;
use crate::mux::{pause, ChannelSelector, MuxChannel};
use crate::registry::{SensorEntry, SensorRegistry};

/// One distance sample. `valid == false` means the sensor saw nothing in
/// range or could not be read; `distance_mm` is then 0.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Reading {
    pub slot: MuxChannel,
    pub distance_mm: u16,
    pub valid: bool,
}

impl Reading {
    fn invalid(slot: MuxChannel) -> Self {
        Self {
            slot,
            distance_mm: 0,
            valid: false,
        }
    }
}

/// Measures registry entries one at a time with only that entry's channel live
#[derive(Debug, Clone)]
pub struct ReadingAggregator {
    stabilize: Duration,
}

impl ReadingAggregator {
    pub fn new(stabilize: Duration) -> Self {
        Self { stabilize }
    }

    /// One reading per entry, in registry order, invalid ones included.
    pub async fn read_all(&self, registry: &SensorRegistry, bus: &mut dyn BusTransport) -> Vec<Reading> {
        let selector = registry.selector();
        selector.disable_all(bus).await;

        let mut readings = Vec::with_capacity(registry.len());
        for entry in registry.entries() {
            let reading = self.measure_entry(selector, entry, bus).await;

            // Isolate this entry again before the next one is selected
            if let Err(e) = selector.disable(bus, entry.slot().mux_address).await {
                warn!("[reading] could not clear {:#04x}: {}", entry.slot().mux_address, e);
            }
            readings.push(reading);
        }

        selector.disable_all(bus).await;
        readings
    }

    pub async fn closest(&self, registry: &SensorRegistry, bus: &mut dyn BusTransport) -> Reading {
        closest_of(&self.read_all(registry, bus).await)
    }

    pub async fn farthest(&self, registry: &SensorRegistry, bus: &mut dyn BusTransport) -> Reading {
        farthest_of(&self.read_all(registry, bus).await)
    }

    /// Distance from the entry at `index`.
    ///
    /// Lossy: 0 is returned both for a genuine zero distance and for an
    /// invalid reading or unknown index. Use [`ReadingAggregator::read_all`]
    /// when the distinction matters.
    pub async fn read_distance(
        &self,
        registry: &SensorRegistry,
        bus: &mut dyn BusTransport,
        index: usize,
    ) -> u16 {
        let Some(entry) = registry.entries().get(index) else {
            return 0;
        };
        let selector = registry.selector();
        let reading = self.measure_entry(selector, entry, bus).await;
        selector.disable_all(bus).await;
        reading.distance_mm
    }

    async fn measure_entry(
        &self,
        selector: &ChannelSelector,
        entry: &SensorEntry,
        bus: &mut dyn BusTransport,
    ) -> Reading {
        let slot = entry.slot();
        if let Err(e) = selector.select(bus, slot).await {
            warn!("[reading] could not select {}: {}", slot, e);
            return Reading::invalid(slot);
        }
        pause(self.stabilize).await;

        match entry.sensor().measure(bus).await {
            Ok(m) if m.is_out_of_range() => {
                debug!("[reading] {}: out of range", slot);
                Reading::invalid(slot)
            }
            Ok(m) => {
                debug!("[reading] {}: {}mm (status {})", slot, m.range_mm, m.status);
                Reading {
                    slot,
                    distance_mm: m.range_mm,
                    valid: true,
                }
            }
            Err(e) => {
                warn!("[reading] {}: measurement failed: {}", slot, e);
                Reading::invalid(slot)
            }
        }
    }
}

/// Valid reading with the smallest distance, first in order on ties.
/// The all-zero invalid reading means no sensor detected anything.
pub fn closest_of(readings: &[Reading]) -> Reading {
    reduce_valid(readings, |candidate, best| candidate < best)
}

/// Valid reading with the largest distance, first in order on ties.
pub fn farthest_of(readings: &[Reading]) -> Reading {
    reduce_valid(readings, |candidate, best| candidate > best)
}

fn reduce_valid(readings: &[Reading], better: impl Fn(u16, u16) -> bool) -> Reading {
    readings
        .iter()
        .filter(|r| r.valid)
        .fold(None, |best: Option<&Reading>, r| match best {
            Some(b) if !better(r.distance_mm, b.distance_mm) => Some(b),
            _ => Some(r),
        })
        .copied()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::sim::{SimSensor, SimulatedBus};
    use crate::mux::MuxAddressRange;
    use crate::sensors::vl53l0x::{Vl53l0xFactory, DEFAULT_ADDRESS};

    fn reading(channel: u8, distance_mm: u16, valid: bool) -> Reading {
        Reading {
            slot: MuxChannel::new(0x70, channel),
            distance_mm,
            valid,
        }
    }

    fn aggregator() -> ReadingAggregator {
        ReadingAggregator::new(Duration::ZERO)
    }

    async fn discovered(bus: &mut SimulatedBus) -> SensorRegistry {
        let selector = ChannelSelector::new(MuxAddressRange::default(), Duration::ZERO, Duration::ZERO);
        let mut registry = SensorRegistry::new(selector, Box::new(Vl53l0xFactory), DEFAULT_ADDRESS);
        registry.discover(bus).await;
        registry
    }

    #[test]
    fn test_closest_and_farthest_skip_invalid() {
        let readings = [
            reading(0, 0, false),
            reading(1, 120, true),
            reading(2, 45, true),
            reading(3, 0, false),
        ];

        assert_eq!(closest_of(&readings), reading(2, 45, true));
        assert_eq!(farthest_of(&readings), reading(1, 120, true));
    }

    #[test]
    fn test_all_invalid_yields_default_sentinel() {
        let readings = [reading(0, 0, false), reading(5, 300, false)];

        assert_eq!(closest_of(&readings), Reading::default());
        assert!(!farthest_of(&readings).valid);
        assert!(!closest_of(&[]).valid);
    }

    #[test]
    fn test_ties_keep_registry_order() {
        let readings = [reading(4, 80, true), reading(6, 80, true)];

        assert_eq!(closest_of(&readings).slot.channel, 4);
        assert_eq!(farthest_of(&readings).slot.channel, 4);
    }

    #[tokio::test]
    async fn test_read_all_returns_one_reading_per_entry() {
        let mut bus = SimulatedBus::new()
            .with_sensor(0x70, 0, SimSensor::out_of_range())
            .with_sensor(0x70, 1, SimSensor::new(120))
            .with_sensor(0x71, 2, SimSensor::new(45))
            .with_sensor(0x71, 7, SimSensor::out_of_range());
        let registry = discovered(&mut bus).await;

        let readings = aggregator().read_all(&registry, &mut bus).await;

        assert_eq!(readings.len(), registry.len());
        assert_eq!(
            readings,
            vec![
                Reading::invalid(MuxChannel::new(0x70, 0)),
                Reading { slot: MuxChannel::new(0x70, 1), distance_mm: 120, valid: true },
                Reading { slot: MuxChannel::new(0x71, 2), distance_mm: 45, valid: true },
                Reading::invalid(MuxChannel::new(0x71, 7)),
            ]
        );
        assert_eq!(bus.mask(0x70), 0);
        assert_eq!(bus.mask(0x71), 0);
        assert_eq!(bus.contention(), 0);
    }

    #[tokio::test]
    async fn test_read_all_keeps_length_when_sensor_disappears() {
        let mut bus = SimulatedBus::new()
            .with_sensor(0x70, 0, SimSensor::new(10))
            .with_sensor(0x70, 1, SimSensor::new(20));
        let registry = discovered(&mut bus).await;

        bus.detach(0x70, 0);
        let readings = aggregator().read_all(&registry, &mut bus).await;

        assert_eq!(readings.len(), 2);
        assert!(!readings[0].valid);
        assert_eq!(readings[1].distance_mm, 20);
    }

    #[tokio::test]
    async fn test_read_all_clears_each_entry_mux_after_measuring() {
        let mut bus = SimulatedBus::new()
            .with_sensor(0x70, 3, SimSensor::new(10))
            .with_sensor(0x72, 5, SimSensor::new(20));
        let registry = discovered(&mut bus).await;
        let before = bus.mask_writes().len();

        aggregator().read_all(&registry, &mut bus).await;

        let writes = &bus.mask_writes()[before..];
        let select_first = writes.iter().position(|w| *w == (0x70, 0b1000)).unwrap();
        // the explicit per-entry clear follows the select directly
        assert_eq!(writes[select_first + 1], (0x70, 0));
        let select_second = writes.iter().position(|w| *w == (0x72, 0b10_0000)).unwrap();
        assert_eq!(writes[select_second + 1], (0x72, 0));
    }

    #[tokio::test]
    async fn test_closest_and_farthest_over_bus() {
        let mut bus = SimulatedBus::new()
            .with_sensor(0x70, 0, SimSensor::out_of_range())
            .with_sensor(0x70, 1, SimSensor::new(120))
            .with_sensor(0x70, 2, SimSensor::new(45))
            .with_sensor(0x70, 3, SimSensor::out_of_range());
        let registry = discovered(&mut bus).await;
        let aggregator = aggregator();

        let closest = aggregator.closest(&registry, &mut bus).await;
        let farthest = aggregator.farthest(&registry, &mut bus).await;

        assert_eq!(closest.distance_mm, 45);
        assert_eq!(closest.slot, MuxChannel::new(0x70, 2));
        assert_eq!(farthest.distance_mm, 120);
    }

    #[tokio::test]
    async fn test_closest_with_nothing_in_range() {
        let mut bus = SimulatedBus::new()
            .with_sensor(0x70, 0, SimSensor::out_of_range())
            .with_sensor(0x73, 4, SimSensor::out_of_range());
        let registry = discovered(&mut bus).await;

        let closest = aggregator().closest(&registry, &mut bus).await;
        assert_eq!(closest, Reading::default());
    }

    #[tokio::test]
    async fn test_read_distance_is_lossy() {
        let mut bus = SimulatedBus::new()
            .with_sensor(0x70, 0, SimSensor::new(0))
            .with_sensor(0x70, 1, SimSensor::out_of_range())
            .with_sensor(0x70, 2, SimSensor::new(77).with_device_status(4));
        let registry = discovered(&mut bus).await;
        let aggregator = aggregator();

        // a real zero and an invalid reading look the same here
        assert_eq!(aggregator.read_distance(&registry, &mut bus, 0).await, 0);
        assert_eq!(aggregator.read_distance(&registry, &mut bus, 1).await, 0);
        // only the out-of-range status is treated as invalid
        assert_eq!(aggregator.read_distance(&registry, &mut bus, 2).await, 77);
        assert_eq!(aggregator.read_distance(&registry, &mut bus, 9).await, 0);
        assert_eq!(bus.mask(0x70), 0);
    }
}
