use tracing::{info, warn};

use crate::bus::BusTransport;
use crate::config::{ArrayConfig, RegistryMode};
use crate::errors::{RegistryError, RegistryResult};
use crate::mux::ChannelSelector;
use crate::reading::{Reading, ReadingAggregator};
use crate::registry::{SensorInfo, SensorRegistry};
use crate::sensors::{create_sensor_factory, SensorFactory, TimingPreset};

/// A bus, the sensors found on it, and the reading cycle over them.
///
/// Every operation takes `&mut self`: channel selection is global bus state,
/// so only one caller may drive the hub at a time.
pub struct TofHub<B: BusTransport> {
    bus: B,
    registry: SensorRegistry,
    aggregator: ReadingAggregator,
}

impl<B: BusTransport> TofHub<B> {
    pub fn new(bus: B, registry: SensorRegistry, aggregator: ReadingAggregator) -> Self {
        Self { bus, registry, aggregator }
    }

    /// Build a hub from configuration with the configured driver factory
    pub fn from_config(bus: B, config: &ArrayConfig) -> RegistryResult<Self> {
        let factory = create_sensor_factory(&config.sensor.driver)
            .map_err(RegistryError::RegistrationError)?;
        Self::with_factory(bus, config, factory)
    }

    pub fn with_factory(
        bus: B,
        config: &ArrayConfig,
        factory: Box<dyn SensorFactory>,
    ) -> RegistryResult<Self> {
        let selector = ChannelSelector::new(
            config.mux.address_range()?,
            config.mux.settle(),
            config.mux.switch_delay(),
        );
        let registry = SensorRegistry::new(selector, factory, config.sensor.address)
            .with_manual_mux(config.manual.mux_address, config.manual.capacity)
            .with_scan_delay(config.mux.scan_delay());
        let aggregator = ReadingAggregator::new(config.reading.stabilize());
        Ok(Self::new(bus, registry, aggregator))
    }

    /// Fill the registry the way `config.mode` asks for.
    ///
    /// In manual mode each configured sensor that cannot be registered or
    /// configured is logged and skipped.
    pub async fn populate(&mut self, config: &ArrayConfig) -> usize {
        match config.mode {
            RegistryMode::Discover => self.discover().await,
            RegistryMode::Manual => {
                for s in &config.manual.sensors {
                    let address = s.address.unwrap_or(config.sensor.address);
                    if let Err(e) = self.add_sensor(s.channel, address).await {
                        warn!("[hub] skipping manual sensor on channel {}: {}", s.channel, e);
                        continue;
                    }
                    let budget = s.timing_budget_us.or(s.preset.map(TimingPreset::budget_us));
                    if let Some(budget_us) = budget {
                        if let Err(e) = self.set_measurement_timing_budget(s.channel, budget_us).await {
                            warn!("[hub] channel {}: keeping default timing budget: {}", s.channel, e);
                        }
                    }
                }
                info!("[hub] registered {} of {} configured sensor(s)", self.sensor_count(), config.manual.sensors.len());
                self.sensor_count()
            }
        }
    }

    pub async fn discover(&mut self) -> usize {
        self.registry.discover(&mut self.bus).await
    }

    pub fn sensor_count(&self) -> usize {
        self.registry.len()
    }

    pub fn sensor_info(&self, index: usize) -> Option<SensorInfo> {
        self.registry.sensor_info(index)
    }

    pub fn sensors(&self) -> Vec<SensorInfo> {
        (0..self.registry.len())
            .filter_map(|i| self.registry.sensor_info(i))
            .collect()
    }

    pub async fn read_all(&mut self) -> Vec<Reading> {
        self.aggregator.read_all(&self.registry, &mut self.bus).await
    }

    pub async fn closest(&mut self) -> Reading {
        self.aggregator.closest(&self.registry, &mut self.bus).await
    }

    pub async fn farthest(&mut self) -> Reading {
        self.aggregator.farthest(&self.registry, &mut self.bus).await
    }

    /// Lossy single read by registry index; see [`ReadingAggregator::read_distance`]
    pub async fn read_distance(&mut self, index: usize) -> u16 {
        self.aggregator
            .read_distance(&self.registry, &mut self.bus, index)
            .await
    }

    pub async fn add_sensor(&mut self, channel: u8, sensor_address: u8) -> RegistryResult<usize> {
        self.registry
            .add_sensor(&mut self.bus, channel, sensor_address)
            .await
    }

    /// Lossy single read by manual-mode channel; 0 if no sensor is registered there
    pub async fn read_one(&mut self, channel: u8) -> u16 {
        match self.registry.sensor_index(channel) {
            Some(index) => self.read_distance(index).await,
            None => 0,
        }
    }

    pub async fn set_measurement_timing_budget(&mut self, channel: u8, budget_us: u32) -> RegistryResult<()> {
        self.registry
            .set_measurement_timing_budget(&mut self.bus, channel, budget_us)
            .await
    }

    pub async fn set_high_accuracy(&mut self, channel: u8) -> RegistryResult<()> {
        self.registry
            .apply_preset(&mut self.bus, channel, TimingPreset::HighAccuracy)
            .await
    }

    pub async fn set_high_speed(&mut self, channel: u8) -> RegistryResult<()> {
        self.registry
            .apply_preset(&mut self.bus, channel, TimingPreset::HighSpeed)
            .await
    }

    pub async fn set_long_range(&mut self, channel: u8) -> RegistryResult<()> {
        self.registry
            .apply_preset(&mut self.bus, channel, TimingPreset::LongRange)
            .await
    }
}
