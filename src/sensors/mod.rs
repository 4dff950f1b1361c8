use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::bus::BusTransport;
use crate::errors::{SensorError, SensorResult};

#[cfg(feature = "vl53l0x")]
pub mod vl53l0x;

/// Range status reported when nothing was detected within range
pub const RANGE_STATUS_OUT_OF_RANGE: u8 = 4;

/// Raw result of one ranging operation
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RangingMeasurement {
    pub range_mm: u16,
    /// 0 = valid, 1 = sigma fail, 2 = signal fail, 3 = min range fail,
    /// 4 = phase fail / out of range, 5 = hardware fail
    pub status: u8,
}

impl RangingMeasurement {
    pub fn is_out_of_range(&self) -> bool {
        self.status == RANGE_STATUS_OUT_OF_RANGE
    }
}

/// Fixed measurement timing budgets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingPreset {
    HighAccuracy,
    HighSpeed,
    LongRange,
}

impl TimingPreset {
    pub fn budget_us(self) -> u32 {
        match self {
            TimingPreset::HighAccuracy => 200_000,
            TimingPreset::HighSpeed => 20_000,
            TimingPreset::LongRange => 33_000,
        }
    }
}

/// A time-of-flight ranging sensor reachable through the bus.
///
/// The caller is responsible for making the sensor's multiplexer channel the
/// only live one before every call.
#[async_trait]
pub trait RangingSensor: Send + Sync {
    /// Bring the sensor up and, if needed, move it to `address`.
    async fn init(&mut self, bus: &mut dyn BusTransport, address: u8) -> SensorResult<()>;
    /// Perform one single-shot measurement.
    async fn measure(&self, bus: &mut dyn BusTransport) -> SensorResult<RangingMeasurement>;
    async fn set_measurement_timing_budget(
        &mut self,
        bus: &mut dyn BusTransport,
        budget_us: u32,
    ) -> SensorResult<()>;
    fn address(&self) -> u8;
    fn driver(&self) -> &'static str;
}

/// Creates fresh, uninitialised sensor handles during discovery and registration
pub trait SensorFactory: Send + Sync {
    fn name(&self) -> &'static str;
    fn create(&self) -> Box<dyn RangingSensor>;
}

pub fn create_sensor_factory(driver: &str) -> SensorResult<Box<dyn SensorFactory>> {
    match driver {
        #[cfg(feature = "vl53l0x")]
        "vl53l0x" => Ok(Box::new(vl53l0x::Vl53l0xFactory)),
        _ => Err(SensorError::UnsupportedDriver { driver: driver.to_string() }),
    }
}
