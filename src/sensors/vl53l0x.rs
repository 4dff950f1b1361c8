use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::{RangingMeasurement, RangingSensor, SensorFactory};
use crate::bus::BusTransport;
use crate::errors::{SensorError, SensorResult};

/// Address every VL53L0X answers on after power-up
pub const DEFAULT_ADDRESS: u8 = 0x29;

// Register addresses for the VL53L0X
const SYSRANGE_START: u8 = 0x00;
const SYSTEM_SEQUENCE_CONFIG: u8 = 0x01;
const SYSTEM_INTERRUPT_CONFIG_GPIO: u8 = 0x0A;
const SYSTEM_INTERRUPT_CLEAR: u8 = 0x0B;
const RESULT_INTERRUPT_STATUS: u8 = 0x13;
const RESULT_RANGE_STATUS: u8 = 0x14;
const MSRC_CONFIG_TIMEOUT_MACROP: u8 = 0x46;
const PRE_RANGE_CONFIG_VCSEL_PERIOD: u8 = 0x50;
const PRE_RANGE_CONFIG_TIMEOUT_MACROP_HI: u8 = 0x51;
const FINAL_RANGE_CONFIG_VCSEL_PERIOD: u8 = 0x70;
const FINAL_RANGE_CONFIG_TIMEOUT_MACROP_HI: u8 = 0x71;
const GPIO_HV_MUX_ACTIVE_HIGH: u8 = 0x84;
const I2C_STANDARD_MODE: u8 = 0x88;
const VHV_CONFIG_PAD_SCL_SDA_EXTSUP_HV: u8 = 0x89;
const I2C_SLAVE_DEVICE_ADDRESS: u8 = 0x8A;
const IDENTIFICATION_MODEL_ID: u8 = 0xC0;

const MODEL_ID: u8 = 0xEE;

// Per-step overheads used by the timing budget calculation (microseconds)
const START_OVERHEAD: u32 = 1910;
const END_OVERHEAD: u32 = 960;
const MSRC_OVERHEAD: u32 = 660;
const TCC_OVERHEAD: u32 = 590;
const DSS_OVERHEAD: u32 = 690;
const PRE_RANGE_OVERHEAD: u32 = 660;
const FINAL_RANGE_OVERHEAD: u32 = 550;
const MIN_TIMING_BUDGET_US: u32 = 20_000;
const DEFAULT_TIMING_BUDGET_US: u32 = 33_000;

const IO_TIMEOUT: Duration = Duration::from_millis(500);
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Minimal register-level VL53L0X driver: identification, address
/// reassignment, single-shot ranging and timing budget.
///
/// Reference SPAD calibration and tuning are not performed, so absolute
/// accuracy is below what the vendor API achieves.
pub struct Vl53l0x {
    address: u8,
    stop_variable: u8,
    timing_budget_us: u32,
}

impl Default for Vl53l0x {
    fn default() -> Self {
        Self::new()
    }
}

impl Vl53l0x {
    pub fn new() -> Self {
        Self {
            address: DEFAULT_ADDRESS,
            stop_variable: 0,
            timing_budget_us: DEFAULT_TIMING_BUDGET_US,
        }
    }

    pub fn timing_budget_us(&self) -> u32 {
        self.timing_budget_us
    }

    fn name(&self) -> String {
        format!("vl53l0x@{:#04x}", self.address)
    }

    async fn read_u8(&self, bus: &mut dyn BusTransport, reg: u8) -> SensorResult<u8> {
        let mut buf = [0u8; 1];
        bus.read_bytes(self.address, reg, &mut buf).await?;
        Ok(buf[0])
    }

    async fn read_u16(&self, bus: &mut dyn BusTransport, reg: u8) -> SensorResult<u16> {
        let mut buf = [0u8; 2];
        bus.read_bytes(self.address, reg, &mut buf).await?;
        Ok(u16::from_be_bytes(buf))
    }

    async fn write_u8(&self, bus: &mut dyn BusTransport, reg: u8, value: u8) -> SensorResult<()> {
        bus.write_byte(self.address, reg, value).await?;
        Ok(())
    }

    async fn write_u16(&self, bus: &mut dyn BusTransport, reg: u8, value: u16) -> SensorResult<()> {
        bus.write_bytes(self.address, reg, &value.to_be_bytes()).await?;
        Ok(())
    }

    /// Restore the internal stop variable; required before every single-shot start
    async fn load_stop_variable(&self, bus: &mut dyn BusTransport) -> SensorResult<()> {
        self.write_u8(bus, 0x80, 0x01).await?;
        self.write_u8(bus, 0xFF, 0x01).await?;
        self.write_u8(bus, 0x00, 0x00).await?;
        self.write_u8(bus, 0x91, self.stop_variable).await?;
        self.write_u8(bus, 0x00, 0x01).await?;
        self.write_u8(bus, 0xFF, 0x00).await?;
        self.write_u8(bus, 0x80, 0x00).await
    }

    async fn wait_for(
        &self,
        bus: &mut dyn BusTransport,
        reg: u8,
        stage: &'static str,
        done: impl Fn(u8) -> bool + Send,
    ) -> SensorResult<()> {
        let start = Instant::now();
        loop {
            if done(self.read_u8(bus, reg).await?) {
                return Ok(());
            }
            if start.elapsed() > IO_TIMEOUT {
                return Err(SensorError::Timeout {
                    sensor: self.name(),
                    stage,
                    timeout_ms: IO_TIMEOUT.as_millis() as u64,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl RangingSensor for Vl53l0x {
    async fn init(&mut self, bus: &mut dyn BusTransport, address: u8) -> SensorResult<()> {
        if address > 0x7F {
            return Err(SensorError::InitError {
                sensor: self.name(),
                reason: format!("{:#04x} is not a 7-bit address", address),
            });
        }

        // A sensor moved by an earlier init keeps its address until power-off;
        // a freshly powered one answers on the default address
        self.address = address;
        let already_moved = address != DEFAULT_ADDRESS
            && matches!(self.read_u8(bus, IDENTIFICATION_MODEL_ID).await, Ok(MODEL_ID));
        if already_moved {
            trace!("[vl53l0x] already answering at {:#04x}", address);
        } else {
            self.address = DEFAULT_ADDRESS;
        }

        let model_id = self.read_u8(bus, IDENTIFICATION_MODEL_ID).await?;
        if model_id != MODEL_ID {
            return Err(SensorError::WrongChipId {
                sensor: self.name(),
                expected: MODEL_ID,
                actual: model_id,
            });
        }

        // 2V8 I/O mode
        let extsup = self.read_u8(bus, VHV_CONFIG_PAD_SCL_SDA_EXTSUP_HV).await?;
        self.write_u8(bus, VHV_CONFIG_PAD_SCL_SDA_EXTSUP_HV, extsup | 0x01).await?;
        self.write_u8(bus, I2C_STANDARD_MODE, 0x00).await?;

        self.write_u8(bus, 0x80, 0x01).await?;
        self.write_u8(bus, 0xFF, 0x01).await?;
        self.write_u8(bus, 0x00, 0x00).await?;
        self.stop_variable = self.read_u8(bus, 0x91).await?;
        self.write_u8(bus, 0x00, 0x01).await?;
        self.write_u8(bus, 0xFF, 0x00).await?;
        self.write_u8(bus, 0x80, 0x00).await?;

        // New-sample-ready interrupt, active low
        self.write_u8(bus, SYSTEM_INTERRUPT_CONFIG_GPIO, 0x04).await?;
        let hv_mux = self.read_u8(bus, GPIO_HV_MUX_ACTIVE_HIGH).await?;
        self.write_u8(bus, GPIO_HV_MUX_ACTIVE_HIGH, hv_mux & !0x10).await?;
        self.write_u8(bus, SYSTEM_INTERRUPT_CLEAR, 0x01).await?;

        if self.address != address {
            self.write_u8(bus, I2C_SLAVE_DEVICE_ADDRESS, address).await?;
            self.address = address;
        }

        debug!("[vl53l0x] initialised at {:#04x} (stop variable {:#04x})", self.address, self.stop_variable);
        Ok(())
    }

    async fn measure(&self, bus: &mut dyn BusTransport) -> SensorResult<RangingMeasurement> {
        self.load_stop_variable(bus).await?;
        self.write_u8(bus, SYSRANGE_START, 0x01).await?;
        self.wait_for(bus, SYSRANGE_START, "ranging start", |v| v & 0x01 == 0).await?;
        self.wait_for(bus, RESULT_INTERRUPT_STATUS, "range result", |v| v & 0x07 != 0).await?;

        // Status byte, then the range in big-endian at offset 10
        let mut buf = [0u8; 12];
        bus.read_bytes(self.address, RESULT_RANGE_STATUS, &mut buf).await?;
        self.write_u8(bus, SYSTEM_INTERRUPT_CLEAR, 0x01).await?;

        let device_status = (buf[0] & 0x78) >> 3;
        let measurement = RangingMeasurement {
            range_mm: u16::from_be_bytes([buf[10], buf[11]]),
            status: range_status(device_status),
        };
        trace!("[vl53l0x] {:#04x}: device status {} -> {:?}", self.address, device_status, measurement);
        Ok(measurement)
    }

    async fn set_measurement_timing_budget(
        &mut self,
        bus: &mut dyn BusTransport,
        budget_us: u32,
    ) -> SensorResult<()> {
        if budget_us < MIN_TIMING_BUDGET_US {
            return Err(SensorError::InvalidTimingBudget {
                sensor: self.name(),
                budget_us,
                reason: format!("minimum is {}us", MIN_TIMING_BUDGET_US),
            });
        }

        let steps = SequenceSteps::from(self.read_u8(bus, SYSTEM_SEQUENCE_CONFIG).await?);

        let pre_range_vcsel = decode_vcsel_period(self.read_u8(bus, PRE_RANGE_CONFIG_VCSEL_PERIOD).await?);
        let msrc_dss_tcc_mclks = self.read_u8(bus, MSRC_CONFIG_TIMEOUT_MACROP).await? as u32 + 1;
        let msrc_dss_tcc_us = mclks_to_micros(msrc_dss_tcc_mclks, pre_range_vcsel);
        let pre_range_mclks = decode_timeout(self.read_u16(bus, PRE_RANGE_CONFIG_TIMEOUT_MACROP_HI).await?);
        let pre_range_us = mclks_to_micros(pre_range_mclks, pre_range_vcsel);
        let final_range_vcsel = decode_vcsel_period(self.read_u8(bus, FINAL_RANGE_CONFIG_VCSEL_PERIOD).await?);

        let mut used_us = (START_OVERHEAD + END_OVERHEAD) as u64;
        if steps.tcc {
            used_us += msrc_dss_tcc_us + TCC_OVERHEAD as u64;
        }
        if steps.dss {
            used_us += 2 * (msrc_dss_tcc_us + DSS_OVERHEAD as u64);
        } else if steps.msrc {
            used_us += msrc_dss_tcc_us + MSRC_OVERHEAD as u64;
        }
        if steps.pre_range {
            used_us += pre_range_us + PRE_RANGE_OVERHEAD as u64;
        }

        if steps.final_range {
            used_us += FINAL_RANGE_OVERHEAD as u64;
            if used_us > budget_us as u64 {
                return Err(SensorError::InvalidTimingBudget {
                    sensor: self.name(),
                    budget_us,
                    reason: format!("enabled sequence steps already need {}us", used_us),
                });
            }

            // The final-range timeout register also covers the pre-range phase
            let mut final_range_mclks = micros_to_mclks(budget_us - used_us as u32, final_range_vcsel);
            if steps.pre_range {
                final_range_mclks = final_range_mclks.saturating_add(pre_range_mclks);
            }
            self.write_u16(bus, FINAL_RANGE_CONFIG_TIMEOUT_MACROP_HI, encode_timeout(final_range_mclks))
                .await?;
        }

        self.timing_budget_us = budget_us;
        debug!("[vl53l0x] {:#04x}: timing budget {}us", self.address, budget_us);
        Ok(())
    }

    fn address(&self) -> u8 {
        self.address
    }

    fn driver(&self) -> &'static str {
        "vl53l0x"
    }
}

/// Map the device's raw range status onto the API-level range status
fn range_status(device_status: u8) -> u8 {
    match device_status {
        11 | 0 => 0,
        1..=3 => 5,
        6 | 9 => super::RANGE_STATUS_OUT_OF_RANGE,
        8 | 10 => 3,
        4 => 2,
        _ => 1,
    }
}

struct SequenceSteps {
    tcc: bool,
    msrc: bool,
    dss: bool,
    pre_range: bool,
    final_range: bool,
}

impl From<u8> for SequenceSteps {
    fn from(config: u8) -> Self {
        Self {
            tcc: config & 0x10 != 0,
            dss: config & 0x08 != 0,
            msrc: config & 0x04 != 0,
            pre_range: config & 0x40 != 0,
            final_range: config & 0x80 != 0,
        }
    }
}

fn decode_vcsel_period(reg: u8) -> u32 {
    (reg as u32 + 1) << 1
}

/// Macro period in nanoseconds
fn macro_period_ns(vcsel_period_pclks: u32) -> u64 {
    (2304 * vcsel_period_pclks as u64 * 1655 + 500) / 1000
}

fn mclks_to_micros(mclks: u32, vcsel_period_pclks: u32) -> u64 {
    let period = macro_period_ns(vcsel_period_pclks);
    (mclks as u64 * period + period / 2) / 1000
}

fn micros_to_mclks(micros: u32, vcsel_period_pclks: u32) -> u32 {
    let period = macro_period_ns(vcsel_period_pclks);
    ((micros as u64 * 1000 + period / 2) / period) as u32
}

/// Register format: (LSByte * 2^MSByte) + 1
pub(crate) fn decode_timeout(reg: u16) -> u32 {
    let lsb = (reg & 0xFF) as u32;
    let msb = (reg >> 8) as u32;
    lsb.checked_shl(msb).unwrap_or(u32::MAX).saturating_add(1)
}

fn encode_timeout(mclks: u32) -> u16 {
    if mclks == 0 {
        return 0;
    }
    let mut lsb = mclks - 1;
    let mut msb: u16 = 0;
    while lsb & 0xFFFF_FF00 != 0 {
        lsb >>= 1;
        msb += 1;
    }
    (msb << 8) | (lsb & 0xFF) as u16
}

pub struct Vl53l0xFactory;

impl SensorFactory for Vl53l0xFactory {
    fn name(&self) -> &'static str {
        "vl53l0x"
    }

    fn create(&self) -> Box<dyn RangingSensor> {
        Box::new(Vl53l0x::new())
    }
}
