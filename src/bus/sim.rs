//! In-memory I2C bus with channel multiplexers and VL53L0X-like sensors.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};

use super::BusTransport;
use crate::errors::{BusError, BusResult};

const SENSOR_DEFAULT_ADDRESS: u8 = 0x29;
const MODEL_ID: u8 = 0xEE;
const DEVICE_STATUS_RANGE_COMPLETE: u8 = 11;
const DEVICE_STATUS_PHASE_FAIL: u8 = 6;

const REG_SYSRANGE_START: u8 = 0x00;
const REG_INTERRUPT_STATUS: u8 = 0x13;
const REG_RANGE_STATUS: u8 = 0x14;
const REG_RANGE_MM_HI: u8 = REG_RANGE_STATUS + 10;
const REG_RANGE_MM_LO: u8 = REG_RANGE_STATUS + 11;
const REG_SLAVE_ADDRESS: u8 = 0x8A;
const REG_MODEL_ID: u8 = 0xC0;

/// Register-level stand-in for one ranging sensor
#[derive(Debug, Clone)]
pub struct SimSensor {
    address: u8,
    model_id: u8,
    range_mm: u16,
    device_status: u8,
    registers: HashMap<u8, u8>,
}

impl SimSensor {
    pub fn new(range_mm: u16) -> Self {
        let registers = HashMap::from([
            // dss, pre-range and final-range steps enabled
            (0x01, 0xE8),
            (0x46, 0x05),
            (0x50, 0x06),
            (0x51, 0x00),
            (0x52, 0x45),
            (0x70, 0x04),
            (0x71, 0x01),
            (0x72, 0x2A),
        ]);
        Self {
            address: SENSOR_DEFAULT_ADDRESS,
            model_id: MODEL_ID,
            range_mm,
            device_status: DEVICE_STATUS_RANGE_COMPLETE,
            registers,
        }
    }

    /// Sensor that reports a phase failure (nothing in range)
    pub fn out_of_range() -> Self {
        let mut sensor = Self::new(8190);
        sensor.device_status = DEVICE_STATUS_PHASE_FAIL;
        sensor
    }

    /// Device that answers at the sensor address but is not a VL53L0X
    pub fn foreign(model_id: u8) -> Self {
        let mut sensor = Self::new(0);
        sensor.model_id = model_id;
        sensor
    }

    pub fn with_device_status(mut self, status: u8) -> Self {
        self.device_status = status;
        self
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn register(&self, reg: u8) -> u8 {
        self.registers.get(&reg).copied().unwrap_or(0)
    }

    fn read_reg(&self, reg: u8) -> u8 {
        match reg {
            REG_MODEL_ID => self.model_id,
            // start bit self-clears and results are immediately ready
            REG_SYSRANGE_START => 0,
            REG_INTERRUPT_STATUS => 0x07,
            REG_RANGE_STATUS => self.device_status << 3,
            REG_RANGE_MM_HI => self.range_mm.to_be_bytes()[0],
            REG_RANGE_MM_LO => self.range_mm.to_be_bytes()[1],
            _ => self.register(reg),
        }
    }

    fn write_reg(&mut self, reg: u8, value: u8) {
        if reg == REG_SLAVE_ADDRESS {
            self.address = value & 0x7F;
        }
        self.registers.insert(reg, value);
    }
}

#[derive(Debug, Default)]
struct SimMux {
    mask: u8,
    sensors: BTreeMap<u8, SimSensor>,
}

/// Simulated bus. Devices that are not attached, or that sit behind a
/// disabled channel, do not acknowledge.
#[derive(Debug, Default)]
pub struct SimulatedBus {
    muxes: BTreeMap<u8, SimMux>,
    mask_writes: Vec<(u8, u8)>,
    contention: usize,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mux(mut self, address: u8) -> Self {
        self.muxes.entry(address).or_default();
        self
    }

    pub fn with_sensor(mut self, mux: u8, channel: u8, sensor: SimSensor) -> Self {
        self.attach(mux, channel, sensor);
        self
    }

    pub fn attach(&mut self, mux: u8, channel: u8, sensor: SimSensor) {
        self.muxes.entry(mux).or_default().sensors.insert(channel, sensor);
    }

    pub fn detach(&mut self, mux: u8, channel: u8) -> Option<SimSensor> {
        self.muxes.get_mut(&mux)?.sensors.remove(&channel)
    }

    pub fn sensor(&self, mux: u8, channel: u8) -> Option<&SimSensor> {
        self.muxes.get(&mux)?.sensors.get(&channel)
    }

    /// Change what a sensor will report on its next measurement
    pub fn set_range(&mut self, mux: u8, channel: u8, range_mm: u16, device_status: u8) {
        if let Some(sensor) = self
            .muxes
            .get_mut(&mux)
            .and_then(|m| m.sensors.get_mut(&channel))
        {
            sensor.range_mm = range_mm;
            sensor.device_status = device_status;
        }
    }

    /// Current channel mask of a multiplexer (0 for absent ones)
    pub fn mask(&self, mux: u8) -> u8 {
        self.muxes.get(&mux).map(|m| m.mask).unwrap_or(0)
    }

    /// Every `(multiplexer, mask)` write in order
    pub fn mask_writes(&self) -> &[(u8, u8)] {
        &self.mask_writes
    }

    /// Number of transactions that found more than one device at one address
    pub fn contention(&self) -> usize {
        self.contention
    }

    fn live_sensor(&mut self, address: u8) -> BusResult<&mut SimSensor> {
        let mut live: Vec<&mut SimSensor> = self
            .muxes
            .values_mut()
            .flat_map(|mux| {
                let mask = mux.mask;
                mux.sensors
                    .iter_mut()
                    .filter(move |(channel, _)| **channel < 8 && mask & (1 << **channel) != 0)
                    .map(|(_, sensor)| sensor)
            })
            .filter(|sensor| sensor.address == address)
            .collect();

        match live.len() {
            0 => Err(BusError::Nack { address }),
            1 => Ok(live.remove(0)),
            _ => {
                self.contention += 1;
                Err(BusError::Nack { address })
            }
        }
    }
}

#[async_trait]
impl BusTransport for SimulatedBus {
    async fn probe(&mut self, address: u8) -> BusResult<()> {
        if self.muxes.contains_key(&address) {
            return Ok(());
        }
        self.live_sensor(address).map(|_| ())
    }

    async fn send_byte(&mut self, address: u8, byte: u8) -> BusResult<()> {
        if let Some(mux) = self.muxes.get_mut(&address) {
            mux.mask = byte;
            self.mask_writes.push((address, byte));
            return Ok(());
        }
        self.live_sensor(address).map(|_| ())
    }

    async fn write_byte(&mut self, address: u8, reg: u8, byte: u8) -> BusResult<()> {
        self.live_sensor(address)?.write_reg(reg, byte);
        Ok(())
    }

    async fn write_bytes(&mut self, address: u8, reg: u8, bytes: &[u8]) -> BusResult<()> {
        let sensor = self.live_sensor(address)?;
        for (offset, byte) in bytes.iter().enumerate() {
            sensor.write_reg(reg.wrapping_add(offset as u8), *byte);
        }
        Ok(())
    }

    async fn read_bytes(&mut self, address: u8, reg: u8, buf: &mut [u8]) -> BusResult<()> {
        let sensor = self.live_sensor(address)?;
        for (offset, byte) in buf.iter_mut().enumerate() {
            *byte = sensor.read_reg(reg.wrapping_add(offset as u8));
        }
        Ok(())
    }
}
