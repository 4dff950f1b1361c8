// Public modules
pub mod bus;
pub mod config;
pub mod errors;
pub mod hub;
pub mod mux;
pub mod reading;
pub mod registry;
pub mod scheduler;
pub mod sensors;

// Re-export commonly used types
pub use bus::i2c::I2CBus;
pub use bus::BusTransport;
pub use config::{load_array_config, ArrayConfig};
pub use errors::{BusError, ConfigError, RegistryError, SensorError};
pub use hub::TofHub;
pub use mux::{ChannelSelector, MuxAddressRange, MuxChannel};
pub use reading::{Reading, ReadingAggregator};
pub use registry::{SensorInfo, SensorRegistry};
pub use scheduler::spawn_reading_task;

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Initialize tracing with default configuration
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();
}

/// Run the hub described by `<config_path>/tof.toml` until the reading task ends
pub async fn run_tof_hub(config_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    info!("[TofSensorHub] starting up...");

    let array_config_path = format!("{}/tof.toml", config_path);
    let config = load_array_config(&array_config_path)?;
    info!("[config] loaded {} ({:?} mode)", array_config_path, config.mode);

    let bus = I2CBus::open(&config.bus)?;
    info!("[bus] opened {} at {}Hz", config.bus.path, config.bus.clock_hz);

    let mut hub = TofHub::from_config(bus, &config)?;
    let found = hub.populate(&config).await;
    if found == 0 {
        warn!("[registry] no sensors available; readings will be empty until a rescan finds some");
    }
    for info in hub.sensors() {
        info!("[registry] {} at {:#04x} on {}", info.driver, info.address, info.slot);
    }

    let task = spawn_reading_task(Arc::new(Mutex::new(hub)), config.reading.clone());
    info!("[main] reading task launched");

    task.await?;
    Ok(())
}
