use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info};

use crate::bus::BusTransport;
use crate::config::ReadingSettings;
use crate::hub::TofHub;
use crate::reading::{closest_of, farthest_of, Reading};

/// Everything produced by one pass over the registry
#[derive(Debug, Clone, Serialize)]
pub struct ReadingCycle {
    pub seq: u64,
    pub readings: Vec<Reading>,
    pub closest: Reading,
    pub farthest: Reading,
}

/// Read every sensor once and reduce the results
pub async fn run_cycle<B: BusTransport>(hub: &mut TofHub<B>, seq: u64) -> ReadingCycle {
    let readings = hub.read_all().await;
    ReadingCycle {
        seq,
        closest: closest_of(&readings),
        farthest: farthest_of(&readings),
        readings,
    }
}

/// Spawn the periodic reading loop. Each cycle is written to stdout as one
/// JSON line.
pub fn spawn_reading_task<B>(hub: Arc<Mutex<TofHub<B>>>, settings: ReadingSettings) -> JoinHandle<()>
where
    B: BusTransport + 'static,
{
    let interval = settings.interval();
    let rescan_interval = settings.rescan_interval();

    tokio::spawn(async move {
        info!("[scheduler] reading every {:?}", interval);
        let mut seq = 0u64;
        let mut last_scan = Instant::now();

        loop {
            let mut hub_lock = hub.lock().await;

            if let Some(every) = rescan_interval {
                if last_scan.elapsed() >= every {
                    let found = hub_lock.discover().await;
                    info!("[scheduler] rescan found {} sensor(s)", found);
                    last_scan = Instant::now();
                }
            }

            seq += 1;
            let cycle = run_cycle(&mut *hub_lock, seq).await;
            drop(hub_lock); // Release lock early

            debug!(
                "[scheduler] cycle {}: closest {:?}, farthest {:?}",
                seq, cycle.closest, cycle.farthest
            );
            match serde_json::to_string(&cycle) {
                Ok(line) => println!("{}", line),
                Err(e) => error!("[scheduler] failed to encode cycle {}: {}", seq, e),
            }

            sleep(interval).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::sim::{SimSensor, SimulatedBus};
    use crate::config::ArrayConfig;

    async fn hub(bus: SimulatedBus) -> TofHub<SimulatedBus> {
        let config = ArrayConfig::from_toml(
            "[bus]\npath = \"/dev/null\"\n[mux]\nsettle_us = 0\nswitch_delay_ms = 0\nscan_delay_ms = 0\n[reading]\nstabilize_ms = 0\n",
        )
        .unwrap();
        let mut hub = TofHub::from_config(bus, &config).unwrap();
        hub.discover().await;
        hub
    }

    #[tokio::test]
    async fn test_cycle_reduces_its_own_readings() {
        let bus = SimulatedBus::new()
            .with_sensor(0x70, 1, SimSensor::new(120))
            .with_sensor(0x70, 2, SimSensor::new(45))
            .with_sensor(0x70, 5, SimSensor::out_of_range());
        let mut hub = hub(bus).await;

        let cycle = run_cycle(&mut hub, 7).await;

        assert_eq!(cycle.seq, 7);
        assert_eq!(cycle.readings.len(), 3);
        assert_eq!(cycle.closest.distance_mm, 45);
        assert_eq!(cycle.farthest.distance_mm, 120);
    }

    #[tokio::test]
    async fn test_cycle_serializes_as_json_line() {
        let bus = SimulatedBus::new().with_sensor(0x71, 3, SimSensor::new(250));
        let mut hub = hub(bus).await;

        let line = serde_json::to_string(&run_cycle(&mut hub, 1).await).unwrap();

        assert!(!line.contains('\n'));
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["readings"][0]["slot"]["mux_address"], 0x71);
        assert_eq!(value["readings"][0]["distance_mm"], 250);
        assert_eq!(value["closest"]["valid"], true);
    }

    #[tokio::test]
    async fn test_empty_registry_cycle() {
        let mut hub = hub(SimulatedBus::new()).await;

        let cycle = run_cycle(&mut hub, 1).await;
        assert!(cycle.readings.is_empty());
        assert!(!cycle.closest.valid);
        assert!(!cycle.farthest.valid);
    }
}
