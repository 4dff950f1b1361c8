use tof_sensorhub::{init_tracing, run_tof_hub};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // RUST_LOG=debug for per-reading output, RUST_LOG=trace for every mask write
    init_tracing();

    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config".to_string());
    tracing::info!("[main] configuration path: {}", config_path);

    run_tof_hub(&config_path).await
}
