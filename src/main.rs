use occupancy_monitor::config::{self, Config};
use occupancy_monitor::error::AppError;
use occupancy_monitor::network::{Connectivity, ReachabilityProbe};
use occupancy_monitor::state::AppState;
use occupancy_monitor::telemetry::thingspeak::ThingSpeakReporter;
use occupancy_monitor::{api, sensor};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

fn init_tracing(level: tracing::Level) {
    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(level)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config::DEFAULT_CONFIG_PATH.to_string());
    let config = config::load_from_path(&config_path)?;
    init_tracing(config.log_level());
    tracing::info!(config_path = %config_path, "occupancy-monitor starting");

    // Nothing runs until the collector is reachable.
    let probe_config = config.clone();
    tokio::task::spawn_blocking(move || wait_for_network(&probe_config)).await??;

    let thingspeak = config.thingspeak();
    if thingspeak.api_key.is_empty() {
        tracing::warn!("No telemetry api_key configured; the collector will reject updates");
    }
    let reporter = ThingSpeakReporter::new(thingspeak)?;

    let stale_after = config.stale_after();
    tracing::info!(stale_after_secs = stale_after.as_secs_f64(), "Health staleness window");
    let state = Arc::new(RwLock::new(AppState::new().with_stale_after(stale_after)));
    let stop_flag = Arc::new(AtomicBool::new(false));
    let _control_handle = start_control_loop(&config, reporter, &state, Arc::clone(&stop_flag))?;

    let app = api::router(Arc::clone(&state));
    let port = config.server_port();
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "API server listening");
    axum::serve(listener, app).await?;

    stop_flag.store(true, Ordering::Relaxed);

    Ok(())
}

/// Run the startup connectivity probe. On failure, wait out the restart
/// delay so a supervisor restart does not spin, then give up.
fn wait_for_network(config: &Config) -> Result<(), AppError> {
    let mut probe = ReachabilityProbe::for_url(config.telemetry_endpoint(), config.probe_settings())?;
    if probe.connect() {
        return Ok(());
    }
    let delay = config.restart_delay();
    tracing::error!(
        restart_delay_secs = delay.as_secs(),
        "Network unreachable; exiting after restart delay"
    );
    std::thread::sleep(delay);
    Err(AppError::Connectivity(format!(
        "{} unreachable",
        config.telemetry_endpoint()
    )))
}

/// Open the Pi peripherals and start the control loop thread.
fn start_control_loop(
    config: &Config,
    reporter: ThingSpeakReporter,
    state: &Arc<RwLock<AppState>>,
    stop: Arc<AtomicBool>,
) -> Result<std::thread::JoinHandle<()>, Box<dyn std::error::Error>> {
    let hardware_config = config.hardware();
    let hardware = sensor::pi::open_hardware(&hardware_config).inspect_err(|err| {
        tracing::error!(error = %err, "Failed to open sensor hardware");
    })?;

    #[cfg(target_os = "linux")]
    {
        use occupancy_monitor::monitor::{ControlLoop, spawn_control_thread};
        use occupancy_monitor::sensor::SystemClock;
        use occupancy_monitor::sensor::current::CurrentSampler;
        use occupancy_monitor::sensor::rangefinder::Rangefinder;

        let clock = SystemClock::new();
        let distance = Rangefinder::new(hardware.trigger, hardware.echo, clock);
        let current = CurrentSampler::new(hardware.adc, config.burden_resistor_ohms());
        let control_loop = ControlLoop::from_config(config, distance, current, clock, reporter)?;
        tracing::info!(
            trigger_pin = hardware_config.trigger_pin,
            echo_pin = hardware_config.echo_pin,
            adc_channel = hardware_config.adc_channel,
            report_interval_secs = config.report_interval().as_secs(),
            "Starting control loop"
        );
        Ok(spawn_control_thread(control_loop, Arc::clone(state), stop))
    }

    #[cfg(not(target_os = "linux"))]
    {
        let _ = (hardware, reporter, state, stop);
        Err(AppError::HardwareUnavailable(
            "control loop requires Linux/Raspberry Pi".to_string(),
        )
        .into())
    }
}
