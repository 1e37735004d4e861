use crate::filter::MedianFilter;
use crate::monitor::{DEFAULT_TICK_PERIOD, worst_case_tick_gap};
use crate::network::ProbeSettings;
use crate::occupancy::{Hysteresis, SensorFailurePolicy};
use crate::sensor::HardwareConfig;
use crate::telemetry::thingspeak::{FieldNames, ThingSpeakSettings};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";
pub const DEFAULT_SERVER_PORT: u16 = 8080;

pub const DEFAULT_TRIGGER_PIN: u8 = 17;
pub const DEFAULT_ECHO_PIN: u8 = 16;
pub const DEFAULT_SAMPLES: usize = 5;
pub const DEFAULT_SAMPLE_SPACING_MS: u64 = 50;
pub const DEFAULT_ENTER_CM: f64 = 30.0;
pub const DEFAULT_EXIT_CM: f64 = 40.0;
pub const DEFAULT_REFERENCE_VOLTAGE: f64 = 225.0;
pub const DEFAULT_BURDEN_RESISTOR_OHMS: f64 = 31.8;
pub const DEFAULT_REPORT_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_TRANSPORT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_ENDPOINT: &str = "https://api.thingspeak.com/update";
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 15;
pub const DEFAULT_RESTART_DELAY_SECS: u64 = 15;
/// Slack on top of the worst-case tick gap before a tick counts as stale.
pub const STALE_MARGIN: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub app: AppSection,
    pub logging: LoggingSection,
    #[serde(default)]
    pub sensors: Option<SensorsSection>,
    #[serde(default)]
    pub sampling: Option<SamplingSection>,
    #[serde(default)]
    pub occupancy: Option<OccupancySection>,
    #[serde(default)]
    pub power: Option<PowerSection>,
    #[serde(default)]
    pub telemetry: Option<TelemetrySection>,
    #[serde(default)]
    pub network: Option<NetworkSection>,
    #[serde(default)]
    pub server: Option<ServerSection>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppSection {
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSection {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SensorsSection {
    /// BCM pin driving the ultrasonic trigger.
    pub trigger_pin: Option<u8>,
    /// BCM pin reading the ultrasonic echo (pulled down).
    pub echo_pin: Option<u8>,
    pub adc_bus: Option<u8>,
    pub adc_chip_select: Option<u8>,
    pub adc_channel: Option<u8>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SamplingSection {
    pub samples: Option<usize>,
    pub spacing_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct OccupancySection {
    pub enter_cm: Option<f64>,
    pub exit_cm: Option<f64>,
    pub on_sensor_failure: Option<SensorFailurePolicy>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PowerSection {
    pub reference_voltage: Option<f64>,
    pub burden_resistor_ohms: Option<f64>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TelemetrySection {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub interval_secs: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub field_proximity: Option<String>,
    pub field_current: Option<String>,
    pub field_power: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct NetworkSection {
    pub attempts: Option<u32>,
    pub retry_delay_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub restart_delay_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ServerSection {
    /// Port for the status API (default: 8080)
    pub port: Option<u16>,
    /// Tick age after which `/api/health` reports `ko`. Must exceed the
    /// worst-case gap between ticks, report timeout included.
    pub stale_after_secs: Option<u64>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

pub fn load_default() -> Result<Config, ConfigError> {
    load_from_path(DEFAULT_CONFIG_PATH)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents)?;
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.hysteresis()?;
        if self.sample_count() == 0 {
            return Err(ConfigError::Invalid(
                "sampling.samples must be at least 1".to_string(),
            ));
        }
        let reference = self.reference_voltage();
        if !reference.is_finite() {
            return Err(ConfigError::Invalid(format!(
                "power.reference_voltage must be finite, got {reference}"
            )));
        }
        let burden = self.burden_resistor_ohms();
        if !burden.is_finite() || burden <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "power.burden_resistor_ohms must be positive, got {burden}"
            )));
        }
        if self.report_interval().is_zero() {
            return Err(ConfigError::Invalid(
                "telemetry.interval_secs must be at least 1".to_string(),
            ));
        }
        let gap = self.worst_case_tick_gap();
        if let Some(secs) = self.server.as_ref().and_then(|s| s.stale_after_secs)
            && Duration::from_secs(secs) <= gap
        {
            return Err(ConfigError::Invalid(format!(
                "server.stale_after_secs must exceed the worst-case tick gap of {:.1}s, got {secs}",
                gap.as_secs_f64()
            )));
        }
        Ok(())
    }

    pub fn log_level(&self) -> tracing::Level {
        self.logging
            .level
            .parse()
            .unwrap_or(tracing::Level::INFO)
    }

    pub fn hardware(&self) -> HardwareConfig {
        let sensors = self.sensors.clone().unwrap_or_default();
        let defaults = HardwareConfig::default();
        HardwareConfig {
            trigger_pin: sensors.trigger_pin.unwrap_or(DEFAULT_TRIGGER_PIN),
            echo_pin: sensors.echo_pin.unwrap_or(DEFAULT_ECHO_PIN),
            adc_bus: sensors.adc_bus.unwrap_or(defaults.adc_bus),
            adc_chip_select: sensors.adc_chip_select.unwrap_or(defaults.adc_chip_select),
            adc_channel: sensors.adc_channel.unwrap_or(defaults.adc_channel),
        }
    }

    pub fn sample_count(&self) -> usize {
        self.sampling
            .as_ref()
            .and_then(|s| s.samples)
            .unwrap_or(DEFAULT_SAMPLES)
    }

    pub fn sample_spacing(&self) -> Duration {
        let millis = self
            .sampling
            .as_ref()
            .and_then(|s| s.spacing_ms)
            .unwrap_or(DEFAULT_SAMPLE_SPACING_MS);
        Duration::from_millis(millis)
    }

    pub fn median_filter(&self) -> MedianFilter {
        MedianFilter::new(self.sample_count(), self.sample_spacing())
    }

    pub fn hysteresis(&self) -> Result<Hysteresis, ConfigError> {
        let section = self.occupancy.clone().unwrap_or_default();
        Hysteresis::new(
            section.enter_cm.unwrap_or(DEFAULT_ENTER_CM),
            section.exit_cm.unwrap_or(DEFAULT_EXIT_CM),
        )
    }

    pub fn sensor_failure_policy(&self) -> SensorFailurePolicy {
        self.occupancy
            .as_ref()
            .and_then(|s| s.on_sensor_failure)
            .unwrap_or_default()
    }

    pub fn reference_voltage(&self) -> f64 {
        self.power
            .as_ref()
            .and_then(|s| s.reference_voltage)
            .unwrap_or(DEFAULT_REFERENCE_VOLTAGE)
    }

    pub fn burden_resistor_ohms(&self) -> f64 {
        self.power
            .as_ref()
            .and_then(|s| s.burden_resistor_ohms)
            .unwrap_or(DEFAULT_BURDEN_RESISTOR_OHMS)
    }

    pub fn report_interval(&self) -> Duration {
        let secs = self
            .telemetry
            .as_ref()
            .and_then(|s| s.interval_secs)
            .unwrap_or(DEFAULT_REPORT_INTERVAL_SECS);
        Duration::from_secs(secs)
    }

    pub fn telemetry_endpoint(&self) -> &str {
        self.telemetry
            .as_ref()
            .and_then(|s| s.endpoint.as_deref())
            .filter(|endpoint| !endpoint.is_empty())
            .unwrap_or(DEFAULT_ENDPOINT)
    }

    pub fn thingspeak(&self) -> ThingSpeakSettings {
        let section = self.telemetry.clone().unwrap_or_default();
        let defaults = FieldNames::default();
        ThingSpeakSettings {
            endpoint: self.telemetry_endpoint().to_string(),
            api_key: section.api_key.unwrap_or_default(),
            fields: FieldNames {
                proximity: section.field_proximity.unwrap_or(defaults.proximity),
                current: section.field_current.unwrap_or(defaults.current),
                power: section.field_power.unwrap_or(defaults.power),
            },
            timeout: Duration::from_secs(
                section
                    .timeout_secs
                    .unwrap_or(DEFAULT_TRANSPORT_TIMEOUT_SECS),
            ),
        }
    }

    pub fn probe_settings(&self) -> ProbeSettings {
        let section = self.network.clone().unwrap_or_default();
        let defaults = ProbeSettings::default();
        ProbeSettings {
            attempts: section.attempts.unwrap_or(DEFAULT_CONNECT_ATTEMPTS),
            retry_delay: section
                .retry_delay_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.retry_delay),
            connect_timeout: section
                .connect_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
        }
    }

    /// Delay before exiting after a failed connectivity check, so a supervisor
    /// restart does not spin.
    pub fn restart_delay(&self) -> Duration {
        let secs = self
            .network
            .as_ref()
            .and_then(|s| s.restart_delay_secs)
            .unwrap_or(DEFAULT_RESTART_DELAY_SECS);
        Duration::from_secs(secs)
    }

    fn worst_case_tick_gap(&self) -> Duration {
        worst_case_tick_gap(
            &self.median_filter(),
            self.thingspeak().timeout,
            DEFAULT_TICK_PERIOD,
        )
    }

    /// Health staleness window. Defaults to the worst-case tick gap plus
    /// [`STALE_MARGIN`], so a hung report send reads as degraded, not dead.
    pub fn stale_after(&self) -> Duration {
        self.server
            .as_ref()
            .and_then(|s| s.stale_after_secs)
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.worst_case_tick_gap().saturating_add(STALE_MARGIN))
    }

    /// Returns the server port (default: 8080)
    pub fn server_port(&self) -> u16 {
        self.server
            .as_ref()
            .and_then(|s| s.port)
            .unwrap_or(DEFAULT_SERVER_PORT)
    }
}
