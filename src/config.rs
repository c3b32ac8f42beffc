//! ==============================================================================
//! config.rs - Station Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `station.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - TelemetryConfig: initial publish interval.
//!     - SensorsConfig: serial port, input device, I2C addresses, ADC channels, GPIO pins.
//!     - ActuatorsConfig: fan/lock/light pins, buzzer sysfs path.
//!     - TransportConfig: which management-plane transport to use and how to reach it.
//!     - ServerConfig: local status surface.
//!     - LoggingConfig: default filter and payload echo.
//!
//! every section and field has a default, so a file only needs what it changes.
//!
//! ==============================================================================

use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct StationConfig {
    pub telemetry: TelemetryConfig,
    pub sensors: SensorsConfig,
    pub actuators: ActuatorsConfig,
    pub transport: TransportConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TelemetryConfig {
    pub interval_seconds: f64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            interval_seconds: crate::store::DEFAULT_INTERVAL_SECONDS,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SensorsConfig {
    pub gps: GpsConfig,
    pub accelerometer: AccelerometerConfig,
    pub environment: EnvironmentConfig,
    pub digital: DigitalConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GpsConfig {
    pub enabled: bool,
    pub port: String,
    pub baud_rate: u32,
}

impl Default for GpsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: "/dev/ttyAMA0".to_string(),
            baud_rate: 9600,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AccelerometerConfig {
    pub enabled: bool,
    pub device: String,
}

impl Default for AccelerometerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            device: "/dev/input/event0".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EnvironmentConfig {
    pub enabled: bool,
    pub sample_interval_ms: u64,
    pub aht20_bus: u8,
    pub aht20_address: u16,
    pub adc_address: u16,
    pub moisture_channel: u8,
    pub water_channel: u8,
    pub noise_channel: u8,
    pub illuminance_path: String,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_interval_ms: 1000,
            aht20_bus: 4,
            aht20_address: 0x38,
            adc_address: 0x08,
            moisture_channel: 0,
            water_channel: 5,
            noise_channel: 2,
            illuminance_path: "/sys/bus/iio/devices/iio:device0/in_illuminance_input".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DigitalConfig {
    pub enabled: bool,
    pub sample_interval_ms: u64,
    pub door_pin: u8,
    pub motion_pin: u8,
}

impl Default for DigitalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_interval_ms: 200,
            door_pin: 22,
            motion_pin: 24,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ActuatorsConfig {
    pub fan_pin: u8,
    pub lock_pin: u8,
    pub light_clock_pin: u8,
    pub light_data_pin: u8,
    pub light_count: u8,
    pub buzzer_path: String,
}

impl Default for ActuatorsConfig {
    fn default() -> Self {
        Self {
            fan_pin: 5,
            lock_pin: 12,
            light_clock_pin: 16,
            light_data_pin: 17,
            light_count: 2,
            buzzer_path: "/sys/class/leds/usr_buzzer/brightness".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Mqtt,
    Http,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct TransportConfig {
    pub kind: TransportKind,
    pub mqtt: MqttConfig,
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub telemetry_topic: String,
    pub desired_topic: String,
    pub reported_topic: String,
    pub keep_alive_seconds: u64,
    pub connect_timeout_seconds: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "farm-station".to_string(),
            username: None,
            password: None,
            telemetry_topic: "devices/farm-station/messages/events".to_string(),
            desired_topic: "devices/farm-station/twin/desired".to_string(),
            reported_topic: "devices/farm-station/twin/reported".to_string(),
            keep_alive_seconds: 30,
            connect_timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub url: String,
    pub timeout_seconds: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080/telemetry".to_string(),
            timeout_seconds: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0:3000".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_sensor_data: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            show_sensor_data: true,
        }
    }
}

impl StationConfig {
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).context("Failed to parse config")
    }

    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content)
    }

    /// Load with default fallback
    pub fn load_or_default() -> Self {
        let paths = [
            PathBuf::from("config").join("station.toml"),
            PathBuf::from("..").join("config").join("station.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        info!(path = %path.display(), "config loaded");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %path.display(), "failed to load config: {e:#}");
                    }
                }
            }
        }

        warn!("no config file found - using defaults");
        Self::default()
    }

    /// Log configuration summary
    pub fn log_summary(&self) {
        info!(
            transport = ?self.transport.kind,
            interval_seconds = self.telemetry.interval_seconds,
            gps = self.sensors.gps.enabled,
            accelerometer = self.sensors.accelerometer.enabled,
            environment = self.sensors.environment.enabled,
            digital = self.sensors.digital.enabled,
            server = self.server.enabled,
            "station configuration"
        );
    }
}
