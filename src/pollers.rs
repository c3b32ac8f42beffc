//! ==============================================================================
//! pollers.rs - background sensor sampling
//! ==============================================================================
//!
//! purpose:
//!     one loop per sensor subsystem, each reading from its own source and
//!     writing decoded samples into the StateStore.
//!
//! loops:
//!     - gps:           dedicated thread, one NMEA line per step
//!     - accelerometer: dedicated thread, one input event per step
//!     - environment:   async task, one blocking sample batch per period
//!     - digital:       async task, inputs plus actuator read-back per period
//!
//! failure semantics:
//!     a bad frame is counted, logged at debug and dropped; the loop moves on
//!     to the next one. a reading that fails never writes anything, so fields
//!     stay absent until the first good sample. every loop checks the shared
//!     cancellation token between samples.
//!
//! relationships:
//!     - uses: hal.rs (sources), nmea.rs / devices.rs (decoding)
//!     - writes: store.rs
//!     - reported by: server.rs (/api/health)
//!
//! ==============================================================================

use crate::config::{EnvironmentConfig, SensorsConfig};
use crate::devices::{self, DeviceError};
use crate::domain::{Actuator, BinarySensor, EnvField};
use crate::hal::{AccelSource, HardwareProvider, NmeaSource};
use crate::nmea::{self, NmeaError};
use crate::store::StateStore;
use serde::Serialize;
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// pause before reopening a device that failed to open
const REOPEN_DELAY: Duration = Duration::from_secs(5);
/// pause after a source i/o error
const IO_ERROR_DELAY: Duration = Duration::from_millis(500);

/// sample/error counters for one poller
#[derive(Debug)]
pub struct PollerHealth {
    name: &'static str,
    samples: AtomicU64,
    errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub name: &'static str,
    pub samples: u64,
    pub errors: u64,
}

impl PollerHealth {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            samples: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn record_sample(&self) {
        self.samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, error: &dyn Display) {
        let total = self.errors.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(poller = self.name, errors = total, "sample dropped: {error}");
    }

    pub fn report(&self) -> HealthReport {
        HealthReport {
            name: self.name,
            samples: self.samples.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

// ==============================================================================
// single steps
// ==============================================================================

/// read and apply one GPS line.
///
/// decode failures are recorded here; the returned error is a source failure.
pub fn gps_step(
    source: &mut dyn NmeaSource,
    store: &StateStore,
    health: &PollerHealth,
) -> Result<(), DeviceError> {
    let Some(bytes) = source.read_line()? else {
        return Ok(());
    };
    let line = match std::str::from_utf8(&bytes) {
        Ok(line) => line,
        Err(e) => {
            health.record_error(&e);
            return source.reset_input();
        }
    };
    if line.trim().is_empty() {
        return Ok(());
    }

    match nmea::parse_position(line) {
        Ok(position) => {
            if store.update_gps_raw(position.longitude, position.latitude) {
                health.record_sample();
            } else {
                health.record_error(&format_args!(
                    "unusable coordinates {:?}/{:?}",
                    position.longitude, position.latitude
                ));
            }
        }
        // satellites-in-view and friends are normal traffic
        Err(NmeaError::Unsupported(_)) => {}
        Err(e) => health.record_error(&e),
    }
    Ok(())
}

/// read and apply one accelerometer event; non-axis events are skipped
pub fn accel_step(
    source: &mut dyn AccelSource,
    store: &StateStore,
    health: &PollerHealth,
) -> Result<(), DeviceError> {
    let event = source.read_event()?;
    if let Some((axis, value)) = devices::acceleration_sample(&event) {
        store.update_axis(axis, value);
        health.record_sample();
    }
    Ok(())
}

/// one pass over every environmental channel; each channel fails on its own
pub fn environment_step(
    hal: &dyn HardwareProvider,
    config: &EnvironmentConfig,
    store: &StateStore,
    health: &PollerHealth,
) {
    match hal.read_temperature_humidity() {
        Ok((temperature, humidity)) => {
            store.update_field(EnvField::Temperature, temperature);
            store.update_field(EnvField::Humidity, humidity);
            health.record_sample();
        }
        Err(e) => health.record_error(&e),
    }

    let channels = [
        (EnvField::MoistureLevel, config.moisture_channel),
        (EnvField::WaterLevel, config.water_channel),
        (EnvField::NoiseLevel, config.noise_channel),
    ];
    for (field, channel) in channels {
        match hal.read_adc(channel) {
            Ok(raw) => {
                store.update_field(field, f64::from(raw));
                health.record_sample();
            }
            Err(e) => health.record_error(&e),
        }
    }

    match hal.read_illuminance() {
        Ok(lux) => {
            store.update_field(EnvField::LuminosityLevel, lux.round());
            health.record_sample();
        }
        Err(e) => health.record_error(&e),
    }
}

/// door/motion inputs, then whatever state the actuators report back
pub fn digital_step(hal: &dyn HardwareProvider, store: &StateStore, health: &PollerHealth) {
    for sensor in [BinarySensor::DoorClosed, BinarySensor::MotionDetected] {
        match hal.read_input(sensor) {
            Ok(value) => {
                store.update_binary(sensor, value);
                health.record_sample();
            }
            Err(e) => health.record_error(&e),
        }
    }

    for actuator in Actuator::ALL {
        let _io = store.actuator_io(actuator);
        match hal.actuator_state(actuator) {
            Ok(Some(on)) => store.set_actuator(actuator, on),
            Ok(None) => {}
            Err(e) => health.record_error(&e),
        }
    }
}

// ==============================================================================
// loops
// ==============================================================================

fn open_with_retry<T>(
    what: &str,
    cancel: &CancellationToken,
    health: &PollerHealth,
    open: impl Fn() -> Result<T, DeviceError>,
) -> Option<T> {
    while !cancel.is_cancelled() {
        match open() {
            Ok(source) => {
                info!("{what} opened");
                return Some(source);
            }
            Err(e) => {
                health.record_error(&e);
                warn!("failed to open {what}: {e} (retrying in {}s)", REOPEN_DELAY.as_secs());
                std::thread::sleep(REOPEN_DELAY);
            }
        }
    }
    None
}

fn pause_after(error: &DeviceError) {
    if matches!(error, DeviceError::Io(_) | DeviceError::Hardware(_)) {
        std::thread::sleep(IO_ERROR_DELAY);
    }
}

fn run_gps(
    hal: Arc<dyn HardwareProvider>,
    store: Arc<StateStore>,
    health: Arc<PollerHealth>,
    cancel: CancellationToken,
) {
    let Some(mut source) = open_with_retry("gps", &cancel, &health, || hal.open_gps()) else {
        return;
    };
    while !cancel.is_cancelled() {
        if let Err(e) = gps_step(source.as_mut(), &store, &health) {
            health.record_error(&e);
            pause_after(&e);
        }
    }
    debug!("gps poller stopped");
}

fn run_accelerometer(
    hal: Arc<dyn HardwareProvider>,
    store: Arc<StateStore>,
    health: Arc<PollerHealth>,
    cancel: CancellationToken,
) {
    let Some(mut source) =
        open_with_retry("accelerometer", &cancel, &health, || hal.open_accelerometer())
    else {
        return;
    };
    while !cancel.is_cancelled() {
        if let Err(e) = accel_step(source.as_mut(), &store, &health) {
            health.record_error(&e);
            pause_after(&e);
        }
    }
    debug!("accelerometer poller stopped");
}

/// run `step` on the blocking pool every `period` until cancelled
async fn run_periodic(
    name: &'static str,
    period: Duration,
    cancel: CancellationToken,
    step: Arc<dyn Fn() + Send + Sync>,
) {
    loop {
        let step = step.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || step()).await {
            warn!(poller = name, "sample task failed: {e}");
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(period) => {}
        }
    }
    debug!(poller = name, "poller stopped");
}

/// health counters for the four pollers, and the code that starts them
pub struct PollerSet {
    pub gps: Arc<PollerHealth>,
    pub accelerometer: Arc<PollerHealth>,
    pub environment: Arc<PollerHealth>,
    pub digital: Arc<PollerHealth>,
}

impl Default for PollerSet {
    fn default() -> Self {
        Self {
            gps: Arc::new(PollerHealth::new("gps")),
            accelerometer: Arc::new(PollerHealth::new("accelerometer")),
            environment: Arc::new(PollerHealth::new("environment")),
            digital: Arc::new(PollerHealth::new("digital")),
        }
    }
}

impl PollerSet {
    pub fn reports(&self) -> Vec<HealthReport> {
        [&self.gps, &self.accelerometer, &self.environment, &self.digital]
            .into_iter()
            .map(|h| h.report())
            .collect()
    }

    /// start every enabled poller; must be called inside a tokio runtime
    pub fn spawn(
        &self,
        hal: Arc<dyn HardwareProvider>,
        store: Arc<StateStore>,
        config: &SensorsConfig,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        if config.gps.enabled {
            let (hal, store, health, cancel) =
                (hal.clone(), store.clone(), self.gps.clone(), cancel.clone());
            std::thread::Builder::new()
                .name("gps-poller".into())
                .spawn(move || run_gps(hal, store, health, cancel))?;
        }

        if config.accelerometer.enabled {
            let (hal, store, health, cancel) =
                (hal.clone(), store.clone(), self.accelerometer.clone(), cancel.clone());
            std::thread::Builder::new()
                .name("accel-poller".into())
                .spawn(move || run_accelerometer(hal, store, health, cancel))?;
        }

        if config.environment.enabled {
            let env = config.environment.clone();
            let (hal, store, health) = (hal.clone(), store.clone(), self.environment.clone());
            let step: Arc<dyn Fn() + Send + Sync> =
                Arc::new(move || environment_step(hal.as_ref(), &env, &store, &health));
            tokio::spawn(run_periodic(
                "environment",
                Duration::from_millis(config.environment.sample_interval_ms.max(1)),
                cancel.clone(),
                step,
            ));
        }

        if config.digital.enabled {
            let (hal, store, health) = (hal.clone(), store.clone(), self.digital.clone());
            let step: Arc<dyn Fn() + Send + Sync> =
                Arc::new(move || digital_step(hal.as_ref(), &store, &health));
            tokio::spawn(run_periodic(
                "digital",
                Duration::from_millis(config.digital.sample_interval_ms.max(1)),
                cancel.clone(),
                step,
            ));
        }

        info!(
            gps = config.gps.enabled,
            accelerometer = config.accelerometer.enabled,
            environment = config.environment.enabled,
            digital = config.digital.enabled,
            "pollers started"
        );
        Ok(())
    }
}
