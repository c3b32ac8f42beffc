//! ==============================================================================
//! store.rs - the station's single shared state
//! ==============================================================================
//!
//! purpose:
//!     holds the latest value of every sensor field, every actuator state and
//!     the current telemetry interval. it is the only mutable resource shared
//!     between the pollers, the publisher and the patch dispatcher.
//!
//! invariants:
//!     - a field starts absent and, once observed, is only ever overwritten.
//!     - every logical update (gps pair, axis shift-then-write) happens inside
//!       one write-lock scope, so a snapshot never sees half of it.
//!     - no caller holds the lock across i/o: all methods take the lock,
//!       copy or assign plain values and return.
//!     - actuator hardware access and the matching store write happen under
//!       that actuator's own io lock (`actuator_io`), which is separate from
//!       the snapshot lock. the dispatcher and the digital read-back both
//!       take it, so a stale read-back never lands after a newer command.
//!
//! relationships:
//!     - written by: pollers.rs (sensor readings), patch.rs (actuators, interval)
//!     - read by: publisher.rs, server.rs (via snapshot())
//!
//! ==============================================================================

use crate::domain::{Actuator, Axis, BinarySensor, EnvField};
use crate::nmea;
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// telemetry interval used until a config value or a patch says otherwise
pub const DEFAULT_INTERVAL_SECONDS: f64 = 10.0;
/// shortest accepted interval; anything below would make the publisher spin
pub const MIN_INTERVAL_SECONDS: f64 = 0.1;
/// longest accepted interval (one week)
pub const MAX_INTERVAL_SECONDS: f64 = 604_800.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct GpsState {
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
}

/// one value per axis, any of which may still be absent
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct AxisTriple {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
}

impl AxisTriple {
    pub fn get(&self, axis: Axis) -> Option<f64> {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    fn slot(&mut self, axis: Axis) -> &mut Option<f64> {
        match axis {
            Axis::X => &mut self.x,
            Axis::Y => &mut self.y,
            Axis::Z => &mut self.z,
        }
    }

    /// all three axes, or nothing
    pub fn complete(&self) -> Option<(f64, f64, f64)> {
        Some((self.x?, self.y?, self.z?))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct AccelerationState {
    pub current: AxisTriple,
    /// the value each axis held immediately before its latest update
    pub previous: AxisTriple,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct EnvironmentState {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub water_level: Option<f64>,
    pub moisture_level: Option<f64>,
    pub noise_level: Option<f64>,
    pub luminosity_level: Option<f64>,
}

impl EnvironmentState {
    fn slot(&mut self, field: EnvField) -> &mut Option<f64> {
        match field {
            EnvField::Temperature => &mut self.temperature,
            EnvField::Humidity => &mut self.humidity,
            EnvField::WaterLevel => &mut self.water_level,
            EnvField::MoistureLevel => &mut self.moisture_level,
            EnvField::NoiseLevel => &mut self.noise_level,
            EnvField::LuminosityLevel => &mut self.luminosity_level,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct BinaryState {
    pub door_closed: Option<bool>,
    pub motion_detected: Option<bool>,
    pub buzzer_on: Option<bool>,
    pub fan_on: Option<bool>,
    pub light_on: Option<bool>,
    pub door_locked: Option<bool>,
}

impl BinaryState {
    pub fn actuator(&self, actuator: Actuator) -> Option<bool> {
        match actuator {
            Actuator::Buzzer => self.buzzer_on,
            Actuator::Fan => self.fan_on,
            Actuator::Light => self.light_on,
            Actuator::DoorLock => self.door_locked,
        }
    }

    fn sensor_slot(&mut self, sensor: BinarySensor) -> &mut Option<bool> {
        match sensor {
            BinarySensor::DoorClosed => &mut self.door_closed,
            BinarySensor::MotionDetected => &mut self.motion_detected,
        }
    }

    fn actuator_slot(&mut self, actuator: Actuator) -> &mut Option<bool> {
        match actuator {
            Actuator::Buzzer => &mut self.buzzer_on,
            Actuator::Fan => &mut self.fan_on,
            Actuator::Light => &mut self.light_on,
            Actuator::DoorLock => &mut self.door_locked,
        }
    }
}

/// point-in-time copy of every field in the store
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct StationSnapshot {
    pub gps: GpsState,
    pub acceleration: AccelerationState,
    pub environment: EnvironmentState,
    pub binary: BinaryState,
    /// seconds between publish ticks
    pub telemetry_interval: f64,
}

impl Default for StationSnapshot {
    fn default() -> Self {
        Self {
            gps: GpsState::default(),
            acceleration: AccelerationState::default(),
            environment: EnvironmentState::default(),
            binary: BinaryState::default(),
            telemetry_interval: DEFAULT_INTERVAL_SECONDS,
        }
    }
}

pub struct StateStore {
    inner: RwLock<StationSnapshot>,
    actuator_io: [Mutex<()>; 4],
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(DEFAULT_INTERVAL_SECONDS)
    }
}

impl StateStore {
    /// every field absent; an invalid interval falls back to the default
    pub fn new(interval_seconds: f64) -> Self {
        let mut initial = StationSnapshot::default();
        if is_valid_interval(interval_seconds) {
            initial.telemetry_interval = interval_seconds;
        }
        Self {
            inner: RwLock::new(initial),
            actuator_io: Default::default(),
        }
    }

    // Every critical section only assigns plain values, so a panic elsewhere
    // can never leave a half-written state behind the poison flag.
    fn read(&self) -> RwLockReadGuard<'_, StationSnapshot> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StationSnapshot> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> StationSnapshot {
        *self.read()
    }

    /// longitude and latitude from one sentence land together
    pub fn update_gps(&self, longitude: f64, latitude: f64) {
        let mut state = self.write();
        state.gps.longitude = Some(longitude);
        state.gps.latitude = Some(latitude);
    }

    /// sign-correct raw NMEA fields and store them as one update.
    ///
    /// returns false (and changes nothing) when either field fails correction.
    pub fn update_gps_raw(&self, raw_longitude: &str, raw_latitude: &str) -> bool {
        match (
            nmea::correct_coordinate(raw_longitude),
            nmea::correct_coordinate(raw_latitude),
        ) {
            (Some(longitude), Some(latitude)) => {
                self.update_gps(longitude, latitude);
                true
            }
            _ => false,
        }
    }

    /// shift the axis' current value into its previous slot, then overwrite it
    pub fn update_axis(&self, axis: Axis, value: f64) {
        let mut state = self.write();
        let accel = &mut state.acceleration;
        *accel.previous.slot(axis) = accel.current.get(axis);
        *accel.current.slot(axis) = Some(value);
    }

    pub fn update_field(&self, field: EnvField, value: f64) {
        *self.write().environment.slot(field) = Some(value);
    }

    pub fn update_binary(&self, sensor: BinarySensor, value: bool) {
        *self.write().binary.sensor_slot(sensor) = Some(value);
    }

    pub fn set_actuator(&self, actuator: Actuator, on: bool) {
        *self.write().binary.actuator_slot(actuator) = Some(on);
    }

    pub fn actuator(&self, actuator: Actuator) -> Option<bool> {
        self.read().binary.actuator(actuator)
    }

    /// held while driving or reading back one actuator and recording the result
    pub fn actuator_io(&self, actuator: Actuator) -> MutexGuard<'_, ()> {
        self.actuator_io[actuator as usize]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// returns false for values outside the accepted range, which are ignored
    pub fn set_interval(&self, seconds: f64) -> bool {
        if !is_valid_interval(seconds) {
            return false;
        }
        self.write().telemetry_interval = seconds;
        true
    }

    pub fn interval(&self) -> Duration {
        let seconds = self.read().telemetry_interval;
        Duration::try_from_secs_f64(seconds)
            .unwrap_or_else(|_| Duration::from_secs_f64(DEFAULT_INTERVAL_SECONDS))
    }
}

/// finite and within `MIN_INTERVAL_SECONDS..=MAX_INTERVAL_SECONDS`
pub fn is_valid_interval(seconds: f64) -> bool {
    (MIN_INTERVAL_SECONDS..=MAX_INTERVAL_SECONDS).contains(&seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_new_store_is_all_absent() {
        let store = StateStore::default();
        let snap = store.snapshot();
        assert_eq!(snap.gps, GpsState::default());
        assert_eq!(snap.acceleration, AccelerationState::default());
        assert_eq!(snap.environment, EnvironmentState::default());
        assert_eq!(snap.binary, BinaryState::default());
        assert_eq!(snap.telemetry_interval, 10.0);
    }

    #[test]
    fn test_update_axis_shifts_previous() {
        let store = StateStore::default();
        store.update_axis(Axis::X, 1.0);
        let snap = store.snapshot();
        assert_eq!(snap.acceleration.current.x, Some(1.0));
        assert_eq!(snap.acceleration.previous.x, None);

        store.update_axis(Axis::X, 3.0);
        let snap = store.snapshot();
        assert_eq!(snap.acceleration.current.x, Some(3.0));
        assert_eq!(snap.acceleration.previous.x, Some(1.0));
        assert_eq!(snap.acceleration.current.y, None);
    }

    #[test]
    fn test_fields_never_revert_to_absent() {
        let store = StateStore::default();
        store.update_field(EnvField::Temperature, 21.5);
        store.update_binary(BinarySensor::DoorClosed, true);
        assert!(!store.update_gps_raw("", "4807.038"));
        store.update_field(EnvField::Humidity, 40.0);

        let snap = store.snapshot();
        assert_eq!(snap.environment.temperature, Some(21.5));
        assert_eq!(snap.environment.humidity, Some(40.0));
        assert_eq!(snap.binary.door_closed, Some(true));
        assert_eq!(snap.gps, GpsState::default());
    }

    #[test]
    fn test_update_gps_raw_applies_sign_rule() {
        let store = StateStore::default();
        assert!(store.update_gps_raw("0123.45", "4807.038"));
        let snap = store.snapshot();
        assert_eq!(snap.gps.longitude, Some(-1.2345));
        let latitude = snap.gps.latitude.unwrap();
        assert!((latitude - 48.07038).abs() < 1e-9);
    }

    #[test]
    fn test_set_interval_rejects_invalid() {
        let store = StateStore::default();
        assert!(!store.set_interval(0.0));
        assert!(!store.set_interval(-3.0));
        assert!(!store.set_interval(f64::NAN));
        assert!(!store.set_interval(f64::INFINITY));
        assert!(!store.set_interval(1e-300));
        assert!(!store.set_interval(1e19));
        assert_eq!(store.interval(), Duration::from_secs(10));

        assert!(store.set_interval(MIN_INTERVAL_SECONDS));
        assert!(store.set_interval(MAX_INTERVAL_SECONDS));

        assert!(store.set_interval(2.5));
        assert_eq!(store.interval(), Duration::from_millis(2500));
    }

    #[test]
    fn test_invalid_initial_interval_uses_default() {
        let store = StateStore::new(-1.0);
        assert_eq!(store.snapshot().telemetry_interval, DEFAULT_INTERVAL_SECONDS);
    }

    #[test]
    fn test_gps_pair_is_never_torn() {
        let store = Arc::new(StateStore::default());
        let done = Arc::new(AtomicBool::new(false));

        let writer = {
            let store = store.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                for i in 0..20_000 {
                    let v = i as f64;
                    store.update_gps(v, v);
                }
                done.store(true, Ordering::SeqCst);
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                let done = done.clone();
                std::thread::spawn(move || {
                    while !done.load(Ordering::SeqCst) {
                        let gps = store.snapshot().gps;
                        assert_eq!(gps.longitude, gps.latitude, "torn gps update");
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
    }

    #[test]
    fn test_axis_shift_is_never_torn() {
        // every write is previous + 1, so a consistent snapshot always shows
        // current == previous + 1 once two writes have landed
        let store = Arc::new(StateStore::default());
        store.update_axis(Axis::Z, 0.0);
        let done = Arc::new(AtomicBool::new(false));

        let writer = {
            let store = store.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                for i in 1..20_000 {
                    store.update_axis(Axis::Z, i as f64);
                }
                done.store(true, Ordering::SeqCst);
            })
        };

        while !done.load(Ordering::SeqCst) {
            let accel = store.snapshot().acceleration;
            if let (Some(cur), Some(prev)) = (accel.current.z, accel.previous.z) {
                assert_eq!(cur, prev + 1.0);
            }
        }
        writer.join().unwrap();
    }
}
