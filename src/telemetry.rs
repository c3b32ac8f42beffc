//! the payload sent to the management plane on every publish tick.
//!
//! one flat json object: every stored field plus the derived values. fields
//! that have not been observed yet serialize as `null`.

use crate::derived::{DerivedSnapshot, Vibration};
use crate::store::StationSnapshot;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TelemetryMessage {
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,

    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub prev_x: Option<f64>,
    pub prev_y: Option<f64>,
    pub prev_z: Option<f64>,

    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub water_level: Option<f64>,
    pub moisture_level: Option<f64>,
    pub noise_level: Option<f64>,
    pub luminosity_level: Option<f64>,

    pub door_closed: Option<bool>,
    pub motion_detected: Option<bool>,
    pub buzzer_on: Option<bool>,
    pub fan_on: Option<bool>,
    pub light_on: Option<bool>,
    pub door_locked: Option<bool>,

    pub telemetry_interval: f64,

    pub pitch: Option<f64>,
    pub roll: Option<f64>,
    pub vibration: Option<Vibration>,
}

impl TelemetryMessage {
    pub fn assemble(snapshot: &StationSnapshot, derived: &DerivedSnapshot) -> Self {
        let accel = &snapshot.acceleration;
        let env = &snapshot.environment;
        let bin = &snapshot.binary;
        Self {
            longitude: snapshot.gps.longitude,
            latitude: snapshot.gps.latitude,
            x: accel.current.x,
            y: accel.current.y,
            z: accel.current.z,
            prev_x: accel.previous.x,
            prev_y: accel.previous.y,
            prev_z: accel.previous.z,
            temperature: env.temperature,
            humidity: env.humidity,
            water_level: env.water_level,
            moisture_level: env.moisture_level,
            noise_level: env.noise_level,
            luminosity_level: env.luminosity_level,
            door_closed: bin.door_closed,
            motion_detected: bin.motion_detected,
            buzzer_on: bin.buzzer_on,
            fan_on: bin.fan_on,
            light_on: bin.light_on,
            door_locked: bin.door_locked,
            telemetry_interval: snapshot.telemetry_interval,
            pitch: derived.pitch,
            roll: derived.roll,
            vibration: derived.vibration,
        }
    }

    /// snapshot in, message out: derived values are computed here
    pub fn from_snapshot(snapshot: &StationSnapshot) -> Self {
        let derived = DerivedSnapshot::compute(&snapshot.acceleration);
        Self::assemble(snapshot, &derived)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
