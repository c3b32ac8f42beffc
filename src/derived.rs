//! values computed from several raw fields at once.
//!
//! everything here is a pure function of one snapshot and is recomputed on
//! every publish tick; nothing is cached between ticks.

use crate::store::{AccelerationState, AxisTriple};
use serde::Serialize;
use std::f64::consts::PI;

/// per-axis change between the two most recent acceleration samples
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Vibration {
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct DerivedSnapshot {
    /// degrees
    pub pitch: Option<f64>,
    /// degrees
    pub roll: Option<f64>,
    pub vibration: Option<Vibration>,
}

impl DerivedSnapshot {
    pub fn compute(acceleration: &AccelerationState) -> Self {
        Self {
            pitch: pitch(&acceleration.current),
            roll: roll(&acceleration.current),
            vibration: vibration(&acceleration.current, &acceleration.previous),
        }
    }
}

fn degrees(radians: f64) -> f64 {
    180.0 * radians / PI
}

pub fn pitch(current: &AxisTriple) -> Option<f64> {
    let (x, y, z) = current.complete()?;
    Some(degrees(x.atan2((y * y + z * z).sqrt())))
}

pub fn roll(current: &AxisTriple) -> Option<f64> {
    let (x, y, z) = current.complete()?;
    Some(degrees(y.atan2((x * x + z * z).sqrt())))
}

/// absent as a whole unless both triples are fully present
pub fn vibration(current: &AxisTriple, previous: &AxisTriple) -> Option<Vibration> {
    let (x, y, z) = current.complete()?;
    let (px, py, pz) = previous.complete()?;
    Some(Vibration {
        dx: x - px,
        dy: y - py,
        dz: z - pz,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Axis;
    use crate::store::StateStore;

    fn triple(x: f64, y: f64, z: f64) -> AxisTriple {
        AxisTriple {
            x: Some(x),
            y: Some(y),
            z: Some(z),
        }
    }

    #[test]
    fn test_pitch_on_x_axis() {
        assert_eq!(pitch(&triple(9.8, 0.0, 0.0)), Some(90.0));
        assert_eq!(pitch(&triple(-0.4, 0.0, 0.0)), Some(-90.0));
        assert_eq!(pitch(&triple(0.0, 0.0, 0.0)), Some(0.0));
    }

    #[test]
    fn test_roll_on_y_axis() {
        assert_eq!(roll(&triple(0.0, 2.0, 0.0)), Some(90.0));
        assert_eq!(roll(&triple(0.0, -2.0, 0.0)), Some(-90.0));
        assert_eq!(roll(&triple(0.0, 0.0, 0.0)), Some(0.0));
    }

    #[test]
    fn test_pitch_roll_flat() {
        let flat = triple(0.0, 0.0, 1.0);
        assert_eq!(pitch(&flat), Some(0.0));
        assert_eq!(roll(&flat), Some(0.0));

        let tilted = triple(1.0, 0.0, 1.0);
        let p = pitch(&tilted).unwrap();
        assert!((p - 45.0).abs() < 1e-9);
    }

    #[test]
    fn test_angles_absent_without_all_axes() {
        let partial = AxisTriple {
            x: Some(1.0),
            y: None,
            z: Some(1.0),
        };
        assert_eq!(pitch(&partial), None);
        assert_eq!(roll(&partial), None);
    }

    #[test]
    fn test_vibration_needs_two_full_triples() {
        let store = StateStore::default();
        let vib = |store: &StateStore| DerivedSnapshot::compute(&store.snapshot().acceleration).vibration;

        for (axis, v) in [(Axis::X, 1.0), (Axis::Y, 2.0), (Axis::Z, 3.0)] {
            store.update_axis(axis, v);
            assert_eq!(vib(&store), None);
        }
        store.update_axis(Axis::X, 1.5);
        store.update_axis(Axis::Y, 1.0);
        assert_eq!(vib(&store), None);

        store.update_axis(Axis::Z, 4.0);
        assert_eq!(
            vib(&store),
            Some(Vibration {
                dx: 0.5,
                dy: -1.0,
                dz: 1.0
            })
        );

        // only the most recent pair counts
        store.update_axis(Axis::X, 0.5);
        assert_eq!(vib(&store).map(|v| v.dx), Some(-1.0));
    }

    #[test]
    fn test_compute_on_empty_snapshot() {
        let derived = DerivedSnapshot::compute(&AccelerationState::default());
        assert_eq!(derived, DerivedSnapshot::default());
    }
}
