use serde::{Deserialize, Serialize};
use std::fmt;

/// accelerometer axis
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

/// scalar environmental readings (ADC channels, AHT20, illuminance)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvField {
    Temperature,
    Humidity,
    WaterLevel,
    MoistureLevel,
    NoiseLevel,
    LuminosityLevel,
}

/// digital inputs that are only ever observed, never driven
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinarySensor {
    DoorClosed,
    MotionDetected,
}

/// controllable outputs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actuator {
    Buzzer,
    Fan,
    Light,
    DoorLock,
}

impl Actuator {
    pub const ALL: [Actuator; 4] = [
        Actuator::Buzzer,
        Actuator::Fan,
        Actuator::Light,
        Actuator::DoorLock,
    ];

    /// the two words a remote patch may use for this actuator, `(true, false)`
    pub fn vocabulary(self) -> (&'static str, &'static str) {
        match self {
            Actuator::DoorLock => ("close", "open"),
            _ => ("on", "off"),
        }
    }

    /// parse a patch value, ignoring case
    pub fn parse_state(self, raw: &str) -> Option<bool> {
        let (on, off) = self.vocabulary();
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case(on) {
            Some(true)
        } else if raw.eq_ignore_ascii_case(off) {
            Some(false)
        } else {
            None
        }
    }

    /// the word acknowledged back for a state
    pub fn word(self, on: bool) -> &'static str {
        let (on_word, off_word) = self.vocabulary();
        if on {
            on_word
        } else {
            off_word
        }
    }
}

impl fmt::Display for Actuator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Actuator::Buzzer => "buzzer",
            Actuator::Fan => "fan",
            Actuator::Light => "light",
            Actuator::DoorLock => "door lock",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_state_ignores_case() {
        assert_eq!(Actuator::Fan.parse_state("ON"), Some(true));
        assert_eq!(Actuator::Fan.parse_state("Off"), Some(false));
        assert_eq!(Actuator::Fan.parse_state("maybe"), None);
        assert_eq!(Actuator::DoorLock.parse_state("Close"), Some(true));
        assert_eq!(Actuator::DoorLock.parse_state("on"), None);
    }

    #[test]
    fn test_word_matches_vocabulary() {
        assert_eq!(Actuator::Light.word(true), "on");
        assert_eq!(Actuator::DoorLock.word(false), "open");
    }
}
