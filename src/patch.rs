//! remote configuration patches: validate each key, apply what is valid,
//! acknowledge what was applied.
//!
//! a patch is a json object. every key is handled on its own, so a bad value
//! or an unknown key never blocks the rest of the patch.

use crate::devices::DeviceError;
use crate::domain::Actuator;
use crate::hal::HardwareProvider;
use crate::store::{self, StateStore};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const INTERVAL_KEY: &str = "telemetryInterval";

/// applied keys and the normalized value each was applied with
pub type Acknowledgments = Map<String, Value>;

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("patch is not a json object")]
    NotAnObject,
    #[error("{key}: expected a positive number of seconds, got {value}")]
    InvalidInterval { key: String, value: Value },
    #[error("{key}: expected \"{on}\" or \"{off}\", got {value}")]
    InvalidState {
        key: String,
        on: &'static str,
        off: &'static str,
        value: Value,
    },
    #[error("{key}: could not drive {actuator}: {source}")]
    Hardware {
        key: String,
        actuator: Actuator,
        #[source]
        source: DeviceError,
    },
}

/// the patch key controlling an actuator
pub fn actuator_key(actuator: Actuator) -> &'static str {
    match actuator {
        Actuator::Buzzer => "buzzerState",
        Actuator::Fan => "fanState",
        Actuator::Light => "lightState",
        Actuator::DoorLock => "doorLockState",
    }
}

fn actuator_for_key(key: &str) -> Option<Actuator> {
    Actuator::ALL.into_iter().find(|a| actuator_key(*a) == key)
}

/// a json number or numeric string within the store's accepted range
pub fn parse_interval(value: &Value) -> Option<f64> {
    let seconds = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    store::is_valid_interval(seconds).then_some(seconds)
}

pub struct PatchDispatcher {
    store: Arc<StateStore>,
    hal: Arc<dyn HardwareProvider>,
}

impl PatchDispatcher {
    pub fn new(store: Arc<StateStore>, hal: Arc<dyn HardwareProvider>) -> Self {
        Self { store, hal }
    }

    /// apply one patch and return the acknowledgments for the keys that took.
    ///
    /// blocking: actuator keys drive hardware. nothing here returns an error to
    /// the caller; rejected keys are logged and left out of the result.
    pub fn dispatch(&self, patch: &Value) -> Acknowledgments {
        let mut acks = Acknowledgments::new();
        let Some(entries) = patch.as_object() else {
            warn!("{}", PatchError::NotAnObject);
            return acks;
        };

        for (key, value) in entries {
            // twin metadata such as $version
            if key.starts_with('$') {
                continue;
            }
            match self.apply_key(key, value) {
                Ok(Some(applied)) => {
                    info!(key = %key, value = %applied, "patch applied");
                    acks.insert(key.clone(), applied);
                }
                Ok(None) => debug!(key = %key, "ignoring unknown patch key"),
                Err(e) => warn!("patch key rejected: {e}"),
            }
        }
        acks
    }

    fn apply_key(&self, key: &str, value: &Value) -> Result<Option<Value>, PatchError> {
        if key == INTERVAL_KEY {
            let seconds = parse_interval(value)
                .filter(|s| self.store.set_interval(*s))
                .ok_or_else(|| PatchError::InvalidInterval {
                    key: key.to_string(),
                    value: value.clone(),
                })?;
            return Ok(Some(Value::from(seconds)));
        }

        let Some(actuator) = actuator_for_key(key) else {
            return Ok(None);
        };
        let on = value
            .as_str()
            .and_then(|s| actuator.parse_state(s))
            .ok_or_else(|| {
                let (on, off) = actuator.vocabulary();
                PatchError::InvalidState {
                    key: key.to_string(),
                    on,
                    off,
                    value: value.clone(),
                }
            })?;

        let _io = self.store.actuator_io(actuator);
        self.hal
            .set_actuator(actuator, on)
            .map_err(|source| PatchError::Hardware {
                key: key.to_string(),
                actuator,
                source,
            })?;
        self.store.set_actuator(actuator, on);
        Ok(Some(Value::from(actuator.word(on))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::fake::FakeHal;
    use serde_json::json;

    fn dispatcher() -> (PatchDispatcher, Arc<StateStore>, Arc<FakeHal>) {
        let store = Arc::new(StateStore::default());
        let hal = Arc::new(FakeHal::default());
        (PatchDispatcher::new(store.clone(), hal.clone()), store, hal)
    }

    #[test]
    fn test_unknown_key_is_skipped() {
        let (d, store, hal) = dispatcher();
        let acks = d.dispatch(&json!({"buzzerState": "on", "unknownKey": 5}));

        assert_eq!(acks.len(), 1);
        assert_eq!(acks["buzzerState"], "on");
        assert_eq!(store.actuator(Actuator::Buzzer), Some(true));
        assert_eq!(*hal.writes.lock().unwrap(), vec![(Actuator::Buzzer, true)]);
    }

    #[test]
    fn test_invalid_state_leaves_actuator_unchanged() {
        let (d, store, hal) = dispatcher();
        d.dispatch(&json!({"fanState": "off"}));

        for _ in 0..3 {
            let acks = d.dispatch(&json!({"fanState": "maybe"}));
            assert!(acks.is_empty());
        }
        assert!(d.dispatch(&json!({"fanState": 1})).is_empty());
        assert_eq!(store.actuator(Actuator::Fan), Some(false));
        assert_eq!(hal.writes.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_states_ignore_case_and_are_normalized() {
        let (d, store, _) = dispatcher();
        let acks = d.dispatch(&json!({"lightState": "ON", "doorLockState": "Close"}));

        assert_eq!(acks["lightState"], "on");
        assert_eq!(acks["doorLockState"], "close");
        assert_eq!(store.actuator(Actuator::Light), Some(true));
        assert_eq!(store.actuator(Actuator::DoorLock), Some(true));

        let acks = d.dispatch(&json!({"doorLockState": "open", "lightState": "off"}));
        assert_eq!(acks.len(), 2);
        assert_eq!(store.actuator(Actuator::DoorLock), Some(false));
    }

    #[test]
    fn test_door_lock_rejects_on_off() {
        let (d, store, _) = dispatcher();
        assert!(d.dispatch(&json!({"doorLockState": "on"})).is_empty());
        assert_eq!(store.actuator(Actuator::DoorLock), None);
    }

    #[test]
    fn test_interval_values() {
        let (d, store, _) = dispatcher();

        let acks = d.dispatch(&json!({"telemetryInterval": 30}));
        assert_eq!(acks["telemetryInterval"], 30.0);
        assert_eq!(store.snapshot().telemetry_interval, 30.0);

        let acks = d.dispatch(&json!({"telemetryInterval": "12.5"}));
        assert_eq!(acks["telemetryInterval"], 12.5);

        for bad in [json!(0), json!(-5), json!("abc"), json!(true), json!(null)] {
            let acks = d.dispatch(&json!({ "telemetryInterval": bad.clone() }));
            assert!(acks.is_empty(), "{bad} should be rejected");
        }
        assert_eq!(store.snapshot().telemetry_interval, 12.5);
    }

    #[test]
    fn test_interval_out_of_range_is_not_acknowledged() {
        let (d, store, _) = dispatcher();

        for bad in [json!(1e19), json!(1e-300), json!("1e19"), json!(0.01)] {
            let acks = d.dispatch(&json!({ "telemetryInterval": bad.clone() }));
            assert!(acks.is_empty(), "{bad} should be rejected");
        }
        assert_eq!(store.interval(), std::time::Duration::from_secs(10));

        let acks = d.dispatch(&json!({"telemetryInterval": crate::store::MAX_INTERVAL_SECONDS}));
        assert_eq!(acks["telemetryInterval"], crate::store::MAX_INTERVAL_SECONDS);
    }

    #[test]
    fn test_system_keys_and_non_objects() {
        let (d, store, _) = dispatcher();
        let before = store.snapshot();

        assert!(d.dispatch(&json!({"$version": 4})).is_empty());
        assert!(d.dispatch(&json!(["fanState", "on"])).is_empty());
        assert!(d.dispatch(&json!("fanState=on")).is_empty());
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn test_hardware_failure_drops_only_that_key() {
        let (d, store, hal) = dispatcher();
        hal.fail_actuator(Actuator::Fan);

        let acks = d.dispatch(&json!({"fanState": "on", "buzzerState": "off"}));

        assert_eq!(acks.len(), 1);
        assert!(acks.contains_key("buzzerState"));
        assert_eq!(store.actuator(Actuator::Fan), None);
        assert_eq!(store.actuator(Actuator::Buzzer), Some(false));
    }
}
