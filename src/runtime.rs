//! ==============================================================================
//! runtime.rs - station runtime handle
//! ==============================================================================
//!
//! purpose:
//!     owns everything the station shares between tasks: the StateStore, the
//!     hardware provider, the patch dispatcher, the poller health counters,
//!     the last reported acknowledgments and the cancellation token.
//!
//! usage:
//!     main.rs builds one StationRuntime, starts the pollers, hands
//!     `patch_handler()` to the transport and a clone of the runtime to the
//!     status server. cancelling `cancel_token()` stops every loop.
//!
//! relationships:
//!     - used by: main.rs, server.rs
//!     - uses: store.rs, pollers.rs, patch.rs, hal.rs
//!
//! ==============================================================================

use crate::config::StationConfig;
use crate::hal::HardwareProvider;
use crate::patch::{Acknowledgments, PatchDispatcher};
use crate::pollers::{HealthReport, PollerSet};
use crate::store::{StateStore, StationSnapshot};
use crate::transport::PatchHandler;
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

/// Cheap to clone: every field is shared
#[derive(Clone)]
pub struct StationRuntime {
    config: Arc<StationConfig>,
    store: Arc<StateStore>,
    hal: Arc<dyn HardwareProvider>,
    dispatcher: Arc<PatchDispatcher>,
    pollers: Arc<PollerSet>,
    // union of every acknowledgment so far, newest value per key
    reported: Arc<Mutex<Acknowledgments>>,
    cancel: CancellationToken,
}

impl StationRuntime {
    pub fn new(config: StationConfig, hal: Arc<dyn HardwareProvider>) -> Self {
        let store = Arc::new(StateStore::new(config.telemetry.interval_seconds));
        let dispatcher = Arc::new(PatchDispatcher::new(store.clone(), hal.clone()));
        Self {
            config: Arc::new(config),
            store,
            hal,
            dispatcher,
            pollers: Arc::new(PollerSet::default()),
            reported: Arc::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &StationConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<StateStore> {
        self.store.clone()
    }

    pub fn snapshot(&self) -> StationSnapshot {
        self.store.snapshot()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn start_pollers(&self) -> anyhow::Result<()> {
        self.pollers.spawn(
            self.hal.clone(),
            self.store.clone(),
            &self.config.sensors,
            &self.cancel,
        )
    }

    pub fn health(&self) -> Vec<HealthReport> {
        self.pollers.reports()
    }

    /// blocking: dispatch one patch and remember what was acknowledged
    pub fn handle_patch(&self, patch: &Value) -> Acknowledgments {
        let acks = self.dispatcher.dispatch(patch);
        if !acks.is_empty() {
            let mut reported = self
                .reported
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            for (key, value) in &acks {
                reported.insert(key.clone(), value.clone());
            }
        }
        acks
    }

    pub fn reported(&self) -> Acknowledgments {
        self.reported
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// the callback a transport registers for inbound patches
    pub fn patch_handler(&self) -> PatchHandler {
        let runtime = self.clone();
        Arc::new(move |patch: Value| runtime.handle_patch(&patch))
    }
}
