//! periodic telemetry publishing.
//!
//! each cycle reads the interval first, then snapshots, assembles, serializes
//! and sends; the next cycle starts one interval after this one started. an
//! interval patch therefore shapes the sleep of the cycle that follows it.

use crate::store::{self, StateStore};
use crate::telemetry::TelemetryMessage;
use crate::transport::{TelemetrySink, TransportError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("could not serialize telemetry: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Send(#[from] TransportError),
}

pub struct Publisher<S> {
    store: Arc<StateStore>,
    sink: S,
    show_payload: bool,
}

impl<S: TelemetrySink> Publisher<S> {
    pub fn new(store: Arc<StateStore>, sink: S, show_payload: bool) -> Self {
        Self {
            store,
            sink,
            show_payload,
        }
    }

    /// one snapshot, one message, one send attempt
    pub async fn publish_once(&self) -> Result<(), PublishError> {
        let snapshot = self.store.snapshot();
        let payload = TelemetryMessage::from_snapshot(&snapshot).to_json()?;
        if self.show_payload {
            info!("[TELEMETRY] {payload}");
        }
        self.sink.send(payload).await?;
        Ok(())
    }

    /// publish until cancelled. a failed send is logged and the next tick
    /// goes ahead as scheduled.
    pub async fn run(self, cancel: CancellationToken) -> S {
        info!(interval = ?self.store.interval(), "telemetry publisher started");
        loop {
            let started = Instant::now();
            let interval = self.store.interval();

            if let Err(e) = self.publish_once().await {
                warn!("telemetry tick failed: {e}");
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep_until(next_tick(started, interval)) => {}
            }
        }
        debug!("telemetry publisher stopped");
        self.sink
    }
}

/// `started + interval`, clamped so a huge interval can never overflow the clock
fn next_tick(started: Instant, interval: Duration) -> Instant {
    let interval = interval.min(Duration::from_secs_f64(store::MAX_INTERVAL_SECONDS));
    started.checked_add(interval).unwrap_or(started)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::sync::Mutex;

    #[derive(Clone)]
    struct RecordingSink {
        origin: Instant,
        sent: Arc<Mutex<Vec<(Duration, String)>>>,
        fail: bool,
    }

    impl RecordingSink {
        fn new(fail: bool) -> Self {
            Self {
                origin: Instant::now(),
                sent: Arc::default(),
                fail,
            }
        }

        fn times(&self) -> Vec<u64> {
            self.sent.lock().unwrap().iter().map(|(t, _)| t.as_secs()).collect()
        }
    }

    impl TelemetrySink for RecordingSink {
        async fn send(&self, payload: String) -> Result<(), TransportError> {
            self.sent
                .lock()
                .unwrap()
                .push((self.origin.elapsed(), payload));
            if self.fail {
                Err(TransportError::ConnectTimeout(0))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_change_applies_from_next_tick() {
        let store = Arc::new(StateStore::default());
        let sink = RecordingSink::new(false);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Publisher::new(store.clone(), sink.clone(), false).run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(store.set_interval(30.0));
        tokio::time::sleep(Duration::from_secs(50)).await;
        cancel.cancel();
        handle.await.unwrap();

        // tick at 10 was scheduled with the old interval; the one after it
        // follows 30s after the tick at 10 started
        assert_eq!(sink.times(), vec![0, 10, 40]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failures_do_not_stop_the_loop() {
        let store = Arc::new(StateStore::default());
        let sink = RecordingSink::new(true);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Publisher::new(store, sink.clone(), false).run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(25)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(sink.times(), vec![0, 10, 20]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_long_interval() {
        let store = Arc::new(StateStore::new(3600.0));
        let sink = RecordingSink::new(false);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Publisher::new(store, sink.clone(), false).run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        let before = Instant::now();
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(before.elapsed(), Duration::ZERO);
        assert_eq!(sink.times(), vec![0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_longest_interval_keeps_the_loop_alive() {
        let store = Arc::new(StateStore::default());
        assert!(!store.set_interval(1e19));
        assert!(store.set_interval(crate::store::MAX_INTERVAL_SECONDS));

        let sink = RecordingSink::new(false);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Publisher::new(store, sink.clone(), false).run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!handle.is_finished());
        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(sink.times(), vec![0]);
    }

    #[test]
    fn test_next_tick_is_clamped() {
        let now = Instant::now();
        let max = Duration::from_secs_f64(store::MAX_INTERVAL_SECONDS);
        assert_eq!(next_tick(now, Duration::MAX), now + max);
        assert_eq!(next_tick(now, Duration::from_secs(10)), now + Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_payload_is_flat_json() {
        let store = Arc::new(StateStore::default());
        let sink = RecordingSink::new(false);
        let publisher = Publisher::new(store, sink.clone(), false);

        publisher.publish_once().await.unwrap();

        let sent = sink.sent.lock().unwrap();
        let json: Value = serde_json::from_str(&sent[0].1).unwrap();
        assert!(json["latitude"].is_null());
        assert_eq!(json["telemetry_interval"], 10.0);
    }
}
