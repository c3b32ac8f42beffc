//! mqtt transport: telemetry on one topic, desired-property patches in on
//! another, acknowledgments out on a third.

use super::{PatchHandler, TelemetrySink, TransportError};
use crate::config::MqttConfig;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(2);
/// how long the event loop keeps running after shutdown to flush the
/// last telemetry and the DISCONNECT
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const REQUEST_CAPACITY: usize = 64;

pub struct MqttTransport {
    client: AsyncClient,
    telemetry_topic: String,
    // cleared by the event loop whenever the broker connection drops
    connected: Arc<AtomicBool>,
    stop: CancellationToken,
    event_loop: JoinHandle<()>,
}

impl MqttTransport {
    /// connect, wait for the broker to accept us, subscribe to patches and
    /// start the event loop task
    pub async fn connect(
        config: &MqttConfig,
        on_patch: PatchHandler,
        cancel: CancellationToken,
    ) -> Result<Self, TransportError> {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_seconds.max(5)));
        if let Some(username) = &config.username {
            options.set_credentials(username, config.password.as_deref().unwrap_or(""));
        }

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

        let timeout = Duration::from_secs(config.connect_timeout_seconds.max(1));
        tokio::time::timeout(timeout, wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| TransportError::ConnectTimeout(timeout.as_secs()))??;
        info!(host = %config.host, port = config.port, "mqtt connected");

        client
            .subscribe(&config.desired_topic, QoS::AtLeastOnce)
            .await?;
        info!(topic = %config.desired_topic, "subscribed for patches");

        let connected = Arc::new(AtomicBool::new(true));
        let stop = cancel.child_token();
        let event_loop = tokio::spawn(run_event_loop(
            eventloop,
            client.clone(),
            config.clone(),
            on_patch,
            connected.clone(),
            stop.clone(),
        ));

        Ok(Self {
            client,
            telemetry_topic: config.telemetry_topic.clone(),
            connected,
            stop,
            event_loop,
        })
    }

    /// send DISCONNECT and wait until the event loop has written it, or
    /// has given up after `DISCONNECT_TIMEOUT`
    pub async fn close(self) {
        self.stop.cancel();
        if let Err(e) = self.client.disconnect().await {
            warn!("mqtt disconnect request failed: {e}");
        }
        if let Err(e) = self.event_loop.await {
            error!("mqtt event loop failed: {e}");
        }
    }
}

impl TelemetrySink for MqttTransport {
    /// queues the publish on the client. a message queued while the broker
    /// is reachable is not confirmed; one sent while it is not fails here.
    async fn send(&self, payload: String) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(TransportError::NotConnected);
        }
        self.client
            .publish(
                &self.telemetry_topic,
                QoS::AtLeastOnce,
                false,
                payload.into_bytes(),
            )
            .await?;
        Ok(())
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), TransportError> {
    loop {
        if let Event::Incoming(Packet::ConnAck(ack)) = eventloop.poll().await? {
            return match ack.code {
                ConnectReturnCode::Success => Ok(()),
                code => Err(TransportError::Refused(code)),
            };
        }
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    config: MqttConfig,
    on_patch: PatchHandler,
    connected: Arc<AtomicBool>,
    stop: CancellationToken,
) {
    let grace = async {
        stop.cancelled().await;
        tokio::time::sleep(DISCONNECT_TIMEOUT).await;
    };
    tokio::pin!(grace);

    loop {
        let event = tokio::select! {
            _ = &mut grace => {
                warn!("mqtt event loop stopped before the disconnect went out");
                break;
            }
            event = eventloop.poll() => event,
        };
        match event {
            Ok(Event::Incoming(Packet::Publish(p))) if p.topic == config.desired_topic => {
                handle_patch(&client, &config.reported_topic, &on_patch, p.payload.to_vec()).await;
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("mqtt reconnected");
                connected.store(true, Ordering::Release);
                // clean sessions drop subscriptions on reconnect
                if let Err(e) = client.try_subscribe(&config.desired_topic, QoS::AtLeastOnce) {
                    error!("re-subscribe {} failed: {e}", config.desired_topic);
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                connected.store(false, Ordering::Release);
                warn!("mqtt disconnected by broker");
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                connected.store(false, Ordering::Release);
                info!("mqtt disconnected");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                connected.store(false, Ordering::Release);
                if stop.is_cancelled() {
                    debug!("mqtt connection closed during shutdown: {e}");
                    break;
                }
                warn!("mqtt connection error: {e}");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
    debug!("mqtt event loop stopped");
}

async fn handle_patch(
    client: &AsyncClient,
    reported_topic: &str,
    on_patch: &PatchHandler,
    payload: Vec<u8>,
) {
    let handler = on_patch.clone();
    let reply = match tokio::task::spawn_blocking(move || patch_reply(&handler, &payload)).await {
        Ok(reply) => reply,
        Err(e) => {
            error!("patch handler failed: {e}");
            return;
        }
    };
    let Some(body) = reply else {
        return;
    };

    // the event loop is parked until we return: never wait on the queue
    if let Err(e) = client.try_publish(reported_topic, QoS::AtLeastOnce, false, body) {
        warn!("failed to report acknowledgments: {e}");
    }
}

/// decode one patch, apply it and encode what was acknowledged.
///
/// blocking. `None` when the payload is not json or nothing was applied.
fn patch_reply(on_patch: &PatchHandler, payload: &[u8]) -> Option<Vec<u8>> {
    let patch: Value = match serde_json::from_slice(payload) {
        Ok(patch) => patch,
        Err(e) => {
            warn!("discarding patch that is not json: {e}");
            return None;
        }
    };

    let acks = on_patch(patch);
    if acks.is_empty() {
        return None;
    }
    match serde_json::to_vec(&acks) {
        Ok(body) => Some(body),
        Err(e) => {
            warn!("failed to encode acknowledgments: {e}");
            None
        }
    }
}
