//! ==============================================================================
//! transport - the management-plane connection
//! ==============================================================================
//!
//! purpose:
//!     carries telemetry out and patches in.
//!
//! seams:
//!     - TelemetrySink: one serialized TelemetryMessage per publish tick.
//!     - PatchHandler: the single callback a transport invokes for every
//!       inbound patch; it returns the acknowledgments, which the transport
//!       writes back through its reported-property mechanism.
//!
//! implementations:
//!     - mqtt.rs: device-twin style topics over rumqttc (patches in, acks out)
//!     - http.rs: POST per tick via reqwest (patches arrive via server.rs)
//!
//! ==============================================================================

pub mod http;
pub mod mqtt;

use crate::config::{TransportConfig, TransportKind};
use crate::patch::Acknowledgments;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use http::HttpTransport;
pub use mqtt::MqttTransport;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("mqtt request failed: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("mqtt connection failed: {0}")]
    Connection(#[from] rumqttc::ConnectionError),
    #[error("broker refused the connection: {0:?}")]
    Refused(rumqttc::ConnectReturnCode),
    #[error("no CONNACK from broker within {0}s")]
    ConnectTimeout(u64),
    #[error("mqtt broker not connected")]
    NotConnected,
    #[error("invalid url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server answered {0}")]
    Status(reqwest::StatusCode),
}

/// blocking; called from the blocking pool
pub type PatchHandler = Arc<dyn Fn(Value) -> Acknowledgments + Send + Sync>;

pub trait TelemetrySink: Send + Sync + 'static {
    fn send(&self, payload: String) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// whichever transport the config selected
pub enum StationTransport {
    Mqtt(MqttTransport),
    Http(HttpTransport),
}

impl StationTransport {
    /// connect the configured transport; failure here is fatal for the station
    pub async fn connect(
        config: &TransportConfig,
        on_patch: PatchHandler,
        cancel: &CancellationToken,
    ) -> Result<Self, TransportError> {
        match config.kind {
            TransportKind::Mqtt => Ok(Self::Mqtt(
                MqttTransport::connect(&config.mqtt, on_patch, cancel.clone()).await?,
            )),
            TransportKind::Http => Ok(Self::Http(HttpTransport::new(&config.http)?)),
        }
    }
}

impl StationTransport {
    /// flush and disconnect; the http sink has nothing to close
    pub async fn close(self) {
        match self {
            Self::Mqtt(t) => t.close().await,
            Self::Http(_) => {}
        }
    }
}

impl TelemetrySink for StationTransport {
    async fn send(&self, payload: String) -> Result<(), TransportError> {
        match self {
            Self::Mqtt(t) => t.send(payload).await,
            Self::Http(t) => t.send(payload).await,
        }
    }
}
