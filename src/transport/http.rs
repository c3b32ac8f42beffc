use super::{TelemetrySink, TransportError};
use crate::config::HttpConfig;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use std::time::Duration;
use tracing::info;

/// POSTs every telemetry payload to one url
pub struct HttpTransport {
    client: Client,
    url: Url,
}

impl HttpTransport {
    pub fn new(config: &HttpConfig) -> Result<Self, TransportError> {
        let url = Url::parse(&config.url).map_err(|e| TransportError::InvalidUrl {
            url: config.url.clone(),
            reason: e.to_string(),
        })?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.max(1)))
            .build()?;
        info!(url = %url, "http telemetry sink ready");
        Ok(Self { client, url })
    }
}

impl TelemetrySink for HttpTransport {
    async fn send(&self, payload: String) -> Result<(), TransportError> {
        let response = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url_fails_construction() {
        let config = HttpConfig {
            url: "not a url".to_string(),
            ..HttpConfig::default()
        };
        assert!(matches!(
            HttpTransport::new(&config),
            Err(TransportError::InvalidUrl { .. })
        ));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_a_send_error() {
        let config = HttpConfig {
            // port 9 (discard) on loopback: nothing listens in a test environment
            url: "http://127.0.0.1:9/telemetry".to_string(),
            timeout_seconds: 1,
        };
        let sink = HttpTransport::new(&config).unwrap();
        assert!(sink.send("{}".to_string()).await.is_err());
    }
}
