use async_trait::async_trait;
use std::time::Duration;

use super::{PeerError, PeerSummary};
use crate::domain::{Summary, TimeWindow};

const SUMMARY_PATH: &str = "/internal/payments-summary";
const PURGE_PATH: &str = "/internal/purge-payments";

/// Another replica reached over its internal HTTP listener.
pub struct HttpPeer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPeer {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();

        tracing::info!(
            peer = %base_url,
            timeout_ms = timeout.as_millis() as u64,
            "Peer summary client ready"
        );
        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl PeerSummary for HttpPeer {
    async fn fetch_summary(&self, window: &TimeWindow) -> Result<Summary, PeerError> {
        let response = self
            .client
            .get(self.url(SUMMARY_PATH))
            .query(&window.query_pairs())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PeerError::Status(status.as_u16()));
        }
        Ok(response.json::<Summary>().await?)
    }

    async fn purge(&self) -> Result<(), PeerError> {
        let response = self.client.post(self.url(PURGE_PATH)).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PeerError::Status(status.as_u16()));
        }
        Ok(())
    }
}
