// ============================================================================
// Summary Merge
// ============================================================================
//
// With a partitioned ledger every replica only knows the payments it settled
// itself, so the public summary is the field-wise sum of the local summary
// and one peer replica's local summary for the same window.
//
// A failing peer fails the whole request: a partial summary would look
// correct while silently under-reporting.
//
// With a shared ledger the local summary already covers every replica and
// the peer is never called.
//
// ============================================================================

mod peer;

pub use peer::HttpPeer;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::{MoneyError, Summary, TimeWindow};
use crate::ledger::{Ledger, LedgerError};

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("peer request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("peer answered with status {0}")]
    Status(u16),
}

#[derive(Debug, thiserror::Error)]
pub enum SummaryError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Peer summary unavailable: {0}")]
    Peer(#[from] PeerError),

    #[error("Merged summary overflows: {0}")]
    Overflow(#[from] MoneyError),
}

/// The internal surface of another replica.
#[async_trait]
pub trait PeerSummary: Send + Sync {
    /// The peer's local-only summary for `window`.
    async fn fetch_summary(&self, window: &TimeWindow) -> Result<Summary, PeerError>;

    /// Purge the peer's local queue and ledger.
    async fn purge(&self) -> Result<(), PeerError>;
}

pub struct SummaryService {
    ledger: Arc<dyn Ledger>,
    peer: Option<Arc<dyn PeerSummary>>,
    settle_delay: Duration,
}

impl SummaryService {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        peer: Option<Arc<dyn PeerSummary>>,
        settle_delay: Duration,
    ) -> Self {
        if peer.is_some() && ledger.is_shared() {
            tracing::info!("Ledger is shared, peer summary merge disabled");
        }
        Self {
            ledger,
            peer,
            settle_delay,
        }
    }

    /// The peer to merge with, if merging applies.
    fn merge_peer(&self) -> Option<&Arc<dyn PeerSummary>> {
        if self.ledger.is_shared() {
            return None;
        }
        self.peer.as_ref()
    }

    /// What this replica's own ledger holds.
    pub async fn local(&self, window: &TimeWindow) -> Result<Summary, SummaryError> {
        Ok(self.ledger.summary(window).await?)
    }

    /// The deployment-wide summary.
    pub async fn merged(&self, window: &TimeWindow) -> Result<Summary, SummaryError> {
        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }

        let Some(peer) = self.merge_peer() else {
            return self.local(window).await;
        };

        let (local, remote) = tokio::join!(self.local(window), peer.fetch_summary(window));
        let local = local?;
        let remote = remote.map_err(|e| {
            tracing::warn!(error = %e, "Peer summary failed");
            e
        })?;

        Ok(local.merge(remote)?)
    }

    /// Best-effort purge of the peer replica.
    pub async fn purge_peer(&self) {
        let Some(peer) = self.merge_peer() else {
            return;
        };
        if let Err(e) = peer.purge().await {
            tracing::warn!(error = %e, "Peer purge failed");
        }
    }
}
