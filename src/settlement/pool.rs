use futures_util::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::worker::SettlementWorker;
use super::WorkerContext;
use crate::coordination::keys;

/// A fixed set of settlement workers sharing one context.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `workers` tasks, each with its own holding list.
    pub fn spawn(
        ctx: WorkerContext,
        replica_id: &str,
        workers: usize,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let handles = Self::holding_lists(replica_id, workers)
            .into_iter()
            .enumerate()
            .map(|(id, holding)| {
                let worker = SettlementWorker::new(id, holding, ctx.clone());
                tokio::spawn(worker.run(shutdown.clone()))
            })
            .collect();

        tracing::info!(
            replica = %replica_id,
            workers = workers,
            policy = ?ctx.config.policy,
            guarantee = ?ctx.config.guarantee,
            "Settlement worker pool started"
        );

        Self { handles }
    }

    /// Holding list names used by a replica's workers.
    pub fn holding_lists(replica_id: &str, workers: usize) -> Vec<String> {
        (0..workers).map(|id| keys::holding_list(replica_id, id)).collect()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker to exit.
    pub async fn join(self) {
        for result in join_all(self.handles).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Settlement worker panicked");
            }
        }
        tracing::info!("Settlement worker pool stopped");
    }
}
