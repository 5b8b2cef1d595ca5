use std::{future::Future, sync::Arc};

use cidr_sync_core::key::ObjectKey;
use log::{error, info};
use thiserror::Error;
use tokio::task::JoinError;

use crate::{helpers::handle_reconciliation_result, queue::WorkQueue, reconciler::Reconcile};

use super::shutdown::Shutdown;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Caches of the {} controller didn't sync in time!", .0)]
    CacheSyncTimeout(&'static str),
    #[error("A worker of the {} controller has crashed! Reason: {}", .0, .1)]
    WorkerFailed(&'static str, JoinError),
}

/// Drains a work queue with a fixed number of workers, feeding every key to one reconciler.
pub struct Controller<R: Reconcile> {
    name: &'static str,
    reconciler: Arc<R>,
    queue: Arc<WorkQueue<String>>,
    workers: usize,
}

impl<R: Reconcile> Controller<R> {
    pub fn new(
        name: &'static str,
        reconciler: R,
        queue: Arc<WorkQueue<String>>,
        workers: usize,
    ) -> Self {
        Self {
            name,
            reconciler: Arc::new(reconciler),
            queue,
            workers,
        }
    }

    /// Waits for `caches_synced`, then processes keys until `shutdown` fires.
    /// Workers finish the key they hold before this returns.
    pub async fn run(
        self,
        caches_synced: impl Future<Output = bool>,
        mut shutdown: Shutdown,
    ) -> Result<(), ControllerError> {
        info!("Starting {} controller...", self.name);

        let synced = tokio::select! {
            synced = caches_synced => synced,
            _ = shutdown.wait() => {
                self.queue.shut_down();
                return Ok(());
            }
        };

        if !synced {
            error!("Timed out waiting for {} controller caches to sync!", self.name);
            self.queue.shut_down();

            return Err(ControllerError::CacheSyncTimeout(self.name));
        }

        let workers = (0..self.workers)
            .map(|_| {
                tokio::spawn(run_worker(
                    self.name,
                    self.reconciler.clone(),
                    self.queue.clone(),
                ))
            })
            .collect::<Vec<_>>();

        info!("{} controller started with {} workers", self.name, self.workers);

        shutdown.wait().await;

        info!(
            "Shutting down {} controller, {} keys left unprocessed...",
            self.name,
            self.queue.len()
        );
        self.queue.shut_down();

        for worker in workers {
            worker
                .await
                .map_err(|err| ControllerError::WorkerFailed(self.name, err))?;
        }

        info!("{} controller stopped", self.name);

        Ok(())
    }
}

async fn run_worker<R: Reconcile>(
    name: &'static str,
    reconciler: Arc<R>,
    queue: Arc<WorkQueue<String>>,
) {
    while let Some(item) = queue.get().await {
        process_item(name, reconciler.as_ref(), &queue, &item).await;
        queue.done(&item);
    }
}

/// Reconciles one queue item. Successes and permanent failures reset the
/// item's backoff, anything else is requeued with a growing delay.
pub async fn process_item<R: Reconcile>(
    name: &'static str,
    reconciler: &R,
    queue: &Arc<WorkQueue<String>>,
    item: &str,
) {
    let key = match item.parse::<ObjectKey>() {
        Ok(key) => key,
        Err(err) => {
            error!("Dropping malformed key '{item}' from {name} queue: {err}");
            queue.forget(item);
            return;
        }
    };

    let result = reconciler.reconcile(&key).await;
    handle_reconciliation_result(name, item, &result, queue.num_requeues(item));

    match result {
        Ok(()) => queue.forget(item),
        Err(err) if err.is_permanent() => queue.forget(item),
        Err(_) => queue.add_rate_limited(item.to_owned()),
    }
}
