//! Wires the event sources, the work queue and the worker pool around a [`Reconciler`].

use std::{future::Future, sync::Arc, time::{Duration, Instant}};

use k8s_openapi::api::core::v1::Service;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use crate::client::ClusterClient;
use crate::crd::{NginxOperator, ResourceKey};
use crate::error::Error;
use crate::labels::managed_selector;
use crate::queue::{Backoff, WorkQueue};
use crate::reconciler::{Directive, Reconciler};
use crate::telemetry::RECONCILE_DURATION;
use crate::watch::{route_owned_services, route_primary};

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub workers: usize,
    /// Period of the full re-enqueue of every `NginxOperator`; `None` disables it.
    pub resync: Option<Duration>,
    pub backoff: Backoff,
}

impl Default for ControllerSettings {
    fn default() -> Self { Self { workers: 2, resync: Some(Duration::from_secs(300)), backoff: Backoff::default() } }
}

/// Maps a failed run to a directive. Transient API errors are retried with the key's
/// backoff; configuration and spec errors are logged, reset the backoff and wait for
/// the next trigger.
pub fn error_policy(err: &Error, key: &ResourceKey, queue: &WorkQueue) -> Directive {
    if err.is_retryable() {
        let delay = queue.retry_delay(key);
        warn!(%key, error = %err, retry_in_ms = delay.as_millis() as u64, "reconcile.retry");
        Directive::Retry(delay)
    } else {
        queue.forget(key);
        error!(%key, error = %err, kind = err.kind(), "reconcile.aborted");
        Directive::NoUpdate
    }
}

pub struct Controller<C> {
    client: Arc<C>,
    reconciler: Arc<Reconciler<C>>,
    queue: WorkQueue,
    settings: ControllerSettings,
}

impl<C: ClusterClient> Controller<C> {
    pub fn new(client: Arc<C>, reconciler: Reconciler<C>, settings: ControllerSettings) -> Self {
        let queue = WorkQueue::new(settings.backoff);
        Self { client, reconciler: Arc::new(reconciler), queue, settings }
    }

    /// Runs watchers, resync and workers until `shutdown` resolves, then lets in-flight
    /// runs finish.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        let workers = self.settings.workers.max(1);
        info!(workers, resync_secs = self.settings.resync.map(|d| d.as_secs()), "controller.start");

        let mut background: Vec<JoinHandle<()>> = vec![
            tokio::spawn(route_primary(self.client.watch::<NginxOperator>(None), self.queue.clone())),
            tokio::spawn(route_owned_services(self.client.watch::<Service>(Some(&managed_selector())), self.queue.clone())),
        ];
        if let Some(period) = self.settings.resync {
            background.push(tokio::spawn(resync(self.client.clone(), self.queue.clone(), period)));
        }
        let pool: Vec<JoinHandle<()>> = (0..workers)
            .map(|id| tokio::spawn(worker(id, self.reconciler.clone(), self.queue.clone())))
            .collect();

        shutdown.await;
        info!("controller.shutdown");
        self.queue.shutdown();
        for task in &background { task.abort(); }
        for task in pool {
            if let Err(e) = task.await { warn!(error = %e, "worker.join_failed"); }
        }
        info!("controller.stopped");
    }
}

async fn worker<C: ClusterClient>(id: usize, reconciler: Arc<Reconciler<C>>, queue: WorkQueue) {
    while let Some(key) = queue.get().await {
        let span = tracing::info_span!("worker", id, key = %key);
        process(&reconciler, &queue, &key).instrument(span).await;
        queue.done(&key);
    }
    debug!(id, "worker.exit");
}

async fn process<C: ClusterClient>(reconciler: &Reconciler<C>, queue: &WorkQueue, key: &ResourceKey) {
    let start = Instant::now();
    let directive = match reconciler.handle(key).await {
        Ok(directive) => {
            queue.forget(key);
            directive
        }
        Err(err) => error_policy(&err, key, queue),
    };
    RECONCILE_DURATION.observe(start.elapsed().as_secs_f64());
    debug!(took_ms = start.elapsed().as_millis() as u64, ?directive, "reconcile.finished");
    if let Directive::Retry(delay) = directive { queue.add_after(key.clone(), delay); }
}

/// Periodically re-enqueues every `NginxOperator`, catching anything the watches missed.
async fn resync<C: ClusterClient>(client: Arc<C>, queue: WorkQueue, period: Duration) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        ticker.tick().await;
        match client.list::<NginxOperator>().await {
            Ok(resources) => {
                debug!(count = resources.len(), "resync.tick");
                for key in resources.iter().filter_map(|r| r.key().ok()) { queue.add(key); }
            }
            Err(e) => warn!(error = %e, "resync.list_failed"),
        }
    }
}
