//! Event sources: turn watch events into reconcile keys on the [`WorkQueue`].
//!
//! Two routers run side by side. The primary router enqueues the key of every
//! `NginxOperator` it sees (its initial list doubles as the initial sync). The dependent
//! router watches managed Services and enqueues the keys of their owners, so edits made to
//! a Service behind the operator's back are reverted.

use futures_util::{Stream, StreamExt};
use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use tracing::{debug, trace, warn};

use crate::client::WatchEvent;
use crate::crd::{NginxOperator, ResourceKey};
use crate::error::Result;
use crate::labels::is_managed;
use crate::ownership::owner_names;
use crate::queue::WorkQueue;
use crate::telemetry::WATCH_EVENTS;

/// Keys of the `NginxOperator` objects owning `service`. Services without the management
/// label, without a namespace or without a matching owner reference map to nothing.
pub fn owner_keys(service: &Service) -> Vec<ResourceKey> {
    let Some(namespace) = service.namespace() else { return Vec::new() };
    if !is_managed(service.labels()) { return Vec::new(); }
    owner_names(service).into_iter().map(|name| ResourceKey::new(namespace.clone(), name)).collect()
}

fn primary_keys(resource: &NginxOperator) -> Vec<ResourceKey> { resource.key().into_iter().collect() }

fn objects<K>(event: &WatchEvent<K>) -> Vec<&K> {
    match event {
        WatchEvent::Applied(o) | WatchEvent::Deleted(o) => vec![o],
        WatchEvent::Restarted(objs) => objs.iter().collect(),
    }
}

async fn route<K, S>(source: &'static str, events: S, queue: WorkQueue, map: fn(&K) -> Vec<ResourceKey>)
where
    S: Stream<Item = Result<WatchEvent<K>>>,
{
    futures_util::pin_mut!(events);
    while let Some(event) = events.next().await {
        match event {
            Ok(event) => {
                let keys: Vec<ResourceKey> = objects(&event).into_iter().flat_map(map).collect();
                WATCH_EVENTS.with_label_values(&[source, if keys.is_empty() { "ignored" } else { "routed" }]).inc();
                trace!(source, count = keys.len(), "watch.event");
                for key in keys { queue.add(key); }
            }
            Err(e) => {
                // The watcher backs off and re-lists on its own; keep consuming.
                WATCH_EVENTS.with_label_values(&[source, "error"]).inc();
                warn!(source, error = %e, "watch.error");
            }
        }
    }
    debug!(source, "watch.closed");
}

/// Enqueues every `NginxOperator` seen on `events`. Returns when the stream ends.
pub async fn route_primary<S>(events: S, queue: WorkQueue)
where
    S: Stream<Item = Result<WatchEvent<NginxOperator>>>,
{
    route("primary", events, queue, primary_keys).await
}

/// Enqueues the owners of every managed Service seen on `events`. Returns when the stream ends.
pub async fn route_owned_services<S>(events: S, queue: WorkQueue)
where
    S: Stream<Item = Result<WatchEvent<Service>>>,
{
    route("service", events, queue, owner_keys).await
}
