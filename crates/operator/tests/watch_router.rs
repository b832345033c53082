use std::collections::BTreeMap;

use futures_util::stream;
use k8s_openapi::{api::core::v1::Service, apimachinery::pkg::apis::meta::v1::OwnerReference};
use nginx_operator::{
    labels::{MANAGED_BY_LABEL, MANAGED_BY_VALUE, SERVICE_NAME},
    queue::WorkQueue,
    test_support::api_error,
    watch::{route_owned_services, route_primary},
    NginxOperator, NginxOperatorSpec, ResourceKey, Result, WatchEvent,
};

fn cr(namespace: &str, name: &str) -> NginxOperator {
    let mut r = NginxOperator::new(name, NginxOperatorSpec { replica_count: 1, port: 30080 });
    r.metadata.namespace = Some(namespace.into());
    r
}

fn owned_service(namespace: &str, owner: &str, managed: bool) -> Service {
    let mut s = Service::default();
    s.metadata.name = Some(SERVICE_NAME.into());
    s.metadata.namespace = Some(namespace.into());
    if managed {
        s.metadata.labels = Some(BTreeMap::from([(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string())]));
    }
    s.metadata.owner_references = Some(vec![OwnerReference {
        api_version: "fr.wilda/v1".into(),
        kind: "NginxOperator".into(),
        name: owner.into(),
        uid: format!("uid-{owner}"),
        ..Default::default()
    }]);
    s
}

async fn drain(queue: &WorkQueue) -> Vec<ResourceKey> {
    let mut keys = Vec::new();
    while !queue.is_empty() {
        if let Some(key) = queue.get().await {
            queue.done(&key);
            keys.push(key);
        }
    }
    keys
}

#[tokio::test]
async fn primary_events_enqueue_resource_keys() {
    let queue = WorkQueue::default();
    let events: Vec<Result<WatchEvent<NginxOperator>>> = vec![
        Ok(WatchEvent::Restarted(vec![cr("ns1", "a"), cr("ns2", "b")])),
        Ok(WatchEvent::Applied(cr("ns1", "a"))),
        Ok(WatchEvent::Deleted(cr("ns3", "c"))),
    ];
    route_primary(stream::iter(events), queue.clone()).await;

    let keys = drain(&queue).await;
    assert_eq!(keys, vec![ResourceKey::new("ns1", "a"), ResourceKey::new("ns2", "b"), ResourceKey::new("ns3", "c")]);
}

#[tokio::test]
async fn watch_errors_do_not_stop_routing() {
    let queue = WorkQueue::default();
    let events: Vec<Result<WatchEvent<NginxOperator>>> = vec![
        Err(api_error(500, "WatchDisconnected")),
        Ok(WatchEvent::Applied(cr("ns1", "a"))),
    ];
    route_primary(stream::iter(events), queue.clone()).await;
    assert_eq!(drain(&queue).await, vec![ResourceKey::new("ns1", "a")]);
}

#[tokio::test]
async fn service_events_enqueue_their_owner() {
    let queue = WorkQueue::default();
    let events: Vec<Result<WatchEvent<Service>>> = vec![
        Ok(WatchEvent::Applied(owned_service("ns1", "web", true))),
        Ok(WatchEvent::Deleted(owned_service("ns1", "web", true))),
        Ok(WatchEvent::Applied(owned_service("ns2", "other", false))),
    ];
    route_owned_services(stream::iter(events), queue.clone()).await;
    assert_eq!(drain(&queue).await, vec![ResourceKey::new("ns1", "web")]);
}
