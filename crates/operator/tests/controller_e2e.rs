//! Full controller loop against the in-memory cluster: watch events in, converged
//! dependents out.

use std::{sync::Arc, time::Duration};

use k8s_openapi::api::{apps::v1::Deployment, core::v1::Service};
use nginx_operator::{
    controller::error_policy,
    labels::{DEPLOYMENT_NAME, SERVICE_NAME},
    queue::{Backoff, WorkQueue},
    templates::node_port_of,
    test_support::{api_error, FakeClusterClient, Op},
    Controller, ControllerSettings, Directive, Error, NginxOperator, NginxOperatorSpec, Reconciler, ResourceKey,
    TemplateSet, WatchEvent,
};
use tokio::sync::oneshot;

fn cr(namespace: &str, replica_count: i32, port: i32) -> NginxOperator {
    let mut r = NginxOperator::new("web", NginxOperatorSpec { replica_count, port });
    r.metadata.namespace = Some(namespace.into());
    r
}

fn settings() -> ControllerSettings {
    ControllerSettings {
        workers: 2,
        resync: None,
        backoff: Backoff { base: Duration::from_millis(10), max: Duration::from_millis(50) },
    }
}

/// Runs the controller until `done` holds or the deadline passes, then shuts it down.
async fn run_until(fake: Arc<FakeClusterClient>, settings: ControllerSettings, done: impl Fn(&FakeClusterClient) -> bool) -> bool {
    let reconciler = Reconciler::new(fake.clone(), Arc::new(TemplateSet::embedded()));
    let controller = Controller::new(fake.clone(), reconciler, settings);
    let (stop, stopped) = oneshot::channel::<()>();
    let handle = tokio::spawn(controller.run(async move { let _ = stopped.await; }));

    let converged = tokio::time::timeout(Duration::from_secs(5), async {
        while !done(fake.as_ref()) { tokio::time::sleep(Duration::from_millis(10)).await; }
    })
    .await
    .is_ok();

    stop.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle).await.expect("controller stops").unwrap();
    converged
}

#[tokio::test]
async fn initial_list_converges_every_resource() {
    let fake = Arc::new(FakeClusterClient::new());
    fake.insert(cr("ns1", 3, 30080));
    fake.insert(cr("ns2", 1, 30081));
    let listed: Vec<NginxOperator> = fake.objects();
    fake.script_watch(vec![WatchEvent::Restarted(listed)]);

    let converged = run_until(fake.clone(), settings(), |f| {
        ["ns1", "ns2"].iter().all(|ns| f.object::<Service>(ns, SERVICE_NAME).is_some())
    })
    .await;

    assert!(converged, "dependents never appeared");
    assert_eq!(fake.object::<Deployment>("ns1", DEPLOYMENT_NAME).unwrap().spec.unwrap().replicas, Some(3));
    assert_eq!(node_port_of(&fake.object::<Service>("ns2", SERVICE_NAME).unwrap()), Some(30081));
}

#[tokio::test]
async fn service_event_triggers_owner_reconcile() {
    let fake = Arc::new(FakeClusterClient::new());
    let reconciler = Reconciler::new(fake.clone(), Arc::new(TemplateSet::embedded()));
    fake.insert(cr("ns1", 1, 30080));
    reconciler.handle(&ResourceKey::new("ns1", "web")).await.unwrap();

    // Someone edits the node port; the Service watch reports it.
    fake.edit::<Service>("ns1", SERVICE_NAME, |svc| {
        svc.spec.as_mut().unwrap().ports.as_mut().unwrap()[0].node_port = Some(31999);
    });
    let drifted = fake.object::<Service>("ns1", SERVICE_NAME).unwrap();
    fake.script_watch(vec![WatchEvent::Applied(drifted)]);

    let converged = run_until(fake.clone(), settings(), |f| {
        f.object::<Service>("ns1", SERVICE_NAME).and_then(|s| node_port_of(&s)) == Some(30080)
    })
    .await;

    assert!(converged, "drift was not reverted");
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let fake = Arc::new(FakeClusterClient::new());
    fake.insert(cr("ns1", 2, 30080));
    let listed: Vec<NginxOperator> = fake.objects();
    fake.script_watch(vec![WatchEvent::Restarted(listed)]);
    fake.fail_next::<Deployment>(Op::Write, 2);

    let converged = run_until(fake.clone(), settings(), |f| f.object::<Service>("ns1", SERVICE_NAME).is_some()).await;

    assert!(converged, "retries never converged");
    assert_eq!(fake.writes::<Deployment>(), 3);
}

#[tokio::test]
async fn deleted_resource_is_cleaned_up() {
    let fake = Arc::new(FakeClusterClient::new());
    let reconciler = Reconciler::new(fake.clone(), Arc::new(TemplateSet::embedded())).with_finalizers(false);
    let resource = cr("ns1", 1, 30080);
    fake.insert(resource.clone());
    reconciler.handle(&ResourceKey::new("ns1", "web")).await.unwrap();

    // Gone from the cluster by the time the deletion event is processed.
    use nginx_operator::ClusterClient;
    fake.delete::<NginxOperator>("ns1", "web").await.unwrap();
    fake.script_watch(vec![WatchEvent::Deleted(resource)]);

    let converged = run_until(fake.clone(), settings(), |f| {
        f.object::<Deployment>("ns1", DEPLOYMENT_NAME).is_none() && f.object::<Service>("ns1", SERVICE_NAME).is_none()
    })
    .await;

    assert!(converged, "dependents were not removed");
}

#[test]
fn error_policy_classifies_errors() {
    let queue = WorkQueue::new(Backoff { base: Duration::from_millis(100), max: Duration::from_secs(1) });
    let key = ResourceKey::new("ns1", "web");

    assert_eq!(error_policy(&api_error(503, "ServiceUnavailable"), &key, &queue), Directive::Retry(Duration::from_millis(100)));
    assert_eq!(error_policy(&api_error(409, "Conflict"), &key, &queue), Directive::Retry(Duration::from_millis(200)));
    assert_eq!(error_policy(&Error::InvalidSpec("replicaCount must be positive".into()), &key, &queue), Directive::NoUpdate);
}

#[test]
fn fatal_error_resets_the_retry_streak() {
    let queue = WorkQueue::new(Backoff { base: Duration::from_millis(100), max: Duration::from_secs(1) });
    let key = ResourceKey::new("ns1", "web");

    error_policy(&api_error(503, "ServiceUnavailable"), &key, &queue);
    error_policy(&api_error(503, "ServiceUnavailable"), &key, &queue);
    error_policy(&Error::InvalidSpec("port must be within 1-65535".into()), &key, &queue);

    assert_eq!(error_policy(&api_error(503, "ServiceUnavailable"), &key, &queue), Directive::Retry(Duration::from_millis(100)));
}
