use std::sync::Arc;

use k8s_openapi::api::{apps::v1::Deployment, core::v1::Service};
use nginx_operator::{
    labels::{DEPLOYMENT_NAME, SERVICE_NAME},
    templates::node_port_of,
    test_support::FakeClusterClient,
    NginxOperator, NginxOperatorSpec, Reconciler, TemplateSet,
};
use proptest::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap()
}

proptest! {
    #[test]
    fn repeated_reconciles_write_the_service_once(replicas in 1i32..20, port in 30000i32..32768, passes in 1usize..5) {
        let fake = Arc::new(FakeClusterClient::new());
        let reconciler = Reconciler::new(fake.clone(), Arc::new(TemplateSet::embedded()));
        let mut r = NginxOperator::new("web", NginxOperatorSpec { replica_count: replicas, port });
        r.metadata.namespace = Some("ns1".into());
        fake.insert(r);

        runtime().block_on(async {
            for _ in 0..passes {
                let current = fake.object::<NginxOperator>("ns1", "web").unwrap();
                reconciler.reconcile(&current).await.unwrap();
            }
        });

        prop_assert_eq!(fake.writes::<Service>(), 1);
        prop_assert_eq!(fake.writes::<Deployment>(), passes);
        prop_assert_eq!(node_port_of(&fake.object::<Service>("ns1", SERVICE_NAME).unwrap()), Some(port));
        prop_assert_eq!(fake.object::<Deployment>("ns1", DEPLOYMENT_NAME).unwrap().spec.unwrap().replicas, Some(replicas));
    }

    #[test]
    fn port_sequence_writes_only_on_change(ports in proptest::collection::vec(30000i32..30004, 1..8)) {
        let fake = Arc::new(FakeClusterClient::new());
        let reconciler = Reconciler::new(fake.clone(), Arc::new(TemplateSet::embedded()));
        let changes = 1 + ports.windows(2).filter(|w| w[0] != w[1]).count();

        runtime().block_on(async {
            for port in &ports {
                let mut r = NginxOperator::new("web", NginxOperatorSpec { replica_count: 1, port: *port });
                r.metadata.namespace = Some("ns1".into());
                fake.insert(r);
                let current = fake.object::<NginxOperator>("ns1", "web").unwrap();
                reconciler.reconcile(&current).await.unwrap();
            }
        });

        prop_assert_eq!(fake.writes::<Service>(), changes);
    }
}
