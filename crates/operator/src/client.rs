//! Capability-typed access to the cluster. The reconciler only sees [`ClusterClient`];
//! [`KubeClusterClient`] talks to a real API server.

use std::fmt::Debug;

use async_trait::async_trait;
use futures_util::{stream::BoxStream, StreamExt};
use kube::{
    api::{Api, DeleteParams, ListParams, Patch, PatchParams},
    Client, Resource,
};
use k8s_openapi::NamespaceResourceScope;
use kube_runtime::{watcher, WatchStreamExt};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use tracing::debug;

use crate::error::{Error, Result};
use crate::labels::FIELD_MANAGER;

/// Namespaced object kinds the operator reads and writes.
pub trait ClusterObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> ClusterObject for T where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome { Deleted, Absent }

impl DeleteOutcome {
    pub fn as_str(self) -> &'static str { match self { Self::Deleted => "deleted", Self::Absent => "absent" } }
}

/// A change observed on a watched kind.
#[derive(Debug, Clone)]
pub enum WatchEvent<K> {
    Applied(K),
    Deleted(K),
    /// Full re-list after (re)subscribing.
    Restarted(Vec<K>),
}

impl<K> From<watcher::Event<K>> for WatchEvent<K> {
    fn from(ev: watcher::Event<K>) -> Self {
        match ev {
            watcher::Event::Applied(o) => Self::Applied(o),
            watcher::Event::Deleted(o) => Self::Deleted(o),
            watcher::Event::Restarted(objs) => Self::Restarted(objs),
        }
    }
}

pub type WatchStream<K> = BoxStream<'static, Result<WatchEvent<K>>>;

#[async_trait]
pub trait ClusterClient: Send + Sync + 'static {
    /// `Ok(None)` when the object does not exist.
    async fn get<K: ClusterObject>(&self, namespace: &str, name: &str) -> Result<Option<K>>;
    /// Objects of a kind across all namespaces.
    async fn list<K: ClusterObject>(&self) -> Result<Vec<K>>;
    /// Creates the object or replaces the fields this operator owns on an existing one.
    async fn create_or_replace<K: ClusterObject>(&self, namespace: &str, object: &K) -> Result<K>;
    /// Not-found is reported as [`DeleteOutcome::Absent`], not as an error.
    async fn delete<K: ClusterObject>(&self, namespace: &str, name: &str) -> Result<DeleteOutcome>;
    /// Applies a JSON patch to the object's metadata. A failed `test` operation is
    /// rejected by the server (422) and leaves the object untouched.
    async fn patch_metadata<K: ClusterObject>(&self, namespace: &str, name: &str, patch: json_patch::Patch) -> Result<()>;
    async fn patch_status<K: ClusterObject>(&self, namespace: &str, name: &str, status: serde_json::Value) -> Result<()>;
    /// Watches a kind across all namespaces. The stream is expected to survive
    /// disconnects: errors are yielded and the subscription resumes.
    fn watch<K: ClusterObject>(&self, label_selector: Option<&str>) -> WatchStream<K>;
}

#[derive(Clone)]
pub struct KubeClusterClient { client: Client }

impl KubeClusterClient {
    pub fn new(client: Client) -> Self { Self { client } }

    fn api<K: ClusterObject>(&self, namespace: &str) -> Api<K> { Api::namespaced(self.client.clone(), namespace) }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get<K: ClusterObject>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        Ok(self.api::<K>(namespace).get_opt(name).await?)
    }

    async fn list<K: ClusterObject>(&self) -> Result<Vec<K>> {
        let api: Api<K> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn create_or_replace<K: ClusterObject>(&self, namespace: &str, object: &K) -> Result<K> {
        let name = object.meta().name.clone().ok_or(Error::MissingObjectKey(".metadata.name"))?;
        // Server-side apply creates or takes over the object in one call.
        let params = PatchParams::apply(FIELD_MANAGER).force();
        let applied = self.api::<K>(namespace).patch(&name, &params, &Patch::Apply(object)).await?;
        debug!(kind=%K::kind(&()), %namespace, %name, "client.apply");
        Ok(applied)
    }

    async fn delete<K: ClusterObject>(&self, namespace: &str, name: &str) -> Result<DeleteOutcome> {
        match self.api::<K>(namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(DeleteOutcome::Absent),
            Err(e) => Err(e.into()),
        }
    }

    async fn patch_metadata<K: ClusterObject>(&self, namespace: &str, name: &str, patch: json_patch::Patch) -> Result<()> {
        self.api::<K>(namespace).patch(name, &PatchParams::default(), &Patch::Json::<()>(patch)).await?;
        Ok(())
    }

    async fn patch_status<K: ClusterObject>(&self, namespace: &str, name: &str, status: serde_json::Value) -> Result<()> {
        let patch = json!({ "status": status });
        self.api::<K>(namespace).patch_status(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
        Ok(())
    }

    fn watch<K: ClusterObject>(&self, label_selector: Option<&str>) -> WatchStream<K> {
        let api: Api<K> = Api::all(self.client.clone());
        let config = match label_selector {
            Some(selector) => watcher::Config::default().labels(selector),
            None => watcher::Config::default(),
        };
        watcher(api, config)
            .default_backoff()
            .map(|ev| ev.map(WatchEvent::from).map_err(Error::from))
            .boxed()
    }
}
