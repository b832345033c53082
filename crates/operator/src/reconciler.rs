//! Converges the Deployment and Service of one `NginxOperator` and tears them down again.
//!
//! The engine does no retrying of its own: every call reads the latest state, performs at
//! most one write per dependent and reports a [`Directive`] or an [`Error`] that the
//! caller classifies.

use std::{sync::Arc, time::Duration};

use k8s_openapi::api::{apps::v1::Deployment, core::v1::Service};
use kube::ResourceExt;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::client::{ClusterClient, DeleteOutcome};
use crate::crd::{NginxOperator, ResourceKey};
use crate::error::{Error, Result};
use crate::finalizer;
use crate::labels::{DEPLOYMENT_NAME, FINALIZER, SERVICE_NAME};
use crate::telemetry::{DEPENDENT_DELETES, DEPENDENT_WRITES, RECONCILE_TOTAL};
use crate::templates::{desired_deployment, desired_service, node_port_of, DependentKind, TemplateSource};

/// What the caller should do with a key after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Converged; wait for the next trigger.
    NoUpdate,
    Retry(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase { Reconciling, Deleting }

impl Phase {
    pub fn of(resource: Option<&NginxOperator>) -> Self {
        match resource {
            Some(r) if !r.is_terminating() => Self::Reconciling,
            _ => Self::Deleting,
        }
    }

    pub fn as_str(self) -> &'static str { match self { Self::Reconciling => "reconcile", Self::Deleting => "cleanup" } }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub deployment: DeleteOutcome,
    pub service: DeleteOutcome,
}

/// Service is (re)written only when missing or when its node port drifted.
pub fn service_needs_write(existing: Option<&Service>, port: i32) -> bool {
    existing.map_or(true, |svc| node_port_of(svc) != Some(port))
}

pub struct Reconciler<C> {
    client: Arc<C>,
    templates: Arc<dyn TemplateSource>,
    manage_finalizers: bool,
}

impl<C: ClusterClient> Reconciler<C> {
    pub fn new(client: Arc<C>, templates: Arc<dyn TemplateSource>) -> Self {
        Self { client, templates, manage_finalizers: true }
    }

    pub fn with_finalizers(mut self, enabled: bool) -> Self {
        self.manage_finalizers = enabled;
        self
    }

    /// Runs whichever step the latest state of `key` calls for.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn handle(&self, key: &ResourceKey) -> Result<Directive> {
        let resource = match self.client.get::<NginxOperator>(&key.namespace, &key.name).await {
            Ok(resource) => resource,
            Err(e) => {
                RECONCILE_TOTAL.with_label_values(&["fetch", e.kind()]).inc();
                return Err(e);
            }
        };
        let phase = Phase::of(resource.as_ref());
        let result = match (phase, resource) {
            (Phase::Reconciling, Some(resource)) => self.converge(&resource).await,
            (_, resource) => self.finish(&key.namespace, resource.as_ref()).await,
        };
        let outcome = result.as_ref().map_or_else(|e| e.kind(), |_| "ok");
        RECONCILE_TOTAL.with_label_values(&[phase.as_str(), outcome]).inc();
        result
    }

    async fn converge(&self, resource: &NginxOperator) -> Result<Directive> {
        self.adopt(resource).await?;
        self.reconcile(resource).await
    }

    async fn finish(&self, namespace: &str, resource: Option<&NginxOperator>) -> Result<Directive> {
        self.cleanup(namespace).await?;
        if let Some(resource) = resource { self.release(resource).await?; }
        Ok(Directive::NoUpdate)
    }

    /// Writes the Deployment unconditionally, then the Service only if it is missing or
    /// exposes a different node port than `spec.port`.
    pub async fn reconcile(&self, resource: &NginxOperator) -> Result<Directive> {
        resource.spec.validate()?;
        let namespace = resource.namespace().ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        let name = resource.name_any();
        info!(%namespace, %name, replicas=resource.spec.replica_count, port=resource.spec.port, "reconcile.start");

        let deployment = desired_deployment(resource, self.templates.as_ref())?;
        self.client.create_or_replace(&namespace, &deployment).await?;
        DEPENDENT_WRITES.with_label_values(&[DependentKind::Deployment.as_str()]).inc();
        debug!(%namespace, replicas=resource.spec.replica_count, "deployment.write");

        let service = desired_service(resource, self.templates.as_ref())?;
        let existing = self.client.get::<Service>(&namespace, SERVICE_NAME).await?;
        if service_needs_write(existing.as_ref(), resource.spec.port) {
            let previous = existing.as_ref().and_then(node_port_of);
            self.client.create_or_replace(&namespace, &service).await?;
            DEPENDENT_WRITES.with_label_values(&[DependentKind::Service.as_str()]).inc();
            info!(%namespace, node_port=resource.spec.port, ?previous, "service.write");
        } else {
            debug!(%namespace, node_port=resource.spec.port, "service.unchanged");
        }

        self.record_observed(resource, &namespace).await?;
        Ok(Directive::NoUpdate)
    }

    /// Deletes both dependents in `namespace`. Absent objects count as removed; both deletes
    /// are attempted before the first failure is returned.
    pub async fn cleanup(&self, namespace: &str) -> Result<CleanupReport> {
        info!(%namespace, "cleanup.start");
        let deployment = self.client.delete::<Deployment>(namespace, DEPLOYMENT_NAME).await;
        let service = self.client.delete::<Service>(namespace, SERVICE_NAME).await;
        for (kind, outcome) in [(DependentKind::Deployment, &deployment), (DependentKind::Service, &service)] {
            match outcome {
                Ok(o) => DEPENDENT_DELETES.with_label_values(&[kind.as_str(), o.as_str()]).inc(),
                Err(e) => warn!(%namespace, %kind, error=%e, "cleanup.delete_failed"),
            }
        }
        let report = CleanupReport { deployment: deployment?, service: service? };
        info!(%namespace, deployment=report.deployment.as_str(), service=report.service.as_str(), "cleanup.done");
        Ok(report)
    }

    /// Puts the finalizer on a live resource so its deletion waits for cleanup.
    async fn adopt(&self, resource: &NginxOperator) -> Result<()> {
        if !self.manage_finalizers { return Ok(()); }
        let Some(patch) = finalizer::add(resource.finalizers(), FINALIZER)? else { return Ok(()) };
        let namespace = resource.namespace().ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        self.client.patch_metadata::<NginxOperator>(&namespace, &resource.name_any(), patch).await?;
        debug!(%namespace, name=%resource.name_any(), "finalizer.added");
        Ok(())
    }

    /// Drops the finalizer once cleanup succeeded, letting the deletion complete.
    async fn release(&self, resource: &NginxOperator) -> Result<()> {
        let Some(patch) = finalizer::remove(resource.finalizers(), FINALIZER)? else { return Ok(()) };
        let namespace = resource.namespace().ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        match self.client.patch_metadata::<NginxOperator>(&namespace, &resource.name_any(), patch).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }?;
        debug!(%namespace, name=%resource.name_any(), "finalizer.removed");
        Ok(())
    }

    async fn record_observed(&self, resource: &NginxOperator, namespace: &str) -> Result<()> {
        let Some(generation) = resource.metadata.generation else { return Ok(()) };
        if resource.status.as_ref().and_then(|s| s.observed_generation) == Some(generation) { return Ok(()); }
        let status = json!({ "observedGeneration": generation, "lastReconcile": chrono::Utc::now().to_rfc3339() });
        self.client.patch_status::<NginxOperator>(namespace, &resource.name_any(), status).await
    }
}
