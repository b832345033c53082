//! Blueprints for the dependent objects and the pure builders that turn a blueprint plus
//! desired state into the object to write.
//!
//! Templates are kept as YAML text and parsed on every build, so each reconcile works on
//! its own value and nothing loaded once is ever mutated in place.

use std::{collections::{BTreeMap, HashMap}, fmt, fs, path::Path};

use k8s_openapi::api::{apps::v1::Deployment, core::v1::Service};
use kube::api::ObjectMeta;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::crd::NginxOperator;
use crate::error::{Error, Result};
use crate::labels::{DEPLOYMENT_NAME, MANAGED_BY_LABEL, MANAGED_BY_VALUE, SERVICE_NAME};
use crate::ownership::link_owner;

const EMBEDDED_DEPLOYMENT: &str = include_str!("../templates/nginx-deployment.yaml");
const EMBEDDED_SERVICE: &str = include_str!("../templates/nginx-service.yaml");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependentKind { Deployment, Service }

impl DependentKind {
    pub const ALL: [DependentKind; 2] = [DependentKind::Deployment, DependentKind::Service];

    pub fn as_str(self) -> &'static str {
        match self { Self::Deployment => "Deployment", Self::Service => "Service" }
    }

    pub fn file_name(self) -> &'static str {
        match self { Self::Deployment => "nginx-deployment.yaml", Self::Service => "nginx-service.yaml" }
    }
}

impl fmt::Display for DependentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Side-effect free lookup of the blueprint for a dependent kind.
pub trait TemplateSource: Send + Sync {
    fn template(&self, kind: DependentKind) -> Option<&str>;
}

#[derive(Debug, Clone, Default)]
pub struct TemplateSet { entries: HashMap<DependentKind, String> }

impl TemplateSet {
    /// Blueprints compiled into the binary.
    pub fn embedded() -> Self {
        Self::default()
            .with(DependentKind::Deployment, EMBEDDED_DEPLOYMENT)
            .with(DependentKind::Service, EMBEDDED_SERVICE)
    }

    /// Reads `nginx-deployment.yaml` and `nginx-service.yaml` from `dir`. A missing file is
    /// not an error here: the kind stays unregistered and every reconcile needing it fails.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        if !dir.is_dir() { return Err(Error::Config(format!("template dir {} is not a directory", dir.display()))); }
        let mut set = Self::default();
        for kind in DependentKind::ALL {
            let path = dir.join(kind.file_name());
            debug!(path=%path.display(), exists=path.exists(), "templates.load.attempt");
            if !path.exists() { continue; }
            let content = fs::read_to_string(&path).map_err(|e| Error::Config(format!("read template {}: {e}", path.display())))?;
            set.entries.insert(kind, content);
        }
        Ok(set)
    }

    pub fn with(mut self, kind: DependentKind, yaml: impl Into<String>) -> Self {
        self.entries.insert(kind, yaml.into());
        self
    }

    pub fn kinds(&self) -> Vec<DependentKind> {
        DependentKind::ALL.into_iter().filter(|k| self.entries.contains_key(k)).collect()
    }
}

impl TemplateSource for TemplateSet {
    fn template(&self, kind: DependentKind) -> Option<&str> { self.entries.get(&kind).map(String::as_str) }
}

pub fn load_template<K: DeserializeOwned>(source: &dyn TemplateSource, kind: DependentKind) -> Result<K> {
    let yaml = source.template(kind).ok_or(Error::MissingTemplate(kind))?;
    serde_yaml::from_str(yaml).map_err(|source| Error::TemplateParse { kind, source })
}

/// Deployment for `resource`: template pod spec, the resource's namespace and replica count.
pub fn desired_deployment(resource: &NginxOperator, source: &dyn TemplateSource) -> Result<Deployment> {
    let mut deployment: Deployment = load_template(source, DependentKind::Deployment)?;
    let spec = deployment.spec.as_mut().ok_or_else(|| invalid(DependentKind::Deployment, "missing spec"))?;
    spec.replicas = Some(resource.spec.replica_count);
    stamp(&mut deployment.metadata, DEPLOYMENT_NAME);
    link_owner(resource, deployment)
}

/// Service for `resource`: first port's node port set to `spec.port`, owner reference linked.
pub fn desired_service(resource: &NginxOperator, source: &dyn TemplateSource) -> Result<Service> {
    let mut service: Service = load_template(source, DependentKind::Service)?;
    let port = service.spec.as_mut()
        .and_then(|s| s.ports.as_mut())
        .and_then(|ports| ports.first_mut())
        .ok_or_else(|| invalid(DependentKind::Service, "no ports declared"))?;
    port.node_port = Some(resource.spec.port);
    stamp(&mut service.metadata, SERVICE_NAME);
    link_owner(resource, service)
}

/// Node port of the first declared port, the one the reconciler manages.
pub fn node_port_of(service: &Service) -> Option<i32> {
    service.spec.as_ref()?.ports.as_ref()?.first()?.node_port
}

fn stamp(meta: &mut ObjectMeta, name: &str) {
    meta.name = Some(name.to_string());
    meta.labels.get_or_insert_with(BTreeMap::new).insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
}

fn invalid(kind: DependentKind, reason: &str) -> Error { Error::InvalidTemplate { kind, reason: reason.to_string() } }

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::NginxOperatorSpec;
    use kube::ResourceExt;

    fn resource() -> NginxOperator {
        let mut r = NginxOperator::new("web", NginxOperatorSpec { replica_count: 3, port: 30080 });
        r.metadata.namespace = Some("ns1".into());
        r.metadata.uid = Some("uid-1".into());
        r
    }

    #[test]
    fn embedded_templates_parse() {
        let set = TemplateSet::embedded();
        assert_eq!(set.kinds(), DependentKind::ALL.to_vec());
        let _: Deployment = load_template(&set, DependentKind::Deployment).unwrap();
        let _: Service = load_template(&set, DependentKind::Service).unwrap();
    }

    #[test]
    fn deployment_carries_replicas_and_namespace() {
        let d = desired_deployment(&resource(), &TemplateSet::embedded()).unwrap();
        assert_eq!(d.spec.as_ref().and_then(|s| s.replicas), Some(3));
        assert_eq!(d.namespace().as_deref(), Some("ns1"));
        assert_eq!(d.name_any(), DEPLOYMENT_NAME);
        assert!(d.owner_references().is_empty());
        assert_eq!(d.labels().get(MANAGED_BY_LABEL).map(String::as_str), Some(MANAGED_BY_VALUE));
    }

    #[test]
    fn service_carries_port_and_owner() {
        let s = desired_service(&resource(), &TemplateSet::embedded()).unwrap();
        assert_eq!(node_port_of(&s), Some(30080));
        assert_eq!(s.name_any(), SERVICE_NAME);
        assert_eq!(s.namespace().as_deref(), Some("ns1"));
        let owner = &s.owner_references()[0];
        assert_eq!((owner.name.as_str(), owner.uid.as_str()), ("web", "uid-1"));
    }

    #[test]
    fn builds_do_not_leak_between_resources() {
        let set = TemplateSet::embedded();
        let first = desired_service(&resource(), &set).unwrap();
        let mut other = resource();
        other.spec.port = 30090;
        other.metadata.name = Some("other".into());
        other.metadata.uid = Some("uid-2".into());
        let second = desired_service(&other, &set).unwrap();
        assert_eq!(node_port_of(&first), Some(30080));
        assert_eq!(first.owner_references()[0].name, "web");
        assert_eq!(node_port_of(&second), Some(30090));
        assert_eq!(second.owner_references()[0].uid, "uid-2");
    }

    #[test]
    fn missing_template_fails_loudly() {
        let set = TemplateSet::default().with(DependentKind::Deployment, EMBEDDED_DEPLOYMENT);
        let err = desired_service(&resource(), &set).unwrap_err();
        assert!(matches!(err, Error::MissingTemplate(DependentKind::Service)));
    }

    #[test]
    fn unusable_templates_are_rejected() {
        let broken = TemplateSet::default().with(DependentKind::Deployment, "spec: [unclosed");
        assert!(matches!(desired_deployment(&resource(), &broken), Err(Error::TemplateParse { .. })));
        let portless = TemplateSet::default().with(DependentKind::Service, "apiVersion: v1\nkind: Service\nmetadata:\n  name: x\nspec:\n  type: NodePort\n");
        assert!(matches!(desired_service(&resource(), &portless), Err(Error::InvalidTemplate { kind: DependentKind::Service, .. })));
    }

    #[test]
    fn from_dir_registers_present_files_only() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("nginx-service.yaml"), EMBEDDED_SERVICE).unwrap();
        let set = TemplateSet::from_dir(dir.path()).unwrap();
        assert_eq!(set.kinds(), vec![DependentKind::Service]);
        assert!(matches!(desired_deployment(&resource(), &set), Err(Error::MissingTemplate(DependentKind::Deployment))));
        assert!(matches!(TemplateSet::from_dir(&dir.path().join("nope")), Err(Error::Config(_))));
    }
}
