use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Error;

#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, JsonSchema, PartialEq)]
#[kube(group = "fr.wilda", version = "v1", kind = "NginxOperator", namespaced, status = "NginxOperatorStatus", shortname = "nginx")]
#[serde(rename_all = "camelCase")]
pub struct NginxOperatorSpec {
    /// Desired number of nginx pods.
    #[schemars(range(min = 1))]
    pub replica_count: i32,
    /// Node port exposed by the managed Service.
    #[schemars(range(min = 1, max = 65535))]
    pub port: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NginxOperatorStatus {
    pub observed_generation: Option<i64>,
    pub last_reconcile: Option<String>,
}

impl NginxOperatorSpec {
    /// The CRD schema enforces the same bounds; this guards objects that bypassed it.
    pub fn validate(&self) -> Result<(), Error> {
        if self.replica_count < 1 {
            return Err(Error::InvalidSpec(format!("replicaCount must be positive, got {}", self.replica_count)));
        }
        if !(1..=65535).contains(&self.port) {
            return Err(Error::InvalidSpec(format!("port must be within 1-65535, got {}", self.port)));
        }
        Ok(())
    }
}

impl NginxOperator {
    pub fn key(&self) -> Result<ResourceKey, Error> {
        let namespace = self.namespace().ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        Ok(ResourceKey::new(namespace, self.name_any()))
    }

    pub fn is_terminating(&self) -> bool { self.metadata.deletion_timestamp.is_some() }
}

/// Queue key of an owning resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}/{}", self.namespace, self.name) }
}
