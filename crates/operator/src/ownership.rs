//! Links dependent objects back to the `NginxOperator` that owns them.

use kube::{Resource, ResourceExt};

use crate::crd::NginxOperator;
use crate::error::{Error, Result};

/// Places `object` in the owner's namespace and fills name and UID of every owner
/// reference that points at the `NginxOperator` kind. References are only filled, never
/// added: a template without one yields an object without one.
pub fn link_owner<K: Resource>(owner: &NginxOperator, mut object: K) -> Result<K> {
    let namespace = owner.namespace().ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
    let kind = NginxOperator::kind(&());
    let api_version = NginxOperator::api_version(&());
    let meta = object.meta_mut();
    meta.namespace = Some(namespace);
    if let Some(refs) = meta.owner_references.as_mut() {
        let mut owned = refs.iter_mut().filter(|r| r.kind == kind && r.api_version == api_version).peekable();
        if owned.peek().is_some() {
            let uid = owner.uid().ok_or(Error::MissingObjectKey(".metadata.uid"))?;
            for r in owned {
                r.name = owner.name_any();
                r.uid = uid.clone();
            }
        }
    }
    Ok(object)
}

/// Owner references of `object` that name an `NginxOperator`.
pub fn owner_names<K: Resource>(object: &K) -> Vec<String> {
    let kind = NginxOperator::kind(&());
    let api_version = NginxOperator::api_version(&());
    object.owner_references().iter()
        .filter(|r| r.kind == kind && r.api_version == api_version)
        .map(|r| r.name.clone())
        .collect()
}
