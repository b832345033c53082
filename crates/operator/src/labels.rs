//! Names, labels and markers shared by the reconciler and the watch router.

use std::collections::BTreeMap;

/// Standard label for the tool managing a resource.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "nginx-operator";

/// Fixed name of the managed Deployment within a namespace.
pub const DEPLOYMENT_NAME: &str = "nginx-deployment";
/// Fixed name of the managed Service within a namespace.
pub const SERVICE_NAME: &str = "nginx-service";

pub const FINALIZER: &str = "nginxoperators.fr.wilda/finalizer";
/// Field manager used for server-side apply writes.
pub const FIELD_MANAGER: &str = "nginx-operator";

/// Label selector matching every object this operator manages.
pub fn managed_selector() -> String { format!("{MANAGED_BY_LABEL}={MANAGED_BY_VALUE}") }

pub fn is_managed(labels: &BTreeMap<String, String>) -> bool {
    labels.get(MANAGED_BY_LABEL).map(String::as_str) == Some(MANAGED_BY_VALUE)
}
