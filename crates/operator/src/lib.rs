//! Reconciler keeping one nginx Deployment and one NodePort Service per namespace converged
//! with the `NginxOperator` custom resources declared there.

pub mod client;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod finalizer;
pub mod labels;
pub mod logging;
pub mod ownership;
pub mod queue;
pub mod reconciler;
pub mod telemetry;
pub mod templates;
pub mod test_support;
pub mod watch;

pub use client::{ClusterClient, DeleteOutcome, KubeClusterClient, WatchEvent};
pub use controller::{Controller, ControllerSettings};
pub use crd::{NginxOperator, NginxOperatorSpec, NginxOperatorStatus, ResourceKey};
pub use error::{Error, Result};
pub use reconciler::{CleanupReport, Directive, Phase, Reconciler};
pub use templates::{DependentKind, TemplateSet, TemplateSource};
