use thiserror::Error;

use crate::templates::DependentKind;

#[derive(Error, Debug)]
pub enum Error {
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),
    #[error("watch error: {0}")]
    Watch(#[from] kube_runtime::watcher::Error),
    #[error("no template registered for {0}")]
    MissingTemplate(DependentKind),
    #[error("template for {kind} does not parse: {source}")]
    TemplateParse { kind: DependentKind, #[source] source: serde_yaml::Error },
    #[error("template for {kind} is unusable: {reason}")]
    InvalidTemplate { kind: DependentKind, reason: String },
    #[error("invalid spec: {0}")]
    InvalidSpec(String),
    #[error("object is missing {0}")]
    MissingObjectKey(&'static str),
    #[error("config error: {0}")]
    Config(String),
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

impl Error {
    /// Transient API failures are worth retrying; everything else needs a change to the
    /// resource or the operator's configuration first.
    pub fn is_retryable(&self) -> bool { matches!(self, Self::Kube(_) | Self::Watch(_)) }

    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Kube(_) => "kube",
            Self::Watch(_) => "watch",
            Self::MissingTemplate(_) => "missing_template",
            Self::TemplateParse { .. } => "template_parse",
            Self::InvalidTemplate { .. } => "invalid_template",
            Self::InvalidSpec(_) => "invalid_spec",
            Self::MissingObjectKey(_) => "missing_object_key",
            Self::Config(_) => "config",
            Self::Encode(_) => "encode",
        }
    }

    pub fn is_not_found(&self) -> bool { matches!(self, Self::Kube(kube::Error::Api(ae)) if ae.code == 404) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
