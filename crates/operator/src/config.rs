use serde::Deserialize;
use std::{fs, net::SocketAddr, path::{Path, PathBuf}, time::Duration};
use tracing::debug;

use crate::controller::ControllerSettings;
use crate::error::{Error, Result};
use crate::queue::Backoff;

#[derive(Debug, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub workers: Option<usize>,
    pub resync_secs: Option<u64>,
    pub template_dir: Option<PathBuf>,
    pub metrics_addr: Option<String>,
    pub retry_base_ms: Option<u64>,
    pub retry_max_secs: Option<u64>,
    pub manage_finalizers: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperatorConfig {
    pub workers: usize,
    /// Zero disables periodic resync.
    pub resync: Duration,
    /// Overrides the embedded templates when set.
    pub template_dir: Option<PathBuf>,
    pub metrics_addr: Option<SocketAddr>,
    pub backoff: Backoff,
    pub manage_finalizers: bool,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            resync: Duration::from_secs(300),
            template_dir: None,
            metrics_addr: None,
            backoff: Backoff::default(),
            manage_finalizers: true,
        }
    }
}

impl OperatorConfig {
    /// Loads `path` (or the default config file when `None`), then applies `NGINX_OPERATOR_*`
    /// environment overrides. A missing file means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let cfg_path = path.map(Path::to_path_buf).unwrap_or_else(config_file_path);
        Self::load_with(&cfg_path, |name| std::env::var(name).ok())
    }

    pub fn load_with(cfg_path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        debug!(path=?cfg_path, exists=cfg_path.exists(), "config.load.attempt");
        let mut file_cfg: FileConfig = if cfg_path.exists() {
            let content = fs::read_to_string(cfg_path).map_err(|e| Error::Config(format!("failed to read config {}: {e}", cfg_path.display())))?;
            toml::from_str(&content).map_err(|e| Error::Config(format!("failed to parse config {}: {e}", cfg_path.display())))?
        } else { FileConfig::default() };
        apply_env(&mut file_cfg, env)?;
        Self::from_file_config(file_cfg)
    }

    pub fn from_file_config(file: FileConfig) -> Result<Self> {
        let defaults = Self::default();
        let workers = file.workers.unwrap_or(defaults.workers);
        if workers == 0 { return Err(Error::Config("workers must be at least 1".into())); }
        let metrics_addr = file.metrics_addr.filter(|a| !a.is_empty())
            .map(|a| a.parse::<SocketAddr>().map_err(|e| Error::Config(format!("invalid metrics_addr {a:?}: {e}"))))
            .transpose()?;
        let backoff = Backoff {
            base: file.retry_base_ms.map(Duration::from_millis).unwrap_or(defaults.backoff.base),
            max: file.retry_max_secs.map(Duration::from_secs).unwrap_or(defaults.backoff.max),
        };
        if backoff.base > backoff.max { return Err(Error::Config("retry_base_ms exceeds retry_max_secs".into())); }
        Ok(Self {
            workers,
            resync: file.resync_secs.map(Duration::from_secs).unwrap_or(defaults.resync),
            template_dir: file.template_dir,
            metrics_addr,
            backoff,
            manage_finalizers: file.manage_finalizers.unwrap_or(defaults.manage_finalizers),
        })
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            workers: self.workers,
            resync: Some(self.resync).filter(|d| !d.is_zero()),
            backoff: self.backoff,
        }
    }
}

fn apply_env(cfg: &mut FileConfig, env: impl Fn(&str) -> Option<String>) -> Result<()> {
    fn parsed<T: std::str::FromStr>(name: &str, value: String) -> Result<T> {
        value.trim().parse().map_err(|_| Error::Config(format!("invalid value {value:?} for {name}")))
    }
    let var = |name: &str| env(name).filter(|v| !v.is_empty());
    if let Some(v) = var("NGINX_OPERATOR_WORKERS") { cfg.workers = Some(parsed("NGINX_OPERATOR_WORKERS", v)?); }
    if let Some(v) = var("NGINX_OPERATOR_RESYNC_SECS") { cfg.resync_secs = Some(parsed("NGINX_OPERATOR_RESYNC_SECS", v)?); }
    if let Some(v) = var("NGINX_OPERATOR_TEMPLATE_DIR") { cfg.template_dir = Some(PathBuf::from(v)); }
    if let Some(v) = var("NGINX_OPERATOR_METRICS_ADDR") { cfg.metrics_addr = Some(v); }
    if let Some(v) = var("NGINX_OPERATOR_MANAGE_FINALIZERS") { cfg.manage_finalizers = Some(parsed("NGINX_OPERATOR_MANAGE_FINALIZERS", v)?); }
    Ok(())
}

pub fn config_dir() -> PathBuf { dirs::config_dir().unwrap_or_else(|| PathBuf::from(".")).join("nginx-operator") }
pub fn config_file_path() -> PathBuf { config_dir().join("config.toml") }
