use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::Parser;
use kube::Client;
use nginx_operator::{
    config::OperatorConfig,
    logging::{init_logging, LogFormat},
    telemetry, Controller, KubeClusterClient, Reconciler, TemplateSet, TemplateSource,
};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "nginx-operator", version, about = "Keeps nginx Deployments and Services converged with NginxOperator resources")]
struct Cli {
    /// Log level: trace|debug|info|warn|error (RUST_LOG takes precedence)
    #[arg(long, default_value = "info")]
    log_level: String,
    /// Log format: auto|text|json
    #[arg(long, value_enum, default_value = "auto")]
    log_format: LogFormat,
    /// Config file; defaults to <config dir>/nginx-operator/config.toml
    #[arg(long, env = "NGINX_OPERATOR_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_format)?;
    let cfg = OperatorConfig::load(cli.config.as_deref()).context("load operator config")?;
    info!(?cfg, "config.loaded");

    let templates: Arc<dyn TemplateSource> = match &cfg.template_dir {
        Some(dir) => Arc::new(TemplateSet::from_dir(dir).with_context(|| format!("load templates from {}", dir.display()))?),
        None => Arc::new(TemplateSet::embedded()),
    };

    if let Some(addr) = cfg.metrics_addr {
        tokio::spawn(async move {
            if let Err(e) = telemetry::serve(addr).await { warn!(error=%e, "metrics server stopped"); }
        });
    }

    let client = Arc::new(KubeClusterClient::new(Client::try_default().await?));
    let reconciler = Reconciler::new(client.clone(), templates).with_finalizers(cfg.manage_finalizers);
    let controller = Controller::new(client, reconciler, cfg.controller_settings());
    info!("operator starting");
    controller.run(async {
        if let Err(e) = tokio::signal::ctrl_c().await { warn!(error=%e, "ctrl_c handler failed"); }
        info!(target: "shutdown.signal", "received Ctrl+C");
    }).await;
    Ok(())
}
