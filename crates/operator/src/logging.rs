use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat { #[default] Auto, Text, Json }

/// `RUST_LOG` wins over `level` when set. Logs go to stderr.
pub fn init_logging(level: &str, format: LogFormat) -> Result<()> {
    let env = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    let base = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => tracing_subscriber::registry().with(env).with(base.json()).try_init()?,
        _ => tracing_subscriber::registry().with(env).with(base.compact()).try_init()?,
    }
    Ok(())
}
