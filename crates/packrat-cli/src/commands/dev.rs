//! `packrat dev` command implementation.
//!
//! Builds once, then serves the output from memory and rebuilds on change.

use super::load_config;
use miette::{IntoDiagnostic, Result, WrapErr};
use packrat_core::bundler::Bundler;
use std::path::PathBuf;

/// Dev server action.
#[derive(Debug, Clone)]
pub struct DevAction {
    pub cwd: PathBuf,
    /// Explicit config file path (overrides discovery).
    pub config: Option<PathBuf>,
    /// Overrides `devServer.port`.
    pub port: Option<u16>,
    /// Overrides `devServer.host`.
    pub host: Option<String>,
}

pub fn run(action: DevAction) -> Result<()> {
    let mut config = load_config(&action.cwd, action.config.as_deref())
        .into_diagnostic()
        .wrap_err("invalid configuration")?;
    if let Some(port) = action.port {
        config.dev_server.port = port;
    }
    if let Some(host) = action.host {
        config.dev_server.host = host;
    }

    let bundler = Bundler::new(config).into_diagnostic()?;
    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
    runtime.block_on(async {
        tokio::select! {
            result = packrat_dev::run(bundler) => result.into_diagnostic(),
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                Ok(())
            }
        }
    })
}
