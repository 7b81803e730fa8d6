#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::needless_pass_by_value)]

//! Development mode for packrat.
//!
//! Provides:
//! - A file watcher that batches changes
//! - A rebuild loop that cancels superseded builds and reuses the build cache
//! - An HTTP server for the latest good build, with history-API fallback
//!
//! Build output is served from memory; the output directory on disk is kept
//! in sync with every published generation.

pub mod rebuild;
pub mod server;
pub mod state;
pub mod watch;

pub use rebuild::{RebuildOutcome, Rebuilder};
pub use server::{router, serve, STATUS_PATH};
pub use state::{DevState, Generation, Status};
pub use watch::{spawn_watcher, WatchError};

use packrat_core::bundler::{BuildCache, Bundler};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info};

/// Errors that stop the dev server.
#[derive(Debug, thiserror::Error)]
pub enum DevError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Build once, then watch, rebuild and serve until the server fails.
///
/// A failing first build does not stop the server: the error is reported on
/// the status endpoint and the next successful rebuild is served.
pub async fn run(bundler: Bundler) -> Result<(), DevError> {
    let config = bundler.config().clone();
    let state = Arc::new(DevState::from_config(&config));
    let rebuilder = Arc::new(Rebuilder::new(
        Arc::new(bundler),
        Arc::new(BuildCache::new()),
        Arc::clone(&state),
    ));

    if let RebuildOutcome::Failed(message) = rebuilder.rebuild(&[]).await {
        error!("initial build failed, waiting for changes: {message}");
    }

    let (tx, rx) = mpsc::channel(16);
    let _watch = spawn_watcher(&config.context, &config.output.path, tx)?;
    tokio::spawn(Arc::clone(&rebuilder).run(rx));

    let dev = &config.dev_server;
    let addr = format!("{}:{}", dev.host, dev.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| DevError::Bind {
            addr: addr.clone(),
            source,
        })?;
    let local = listener.local_addr().map_or(addr, |a| a.to_string());
    info!(url = %format!("http://{local}{}", server::url_prefix(&config.output.public_path)), "dev server listening");

    serve(listener, state).await.map_err(DevError::Serve)
}
