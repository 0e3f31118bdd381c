//! Client mode - mirror the server's managed directories into a local root.

pub mod connection;
pub mod engine;
pub mod progress;

pub use connection::ServerConnection;
pub use engine::{AttemptResult, SyncEngine, SyncOutcome, SyncReport};
pub use progress::{NoProgress, ProgressBarSink, ProgressSink};

use crate::config::ClientConfig;
use crate::error::Result;
use crate::index::IgnoreMatcher;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Connect to the configured server and bring the local root in line with it.
///
/// The session is closed with an exit message whether or not the run succeeded.
pub async fn sync(config: &ClientConfig, progress: Arc<dyn ProgressSink>) -> Result<SyncReport> {
    config.validate()?;
    let ignore = IgnoreMatcher::new(&config.ignore)?;

    info!("Connecting to {}", config.server);
    let mut conn = ServerConnection::connect(&config.server, config.connect_timeout()).await?;
    debug!("Server speaks protocol v{}", conn.server_version());

    let result = run(&mut conn, config, ignore, progress).await;

    if let Err(e) = conn.exit().await {
        warn!("Failed to close session cleanly: {}", e);
    }
    result
}

async fn run<R, W>(
    conn: &mut ServerConnection<R, W>,
    config: &ClientConfig,
    ignore: IgnoreMatcher,
    progress: Arc<dyn ProgressSink>,
) -> Result<SyncReport>
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    let directories = conn.fetch_managed_directories().await?;
    info!("Managed directories: {}", directories.join(", "));

    let engine = SyncEngine::new(config.root.clone(), directories, ignore, progress);
    engine.run(conn).await
}
