//! Server mode - accepts client sessions and serves the file index.
//!
//! One task per accepted connection. Sessions share nothing mutable: the
//! index snapshot and vocabulary live in a read-only `ServerContext`.

pub mod session;
pub mod timeout;

pub use session::{Session, SessionEnd, SessionState};
pub use timeout::{Phase, TimeoutGuard};

use crate::config::ServerConfig;
use crate::error::{Result, SyncError};
use crate::index::FileIndex;
use crate::protocol::Vocabulary;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Everything a session needs, shared read-only between sessions
#[derive(Debug)]
pub struct ServerContext {
    pub index: Arc<FileIndex>,
    /// Directory index paths are relative to
    pub root: PathBuf,
    pub vocabulary: Vocabulary,
    pub idle_timeout: Duration,
    pub transfer_timeout: Duration,
}

pub struct Server {
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    connection_semaphore: Arc<Semaphore>,
}

impl Server {
    /// Bind the listener. The index is used as-is for the server's lifetime.
    pub async fn bind(config: &ServerConfig, index: Arc<FileIndex>) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(&config.listen)
            .await
            .map_err(|e| SyncError::Connection {
                addr: config.listen.clone(),
                source: e,
            })?;

        Ok(Self {
            listener,
            ctx: Arc::new(ServerContext {
                index,
                root: config.root.clone(),
                vocabulary: Vocabulary::current(),
                idle_timeout: config.idle_timeout(),
                transfer_timeout: config.transfer_timeout(),
            }),
            connection_semaphore: Arc::new(Semaphore::new(config.max_connections)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever, one task per session.
    pub async fn run(self) -> Result<()> {
        info!(
            "Serving {} files from {} on {}",
            self.ctx.index.len(),
            self.ctx.root.display(),
            self.local_addr()?
        );

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    // Transient (e.g. fd exhaustion); back off, then keep listening
                    error!("Failed to accept connection: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };

            let Ok(permit) = self.connection_semaphore.clone().try_acquire_owned() else {
                warn!("Connection limit reached, refusing {}", peer);
                drop(stream);
                continue;
            };

            info!("Connection established with {}", peer);
            if let Err(e) = stream.set_nodelay(true) {
                debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
            }

            let ctx = Arc::clone(&self.ctx);
            tokio::spawn(async move {
                let (reader, writer) = stream.into_split();
                let session = Session::new(reader, writer, peer.to_string(), ctx);
                match session.run().await {
                    Ok(end) => debug!("Session with {} ended: {:?}", peer, end),
                    Err(e) => warn!("Session with {} failed: {}", peer, e),
                }
                drop(permit);
            });
        }
    }
}

/// Load the index from `config` and serve it until the process ends.
pub async fn serve(config: ServerConfig) -> Result<()> {
    config.validate()?;
    let root = config.root.clone();
    let directories = config.directories.clone();
    let index = tokio::task::spawn_blocking(move || FileIndex::load(&root, directories))
        .await
        .map_err(|e| SyncError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

    Server::bind(&config, Arc::new(index)).await?.run().await
}
