use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::{
    io::AsyncReadExt,
    net::{UnixListener, UnixStream},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::connection::{Connection, ConnectionSlot};

/// Unix socket endpoint serving exactly one downstream peer at a time.
///
/// The accepted peer becomes the slot's current connection until it
/// disconnects or the server is cancelled. Further peers queue in the
/// listen backlog until then.
pub struct TransportServer {
    path: PathBuf,
    slot: ConnectionSlot,
}

impl TransportServer {
    pub fn new(path: impl Into<PathBuf>, slot: ConnectionSlot) -> Self {
        Self {
            path: path.into(),
            slot,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bind(&self) -> anyhow::Result<UnixListener> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::debug!("Transport: removed stale socket {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "remove stale socket {}: {}",
                    self.path.display(),
                    e
                ));
            }
        }
        UnixListener::bind(&self.path)
            .map_err(|e| anyhow::anyhow!("bind {}: {}", self.path.display(), e))
    }

    pub async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        let listener = self.bind()?;
        self.serve(listener, cancel).await;
        Ok(())
    }

    pub async fn serve(&self, listener: UnixListener, cancel: CancellationToken) {
        log::info!("Transport: listening on {}", self.path.display());
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break;
                },
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => self.hold(stream, &cancel).await,
                        Err(e) => {
                            log::warn!("Transport: accept failed: {}", e);
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                    }
                },
            }
        }

        if let Err(e) = std::fs::remove_file(&self.path) {
            log::debug!("Transport: remove {}: {}", self.path.display(), e);
        }
        log::info!("Transport: stopped");
    }

    /// Register `stream` as the downstream and block until the peer hangs up.
    async fn hold(&self, stream: UnixStream, cancel: &CancellationToken) {
        let (mut reader, writer) = stream.into_split();
        let conn = Connection::new(writer);
        if let Some(old) = self.slot.set(conn.clone()).await {
            log::warn!("Transport: replaced connection {}", old.id());
        }

        let mut buf = [0u8; 1024];
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break;
                },
                read = reader.read(&mut buf) => {
                    match read {
                        Ok(0) => {
                            log::info!("Transport: peer {} disconnected", conn.id());
                            break;
                        }
                        Ok(n) => log::trace!("Transport: ignoring {} inbound bytes", n),
                        Err(e) => {
                            log::warn!("Transport: read from peer {} failed: {}", conn.id(), e);
                            break;
                        }
                    }
                },
            }
        }

        self.slot.clear_if(conn.id()).await;
        let _ = conn.shutdown().await;
    }
}

/// Run `server` in its own task. A bind failure cancels `cancel`, since the
/// relay has no downstream without it.
pub fn start_transport_server(
    server: TransportServer,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = server.run(cancel.clone()).await {
            log::error!("Transport: {:#}", e);
            cancel.cancel();
        }
    })
}

#[cfg(test)]
#[path = "transport_test.rs"]
mod transport_test;
