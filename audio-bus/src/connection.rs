use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use bytes::{Bytes, BytesMut};
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::{Mutex, RwLock},
};

use crate::codec::{Event, Frame};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Write side of the downstream connection. Each frame is written while
/// holding the writer lock, so frames from concurrent sessions never
/// interleave mid-frame.
pub struct Connection {
    id: u64,
    writer: Mutex<BoxedWriter>,
}

impl Connection {
    pub fn new<W>(writer: W) -> Arc<Self>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Arc::new(Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            writer: Mutex::new(Box::new(writer)),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn write_frame(&self, frame: &[u8]) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(frame).await?;
        writer.flush().await
    }

    pub async fn shutdown(&self) -> std::io::Result<()> {
        self.writer.lock().await.shutdown().await
    }
}

/// Shared, swappable handle to "the current downstream connection".
///
/// Cloning shares the same slot. Frames sent while the slot is empty are
/// dropped.
#[derive(Clone, Default)]
pub struct ConnectionSlot {
    inner: Arc<RwLock<Option<Arc<Connection>>>>,
}

impl ConnectionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `conn`, returning the connection it replaced.
    pub async fn set(&self, conn: Arc<Connection>) -> Option<Arc<Connection>> {
        log::info!("Connection {}: registered as downstream", conn.id());
        self.inner.write().await.replace(conn)
    }

    pub async fn get(&self) -> Option<Arc<Connection>> {
        self.inner.read().await.clone()
    }

    pub async fn clear(&self) -> Option<Arc<Connection>> {
        self.inner.write().await.take()
    }

    /// Clear the slot only if it still holds connection `id`.
    pub async fn clear_if(&self, id: u64) -> bool {
        let mut guard = self.inner.write().await;
        if guard.as_ref().is_some_and(|c| c.id() == id) {
            *guard = None;
            log::info!("Connection {}: unregistered", id);
            return true;
        }
        false
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.read().await.is_some()
    }

    /// Encode and write one frame. Returns `true` if it reached a connection.
    pub async fn send(&self, frame: &Frame) -> bool {
        let Some(conn) = self.get().await else {
            log::trace!("ConnectionSlot: no downstream, dropping frame");
            return false;
        };

        let mut buf = BytesMut::new();
        if let Err(e) = frame.encode_into(&mut buf) {
            log::warn!("ConnectionSlot: encode failed: {}", e);
            return false;
        }

        match conn.write_frame(&buf).await {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Connection {}: write failed: {}", conn.id(), e);
                false
            }
        }
    }

    pub async fn send_event(&self, event: &Event) -> bool {
        let delivered = self.send(&Frame::Event(event.clone())).await;
        if !delivered {
            log::debug!(
                "ConnectionSlot: {:?} event for {} not delivered",
                event.kind,
                event.session_id
            );
        }
        delivered
    }

    pub async fn send_audio(&self, chunk: Bytes) -> bool {
        self.send(&Frame::Audio(chunk)).await
    }
}
