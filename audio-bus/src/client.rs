//! Consumer side of the transport: reads raw bytes and hands back frames.

use std::path::Path;

use futures::Stream;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    net::UnixStream,
};

use crate::demux::{DemuxedFrame, Demuxer};

const READ_BUFFER_SIZE: usize = 16 * 1024;

pub struct FrameReader<R> {
    reader: R,
    demuxer: Demuxer,
    buf: Box<[u8]>,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self::with_demuxer(reader, Demuxer::new())
    }

    pub fn with_demuxer(reader: R, demuxer: Demuxer) -> Self {
        Self {
            reader,
            demuxer,
            buf: vec![0u8; READ_BUFFER_SIZE].into_boxed_slice(),
        }
    }

    /// Next complete frame, or `None` once the peer closes the stream.
    pub async fn next_frame(&mut self) -> std::io::Result<Option<DemuxedFrame>> {
        loop {
            if let Some(frame) = self.demuxer.next_frame() {
                return Ok(Some(frame));
            }
            let n = self.reader.read(&mut self.buf).await?;
            if n == 0 {
                if self.demuxer.buffered() > 0 {
                    log::debug!(
                        "FrameReader: stream closed with {} bytes of a partial frame",
                        self.demuxer.buffered()
                    );
                }
                return Ok(None);
            }
            self.demuxer.push(&self.buf[..n]);
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = std::io::Result<DemuxedFrame>> {
        futures::stream::unfold(self, |mut reader| async move {
            match reader.next_frame().await {
                Ok(Some(frame)) => Some((Ok(frame), reader)),
                Ok(None) => None,
                Err(e) => Some((Err(e), reader)),
            }
        })
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

pub async fn connect(path: impl AsRef<Path>) -> anyhow::Result<FrameReader<UnixStream>> {
    let path = path.as_ref();
    let stream = UnixStream::connect(path)
        .await
        .map_err(|e| anyhow::anyhow!("connect {}: {}", path.display(), e))?;
    Ok(FrameReader::new(stream))
}
