//! Incremental frame demultiplexer for the consumer side of the transport.
//!
//! Bytes arrive in arbitrarily sized reads. The demuxer accumulates them and
//! yields complete frames in order; anything incomplete stays buffered until
//! the next [`Demuxer::push`].

use bytes::{Buf, Bytes, BytesMut};

use crate::codec::{EVENT_DELIMITER, Event, LENGTH_PREFIX_LEN};

#[derive(Clone, Debug, PartialEq)]
pub enum DemuxedFrame {
    Event(Event),
    Audio(Bytes),
    /// Binary payload shorter than the configured minimum. The bytes were
    /// consumed so the stream stays in sync.
    Malformed { len: usize },
}

pub struct Demuxer {
    buf: BytesMut,
    reading_audio: bool,
    audio_len: usize,
    min_audio_len: usize,
}

impl Demuxer {
    pub fn new() -> Self {
        Self::with_min_audio_len(0)
    }

    /// Payloads shorter than `min_audio_len` are reported as
    /// [`DemuxedFrame::Malformed`] instead of audio.
    pub fn with_min_audio_len(min_audio_len: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(8 * 1024),
            reading_audio: false,
            audio_len: 0,
            min_audio_len,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Push `data` and drain every frame that is now complete.
    pub fn feed(&mut self, data: &[u8]) -> Vec<DemuxedFrame> {
        self.push(data);
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame() {
            frames.push(frame);
        }
        frames
    }

    /// Bytes held back waiting for the rest of a frame
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn is_reading_audio(&self) -> bool {
        self.reading_audio
    }

    pub fn next_frame(&mut self) -> Option<DemuxedFrame> {
        loop {
            if self.reading_audio {
                if self.buf.len() < self.audio_len {
                    return None;
                }
                let payload = self.buf.split_to(self.audio_len).freeze();
                self.reading_audio = false;
                self.audio_len = 0;
                if payload.len() < self.min_audio_len {
                    log::debug!("Demuxer: dropping undersized payload ({} bytes)", payload.len());
                    return Some(DemuxedFrame::Malformed { len: payload.len() });
                }
                return Some(DemuxedFrame::Audio(payload));
            }

            let separators = self
                .buf
                .iter()
                .take_while(|b| **b == EVENT_DELIMITER)
                .count();
            self.buf.advance(separators);

            match self.buf.first().copied() {
                None => return None,
                Some(b'{') => {
                    let end = json_object_end(&self.buf)?;
                    let raw = self.buf.split_to(end);
                    match serde_json::from_slice::<Event>(&raw) {
                        Ok(event) => return Some(DemuxedFrame::Event(event)),
                        Err(e) => {
                            log::debug!("Demuxer: skipping malformed event: {}", e);
                            continue;
                        }
                    }
                }
                Some(_) => {
                    if self.buf.len() < LENGTH_PREFIX_LEN {
                        return None;
                    }
                    self.audio_len = self.buf.get_u32() as usize;
                    self.reading_audio = true;
                }
            }
        }
    }
}

impl Default for Demuxer {
    fn default() -> Self {
        Self::new()
    }
}

/// Length of the JSON object starting at `buf[0]`, or `None` while it is
/// still incomplete. Braces inside string literals do not count.
fn json_object_end(buf: &[u8]) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, b) in buf.iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
#[path = "demux_test.rs"]
mod demux_test;
