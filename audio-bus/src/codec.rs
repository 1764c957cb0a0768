//! Wire framing shared by the transport (writer) and the demuxer (reader).
//!
//! - event: one compact JSON object followed by a single `\n`
//! - audio: `u32` big-endian payload length followed by the raw payload
//!
//! Audio frames carry no session id. Consumers attribute audio to whichever
//! session last announced `ready`.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::FrameError;

pub const LENGTH_PREFIX_LEN: usize = 4;
pub const EVENT_DELIMITER: u8 = b'\n';

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Ready,
    Error,
    Finished,
    #[serde(other)]
    Unknown,
}

/// Lifecycle event scoped to one session
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub session_id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Event {
    pub fn new(kind: EventKind, session_id: impl Into<String>) -> Self {
        Self {
            kind,
            session_id: session_id.into(),
            fields: Map::new(),
        }
    }

    pub fn ready(session_id: impl Into<String>) -> Self {
        Self::new(EventKind::Ready, session_id)
    }

    pub fn error(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(EventKind::Error, session_id).with_field("message", message.into())
    }

    pub fn finished(session_id: impl Into<String>, bytes_sent: u64) -> Self {
        Self::new(EventKind::Finished, session_id).with_field("bytes_sent", bytes_sent)
    }

    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Event(Event),
    Audio(Bytes),
}

impl Frame {
    pub fn encode(&self) -> Result<Bytes, FrameError> {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf)?;
        Ok(buf.freeze())
    }

    pub fn encode_into(&self, buf: &mut BytesMut) -> Result<(), FrameError> {
        match self {
            Frame::Event(event) => encode_event(event, buf),
            Frame::Audio(payload) => encode_audio(payload, buf),
        }
    }
}

pub fn encode_event(event: &Event, buf: &mut BytesMut) -> Result<(), FrameError> {
    // compact serde_json output never contains a raw newline
    let json = serde_json::to_vec(event)?;
    buf.reserve(json.len() + 1);
    buf.extend_from_slice(&json);
    buf.put_u8(EVENT_DELIMITER);
    Ok(())
}

pub fn encode_audio(payload: &[u8], buf: &mut BytesMut) -> Result<(), FrameError> {
    let len =
        u32::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge(payload.len()))?;
    buf.reserve(LENGTH_PREFIX_LEN + payload.len());
    buf.put_u32(len);
    buf.put_slice(payload);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_layout() {
        let event = Event::ready("s1");
        let bytes = Frame::Event(event).encode().unwrap();

        assert_eq!(&bytes[..], b"{\"type\":\"ready\",\"session_id\":\"s1\"}\n");
    }

    #[test]
    fn test_event_fields_flattened() {
        let event = Event::error("s1", "boom");
        let value: Value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["type"], "error");
        assert_eq!(value["session_id"], "s1");
        assert_eq!(value["message"], "boom");
    }

    #[test]
    fn test_event_message_with_newline_stays_single_line() {
        let event = Event::error("s1", "line one\nline two");
        let bytes = Frame::Event(event).encode().unwrap();

        let newlines = bytes.iter().filter(|b| **b == EVENT_DELIMITER).count();
        assert_eq!(newlines, 1);
        assert_eq!(bytes.last(), Some(&EVENT_DELIMITER));
    }

    #[test]
    fn test_audio_wire_layout() {
        let bytes = Frame::Audio(Bytes::from_static(&[9, 8, 7])).encode().unwrap();
        assert_eq!(&bytes[..], &[0, 0, 0, 3, 9, 8, 7]);
    }

    #[test]
    fn test_empty_audio_is_bare_header() {
        let bytes = Frame::Audio(Bytes::new()).encode().unwrap();
        assert_eq!(&bytes[..], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_unknown_event_type_deserializes() {
        let event: Event =
            serde_json::from_str(r#"{"type":"progress","session_id":"s2","pct":10}"#).unwrap();

        assert_eq!(event.kind, EventKind::Unknown);
        assert_eq!(event.session_id, "s2");
        assert_eq!(event.field("pct"), Some(&Value::from(10)));
    }

    #[test]
    fn test_finished_carries_byte_count() {
        let event = Event::finished("s1", 4096);
        assert_eq!(event.kind, EventKind::Finished);
        assert_eq!(event.field("bytes_sent"), Some(&Value::from(4096u64)));
    }
}
