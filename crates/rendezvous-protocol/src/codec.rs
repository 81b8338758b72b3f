//! Codec for encoding and decoding Rendezvous events.
//!
//! Two encodings are supported:
//! - JSON, one event per WebSocket text message.
//! - MessagePack with length-prefixed framing, for binary messages.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Maximum encoded event size (1 MiB).
pub const MAX_EVENT_SIZE: usize = 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Event exceeds maximum size.
    #[error("Event size {0} exceeds maximum {MAX_EVENT_SIZE}")]
    EventTooLarge(usize),

    /// Not enough data to decode an event.
    #[error("Incomplete event: need {0} more bytes")]
    Incomplete(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Wire encoding used by a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// JSON text messages.
    #[default]
    Json,
    /// Length-prefixed MessagePack binary messages.
    MessagePack,
}

/// Encode an event as a JSON text message.
///
/// # Errors
///
/// Returns an error if serialization fails or the result is too large.
pub fn encode_json<T: Serialize>(event: &T) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(event)?;
    if text.len() > MAX_EVENT_SIZE {
        return Err(ProtocolError::EventTooLarge(text.len()));
    }
    Ok(text)
}

/// Decode an event from a JSON text message.
///
/// # Errors
///
/// Returns an error if the text is too large or not a valid event.
pub fn decode_json<T: DeserializeOwned>(text: &str) -> Result<T, ProtocolError> {
    if text.len() > MAX_EVENT_SIZE {
        return Err(ProtocolError::EventTooLarge(text.len()));
    }
    Ok(serde_json::from_str(text)?)
}

/// Encode an event to length-prefixed MessagePack.
///
/// The encoded format is:
/// - 4 bytes: Big-endian length prefix
/// - N bytes: MessagePack-encoded event (named fields)
///
/// # Errors
///
/// Returns an error if the event is too large or encoding fails.
pub fn encode<T: Serialize>(event: &T) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_into(event, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode an event into an existing buffer.
///
/// # Errors
///
/// Returns an error if the event is too large or encoding fails.
pub fn encode_into<T: Serialize>(event: &T, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    let payload = rmp_serde::to_vec_named(event)?;

    if payload.len() > MAX_EVENT_SIZE {
        return Err(ProtocolError::EventTooLarge(payload.len()));
    }

    buf.reserve(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);

    Ok(())
}

/// Decode a single event from length-prefixed MessagePack.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, or invalid.
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, ProtocolError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()));
    }

    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;

    if length > MAX_EVENT_SIZE {
        return Err(ProtocolError::EventTooLarge(length));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if data.len() < total_size {
        return Err(ProtocolError::Incomplete(total_size - data.len()));
    }

    Ok(rmp_serde::from_slice(&data[LENGTH_PREFIX_SIZE..total_size])?)
}

/// Try to decode an event from a buffer, advancing it if successful.
///
/// Returns `Ok(Some(event))` if a complete event was decoded,
/// `Ok(None)` if more data is needed, or `Err` on protocol error.
/// A malformed event body is consumed before the error is returned, so the
/// buffer stays aligned on the next length prefix.
///
/// # Errors
///
/// Returns an error if the event is too large or invalid.
pub fn decode_from<T: DeserializeOwned>(buf: &mut BytesMut) -> Result<Option<T>, ProtocolError> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

    if length > MAX_EVENT_SIZE {
        return Err(ProtocolError::EventTooLarge(length));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if buf.len() < total_size {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_SIZE);
    let payload = buf.split_to(length);
    let event = rmp_serde::from_slice(&payload)?;

    Ok(Some(event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ClientEvent, ServerEvent};
    use serde_json::json;

    #[test]
    fn test_json_text_message() {
        let text = r#"{"event":"end-call","data":{"from":"alice","to":"bob"}}"#;
        let event: ClientEvent = decode_json(text).unwrap();
        assert_eq!(event, ClientEvent::end_call("alice", "bob"));

        let out = encode_json(&ServerEvent::CallEnded { from: "alice".into() }).unwrap();
        assert_eq!(out, r#"{"event":"call-ended","data":{"from":"alice"}}"#);
    }

    #[test]
    fn test_msgpack_preserves_opaque_payload() {
        let offer = json!({"type": "offer", "sdp": "v=0", "nested": [1, 2.5, null, true]});
        let event = ClientEvent::offer("alice", "bob", offer);

        let encoded = encode(&event).unwrap();
        let decoded: ClientEvent = decode(&encoded).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn test_decode_incomplete() {
        let encoded = encode(&ClientEvent::register("alice")).unwrap();

        match decode::<ClientEvent>(&encoded[..5]) {
            Err(ProtocolError::Incomplete(_)) => {}
            other => panic!("Expected Incomplete error, got {:?}", other),
        }
    }

    #[test]
    fn test_event_too_large() {
        let huge = "x".repeat(MAX_EVENT_SIZE + 1);
        let event = ClientEvent::offer("alice", "bob", json!(huge));

        match encode(&event) {
            Err(ProtocolError::EventTooLarge(_)) => {}
            other => panic!("Expected EventTooLarge error, got {:?}", other),
        }
        assert!(matches!(
            encode_json(&event),
            Err(ProtocolError::EventTooLarge(_))
        ));
    }

    #[test]
    fn test_streaming_decode() {
        let first = ClientEvent::register("alice");
        let second = ClientEvent::end_call("alice", "bob");

        let mut buf = BytesMut::new();
        encode_into(&first, &mut buf).unwrap();
        encode_into(&second, &mut buf).unwrap();

        // Split delivery: only a partial prefix of the third event.
        buf.extend_from_slice(&[0, 0]);

        assert_eq!(decode_from::<ClientEvent>(&mut buf).unwrap(), Some(first));
        assert_eq!(decode_from::<ClientEvent>(&mut buf).unwrap(), Some(second));
        assert_eq!(decode_from::<ClientEvent>(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_malformed_body_is_consumed() {
        let mut buf = BytesMut::new();
        buf.put_u32(1);
        buf.put_u8(0xc1); // reserved MessagePack marker
        encode_into(&ClientEvent::register("bob"), &mut buf).unwrap();

        assert!(decode_from::<ClientEvent>(&mut buf).is_err());
        assert_eq!(
            decode_from::<ClientEvent>(&mut buf).unwrap(),
            Some(ClientEvent::register("bob"))
        );
    }
}
