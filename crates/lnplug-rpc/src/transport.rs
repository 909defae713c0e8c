//! Blank-line-delimited transport codec for JSON-RPC messages.
//!
//! The host frames each JSON-RPC unit as a UTF-8 JSON document followed by a
//! blank line (two consecutive newline characters); there is no length
//! prefix.
//!
//! Frame format:
//! ```text
//! +------------------+------------+
//! |  N bytes         |  2 bytes   |
//! |  (JSON payload)  |  "\n\n"    |
//! +------------------+------------+
//! ```
//!
//! The boundary is the authoritative end marker: a payload is never emitted
//! before both newlines arrive, even if the buffered bytes would already
//! parse as JSON. A payload that fails to parse once delimited is surfaced
//! as [`Frame::Invalid`] so that one bad message does not tear down the
//! stream; the read loop decides how to report it.

use bytes::BytesMut;
use std::io;
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::protocol::Message;

/// Maximum message size (16 MB)
const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// One decoded frame: either a parsed message or a delimited payload that
/// was not valid JSON-RPC.
#[derive(Debug)]
pub enum Frame {
    Message(Message),
    /// The payload between two boundaries failed to parse. Framing has
    /// already recovered; only this one message is lost.
    Invalid(serde_json::Error),
}

/// Codec for blank-line-delimited JSON-RPC messages
#[derive(Debug, Default)]
pub struct JsonRpcCodec;

impl JsonRpcCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn find_boundary(src: &[u8]) -> Option<usize> {
    src.windows(2).position(|w| w == b"\n\n")
}

impl Decoder for JsonRpcCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(pos) = find_boundary(src) else {
                if src.len() > MAX_MESSAGE_SIZE {
                    return Err(CodecError::MessageTooLarge(src.len()));
                }
                // Partial fragment, wait for the boundary.
                return Ok(None);
            };

            let payload = src.split_to(pos + 2);
            let body = &payload[..pos];

            // Runs of blank lines between messages are not payloads.
            if body.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            return Ok(Some(match serde_json::from_slice::<Message>(body) {
                Ok(message) => Frame::Message(message),
                Err(e) => Frame::Invalid(e),
            }));
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                if !src.is_empty() {
                    // A trailing fragment never got its boundary; the host
                    // hung up mid-message.
                    debug!(len = src.len(), "discarding unterminated trailing fragment");
                    src.clear();
                }
                Ok(None)
            }
        }
    }
}

impl Encoder<Message> for JsonRpcCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_vec(&item)?;

        if json.len() > MAX_MESSAGE_SIZE {
            return Err(CodecError::MessageTooLarge(json.len()));
        }

        dst.reserve(json.len() + 2);
        dst.extend_from_slice(&json);
        dst.extend_from_slice(b"\n\n");

        Ok(())
    }
}

/// Errors that can occur during codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message too large: {0} bytes (max: {MAX_MESSAGE_SIZE})")]
    MessageTooLarge(usize),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Notification, Request, Response};

    fn decode_message(codec: &mut JsonRpcCodec, buf: &mut BytesMut) -> Option<Message> {
        match codec.decode(buf).unwrap() {
            Some(Frame::Message(msg)) => Some(msg),
            Some(Frame::Invalid(e)) => panic!("unexpected invalid frame: {e}"),
            None => None,
        }
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut codec = JsonRpcCodec::new();
        let mut buf = BytesMut::new();

        let request = Request::new("test", Some(serde_json::json!({"key": "value"})), 1.into());
        let msg = Message::Request(request);

        codec.encode(msg.clone(), &mut buf).unwrap();
        let decoded = decode_message(&mut codec, &mut buf).unwrap();

        if let (Message::Request(orig), Message::Request(dec)) = (msg, decoded) {
            assert_eq!(orig.method, dec.method);
            assert_eq!(orig.id, dec.id);
        } else {
            panic!("Message type mismatch");
        }
    }

    #[test]
    fn test_encode_appends_blank_line() {
        let mut codec = JsonRpcCodec::new();
        let mut buf = BytesMut::new();

        let msg = Message::Response(Response::success(7.into(), serde_json::json!("ok")));
        codec.encode(msg, &mut buf).unwrap();

        assert!(buf.ends_with(b"\n\n"));
        assert_eq!(find_boundary(&buf), Some(buf.len() - 2));
    }

    #[test]
    fn test_no_emit_before_boundary() {
        let mut codec = JsonRpcCodec::new();
        let mut buf = BytesMut::new();

        // A complete, parseable JSON document without its boundary must not
        // be emitted yet.
        buf.extend_from_slice(br#"{"jsonrpc":"2.0","method":"a"}"#);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"\n");
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"\n");
        let decoded = decode_message(&mut codec, &mut buf).unwrap();
        assert!(decoded.is_notification());
    }

    #[test]
    fn test_split_reads_preserve_boundaries() {
        let mut codec = JsonRpcCodec::new();
        let mut buf = BytesMut::new();

        // First read stops after the first newline of the boundary.
        buf.extend_from_slice(b"{\"jsonrpc\":\"2.0\",\"method\":\"a\"}\n");
        assert!(codec.decode(&mut buf).unwrap().is_none());

        // Second read completes the boundary and carries the next message.
        buf.extend_from_slice(b"\n{\"jsonrpc\":\"2.0\",\"method\":\"b\"}\n\n");

        let first = decode_message(&mut codec, &mut buf).unwrap();
        let second = decode_message(&mut codec, &mut buf).unwrap();
        assert!(codec.decode(&mut buf).unwrap().is_none());

        match (first, second) {
            (Message::Request(a), Message::Request(b)) => {
                assert_eq!(a.method, "a");
                assert_eq!(b.method, "b");
            }
            other => panic!("expected two requests, got {other:?}"),
        }
    }

    #[test]
    fn test_multiple_messages_in_buffer() {
        let mut codec = JsonRpcCodec::new();
        let mut buf = BytesMut::new();

        codec
            .encode(Message::Request(Request::new("first", None, 1.into())), &mut buf)
            .unwrap();
        codec
            .encode(Message::Request(Request::new("second", None, 2.into())), &mut buf)
            .unwrap();

        let Message::Request(req) = decode_message(&mut codec, &mut buf).unwrap() else {
            panic!("Expected Request");
        };
        assert_eq!(req.method, "first");

        let Message::Request(req) = decode_message(&mut codec, &mut buf).unwrap() else {
            panic!("Expected Request");
        };
        assert_eq!(req.method, "second");

        assert!(buf.is_empty());
    }

    #[test]
    fn test_blank_line_runs_are_skipped() {
        let mut codec = JsonRpcCodec::new();
        let mut buf = BytesMut::new();

        buf.extend_from_slice(b"\n\n\n\n{\"jsonrpc\":\"2.0\",\"method\":\"x\"}\n\n");
        let decoded = decode_message(&mut codec, &mut buf).unwrap();
        assert!(decoded.is_notification());
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_invalid_json_costs_one_message() {
        let mut codec = JsonRpcCodec::new();
        let mut buf = BytesMut::new();

        buf.extend_from_slice(b"not valid json\n\n{\"jsonrpc\":\"2.0\",\"method\":\"ok\"}\n\n");

        match codec.decode(&mut buf).unwrap() {
            Some(Frame::Invalid(_)) => {}
            other => panic!("expected invalid frame, got {other:?}"),
        }

        // The stream keeps going with the next payload.
        let decoded = decode_message(&mut codec, &mut buf).unwrap();
        assert!(decoded.is_notification());
    }

    #[test]
    fn test_invalid_utf8_costs_one_message() {
        let mut codec = JsonRpcCodec::new();
        let mut buf = BytesMut::new();

        buf.extend_from_slice(&[0xff, 0xfe, 0x00, 0x01]);
        buf.extend_from_slice(b"\n\n");

        assert!(matches!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::Invalid(_))
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_empty_buffer() {
        let mut codec = JsonRpcCodec::new();
        let mut buf = BytesMut::new();

        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_eof_discards_trailing_fragment() {
        let mut codec = JsonRpcCodec::new();
        let mut buf = BytesMut::new();

        buf.extend_from_slice(b"{\"jsonrpc\":\"2.0\",\"method\":\"a\"}\n\n{\"truncat");

        let decoded = match codec.decode_eof(&mut buf).unwrap() {
            Some(Frame::Message(msg)) => msg,
            other => panic!("expected message, got {other:?}"),
        };
        assert!(decoded.is_notification());

        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_message_too_large() {
        let mut codec = JsonRpcCodec::new();
        let mut buf = BytesMut::new();

        buf.extend_from_slice(&vec![b'x'; MAX_MESSAGE_SIZE + 1]);

        let result = codec.decode(&mut buf);
        assert!(matches!(result, Err(CodecError::MessageTooLarge(_))));
    }

    #[test]
    fn test_encode_decode_notification() {
        let mut codec = JsonRpcCodec::new();
        let mut buf = BytesMut::new();

        let notification = Notification::new(
            "log",
            Some(serde_json::json!({"level": "info", "message": "hello"})),
        );
        codec
            .encode(Message::Notification(notification), &mut buf)
            .unwrap();

        // Due to the untagged enum a notification may decode as a Request
        // without an id, which is functionally the same thing.
        let decoded = decode_message(&mut codec, &mut buf).unwrap();
        assert!(decoded.is_notification());
    }

    #[test]
    fn test_codec_error_display() {
        let err = CodecError::MessageTooLarge(20_000_000);
        let msg = err.to_string();
        assert!(msg.contains("20000000"));
        assert!(msg.contains("too large"));
    }
}
