//! Length-prefixed JSON framing.
//!
//! Wire format: `[4-byte big-endian u32 length N][N bytes of UTF-8 JSON]`,
//! frames back to back with no padding. Length prefixing (rather than
//! newline delimiting) is required because terminal buffers routinely carry
//! newlines and escape bytes inside JSON strings.

use crate::{ControlMessage, FrameError};

/// Hard cap on a single frame body (5 MiB), bounding memory per message.
pub const MAX_FRAME_LEN: usize = 5 * 1024 * 1024;

/// Encode a message as a single frame, length prefix included.
pub fn encode_frame(msg: &ControlMessage) -> Result<Vec<u8>, FrameError> {
    let body = serde_json::to_vec(msg)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(FrameError::Oversize {
            len: body.len(),
            max: MAX_FRAME_LEN,
        });
    }

    let mut buf = Vec::with_capacity(4 + body.len());
    buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Incremental frame decoder.
///
/// Feed raw bytes with [`FrameDecoder::extend`] and pop complete messages
/// with [`FrameDecoder::next_frame`]. Partial frames stay buffered.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes read from the transport.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Pop the next complete message, if any.
    ///
    /// An oversize declared length is fatal and leaves the buffer untouched;
    /// the connection must be closed before any body bytes are dispatched.
    /// Malformed JSON inside a complete frame drains that frame and returns
    /// `FrameError::Json` so the caller can count consecutive failures.
    pub fn next_frame(&mut self) -> Result<Option<ControlMessage>, FrameError> {
        if self.buf.len() < 4 {
            return Ok(None);
        }

        let len = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        if len > MAX_FRAME_LEN {
            return Err(FrameError::Oversize {
                len,
                max: MAX_FRAME_LEN,
            });
        }

        if self.buf.len() < 4 + len {
            return Ok(None);
        }

        let result = serde_json::from_slice(&self.buf[4..4 + len]);
        self.buf.drain(..4 + len);

        match result {
            Ok(msg) => Ok(Some(msg)),
            Err(e) => Err(FrameError::Json(e)),
        }
    }

    /// Bytes currently buffered (partial frame included).
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MessageKind;
    use serde_json::json;

    fn ping() -> ControlMessage {
        ControlMessage::request("ping", "0011aabb", json!({}))
    }

    #[test]
    fn round_trips_a_frame() {
        let encoded = encode_frame(&ping()).unwrap();

        let mut decoder = FrameDecoder::new();
        decoder.extend(&encoded);

        let msg = decoder.next_frame().unwrap().unwrap();
        assert_eq!(msg.kind, MessageKind::Request);
        assert_eq!(msg.msg_type, "ping");
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn decodes_back_to_back_frames() {
        let a = encode_frame(&ping()).unwrap();
        let b = encode_frame(&ControlMessage::event("stream_register", json!({"session": "main"})))
            .unwrap();

        let mut decoder = FrameDecoder::new();
        let mut joined = a.clone();
        joined.extend_from_slice(&b);
        decoder.extend(&joined);

        assert_eq!(decoder.next_frame().unwrap().unwrap().msg_type, "ping");
        assert_eq!(
            decoder.next_frame().unwrap().unwrap().msg_type,
            "stream_register"
        );
        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn partial_reads_block_until_complete() {
        let encoded = encode_frame(&ping()).unwrap();
        let mut decoder = FrameDecoder::new();

        decoder.extend(&encoded[..3]);
        assert!(decoder.next_frame().unwrap().is_none());

        decoder.extend(&encoded[3..encoded.len() - 1]);
        assert!(decoder.next_frame().unwrap().is_none());

        decoder.extend(&encoded[encoded.len() - 1..]);
        assert!(decoder.next_frame().unwrap().is_some());
    }

    #[test]
    fn buffers_survive_newlines_in_payload() {
        let msg = ControlMessage::event(
            "stream_data",
            json!({"session": "main", "data": "line1\nline2\x1b[0m\n"}),
        );
        let encoded = encode_frame(&msg).unwrap();

        let mut decoder = FrameDecoder::new();
        decoder.extend(&encoded);

        let decoded = decoder.next_frame().unwrap().unwrap();
        assert_eq!(
            decoded.payload["data"].as_str().unwrap(),
            "line1\nline2\x1b[0m\n"
        );
    }

    #[test]
    fn oversize_length_prefix_is_fatal_before_body() {
        let mut decoder = FrameDecoder::new();
        // Declares a 6 MiB frame; only the prefix has arrived.
        decoder.extend(&((6 * 1024 * 1024) as u32).to_be_bytes());

        match decoder.next_frame() {
            Err(FrameError::Oversize { len, .. }) => assert_eq!(len, 6 * 1024 * 1024),
            other => panic!("expected oversize error, got {other:?}"),
        }
    }

    #[test]
    fn oversize_encode_is_rejected() {
        let msg = ControlMessage::event("stream_data", json!({"data": "x".repeat(MAX_FRAME_LEN)}));
        assert!(matches!(
            encode_frame(&msg),
            Err(FrameError::Oversize { .. })
        ));
    }

    #[test]
    fn malformed_json_drains_the_frame() {
        let body = b"not json at all";
        let mut raw = (body.len() as u32).to_be_bytes().to_vec();
        raw.extend_from_slice(body);
        raw.extend_from_slice(&encode_frame(&ping()).unwrap());

        let mut decoder = FrameDecoder::new();
        decoder.extend(&raw);

        assert!(matches!(decoder.next_frame(), Err(FrameError::Json(_))));
        // The bad frame is gone; the next one decodes.
        assert_eq!(decoder.next_frame().unwrap().unwrap().msg_type, "ping");
    }
}
