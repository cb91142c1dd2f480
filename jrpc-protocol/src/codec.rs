//! Byte-stream codecs for persistent connections.
//!
//! A persistent connection carries a sequence of envelopes, either as binary
//! frames (see [`crate::frame`]) or as newline-delimited JSON.

use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::MAX_PAYLOAD_SIZE;
use bytes::{Buf, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How envelopes are delimited on a byte stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireMode {
    /// Length-prefixed binary frames with CRC32C.
    #[default]
    Framed,
    /// One JSON document per line.
    Lines,
}

impl WireMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WireMode::Framed => "framed",
            WireMode::Lines => "lines",
        }
    }
}

impl fmt::Display for WireMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WireMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "framed" | "binary" => Ok(WireMode::Framed),
            "lines" | "jsonl" => Ok(WireMode::Lines),
            other => Err(format!("unknown wire mode: {}", other)),
        }
    }
}

/// Encodes payloads for the wire.
pub struct FrameEncoder;

impl FrameEncoder {
    /// Wraps one serialized envelope according to `mode`.
    pub fn encode(mode: WireMode, payload: &[u8]) -> Result<Bytes, ProtocolError> {
        match mode {
            WireMode::Framed => {
                let frame = Frame::new(Bytes::copy_from_slice(payload));
                Ok(frame.encode()?.freeze())
            }
            WireMode::Lines => {
                if payload.len() > MAX_PAYLOAD_SIZE as usize {
                    return Err(ProtocolError::FrameTooLarge {
                        size: u32::try_from(payload.len()).unwrap_or(u32::MAX),
                        max: MAX_PAYLOAD_SIZE,
                    });
                }
                if payload.contains(&b'\n') {
                    return Err(ProtocolError::InvalidEnvelope(
                        "payload contains a newline".to_string(),
                    ));
                }
                let mut line = Vec::with_capacity(payload.len() + 1);
                line.extend_from_slice(payload);
                line.push(b'\n');
                Ok(Bytes::from(line))
            }
        }
    }

    /// Serializes `value` and wraps it according to `mode`.
    pub fn encode_json<T: Serialize>(mode: WireMode, value: &T) -> Result<Bytes, ProtocolError> {
        let payload = serde_json::to_vec(value)?;
        Self::encode(mode, &payload)
    }
}

/// Incremental decoder splitting a byte stream into envelope payloads.
pub struct FrameDecoder {
    mode: WireMode,
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new(mode: WireMode) -> Self {
        Self {
            mode,
            buffer: BytesMut::with_capacity(8192),
        }
    }

    pub fn mode(&self) -> WireMode {
        self.mode
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Returns the next complete payload, or `None` if more data is needed.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        match self.mode {
            WireMode::Framed => Ok(Frame::decode(&mut self.buffer)?.map(|f| f.payload)),
            WireMode::Lines => self.next_line(),
        }
    }

    fn next_line(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        loop {
            let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') else {
                if self.buffer.len() > MAX_PAYLOAD_SIZE as usize {
                    return Err(ProtocolError::FrameTooLarge {
                        size: u32::try_from(self.buffer.len()).unwrap_or(u32::MAX),
                        max: MAX_PAYLOAD_SIZE,
                    });
                }
                return Ok(None);
            };

            let mut line = self.buffer.split_to(pos + 1);
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(pos - 1);
            }
            // blank keep-alive lines
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Ok(Some(line.freeze()));
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Discards buffered data, e.g. after a protocol error.
    pub fn clear(&mut self) {
        self.buffer.advance(self.buffer.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Id, Request, Response};
    use serde_json::json;

    #[test]
    fn test_framed_roundtrip() {
        let request = Request::new(42, "rpc.ping", vec![]);
        let encoded = FrameEncoder::encode_json(WireMode::Framed, &request).unwrap();

        let mut decoder = FrameDecoder::new(WireMode::Framed);
        decoder.extend(&encoded);

        let payload = decoder.next_frame().unwrap().unwrap();
        let decoded: Request = serde_json::from_slice(&payload).unwrap();
        assert_eq!(decoded.id, Id::from(42));
        assert_eq!(decoded.method, "rpc.ping");
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_lines_roundtrip() {
        let response = Response::ok(Id::from(1), json!({"pong": true}));
        let encoded = FrameEncoder::encode_json(WireMode::Lines, &response).unwrap();
        assert_eq!(encoded.last(), Some(&b'\n'));

        let mut decoder = FrameDecoder::new(WireMode::Lines);
        decoder.extend(&encoded);

        let payload = decoder.next_frame().unwrap().unwrap();
        let decoded: Response = serde_json::from_slice(&payload).unwrap();
        assert_eq!(decoded.result(), Some(&json!({"pong": true})));
    }

    #[test]
    fn test_partial_frame_decoding() {
        let request = Request::new(1, "echo", vec![json!("hi")]);
        let encoded = FrameEncoder::encode_json(WireMode::Framed, &request).unwrap();

        let mut decoder = FrameDecoder::new(WireMode::Framed);
        decoder.extend(&encoded[..10]);
        assert!(decoder.next_frame().unwrap().is_none());

        decoder.extend(&encoded[10..]);
        assert!(decoder.next_frame().unwrap().is_some());
    }

    #[test]
    fn test_lines_partial_and_multiple() {
        let mut decoder = FrameDecoder::new(WireMode::Lines);
        decoder.extend(br#"{"jsonrpc":"2.0","#);
        assert!(decoder.next_frame().unwrap().is_none());

        decoder.extend(b"\"method\":\"a\"}\r\n\n{\"jsonrpc\":\"2.0\",\"method\":\"b\"}\n");

        let first = decoder.next_frame().unwrap().unwrap();
        assert_eq!(first.as_ref(), br#"{"jsonrpc":"2.0","method":"a"}"#);

        let second = decoder.next_frame().unwrap().unwrap();
        assert_eq!(second.as_ref(), br#"{"jsonrpc":"2.0","method":"b"}"#);

        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_lines_rejects_embedded_newline() {
        let result = FrameEncoder::encode(WireMode::Lines, b"{\n}");
        assert!(matches!(result, Err(ProtocolError::InvalidEnvelope(_))));
    }

    #[test]
    fn test_corrupted_frame_is_an_error() {
        let mut encoded = FrameEncoder::encode(WireMode::Framed, br#"{"id":1}"#)
            .unwrap()
            .to_vec();
        let last = encoded.len() - 1;
        encoded[last] ^= 0x20;

        let mut decoder = FrameDecoder::new(WireMode::Framed);
        decoder.extend(&encoded);
        assert!(matches!(
            decoder.next_frame(),
            Err(ProtocolError::CrcMismatch { .. })
        ));

        decoder.clear();
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_wire_mode_parsing() {
        assert_eq!("framed".parse::<WireMode>().unwrap(), WireMode::Framed);
        assert_eq!("LINES".parse::<WireMode>().unwrap(), WireMode::Lines);
        assert_eq!("jsonl".parse::<WireMode>().unwrap(), WireMode::Lines);
        assert!("carrier-pigeon".parse::<WireMode>().is_err());

        assert_eq!(WireMode::default(), WireMode::Framed);
        assert_eq!(serde_json::to_string(&WireMode::Lines).unwrap(), "\"lines\"");
    }
}
