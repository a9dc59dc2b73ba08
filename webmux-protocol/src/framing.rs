//! Binary framing variant of the wire protocol
//!
//! Frame layout: `[u8 tag][u32 LE payload length][payload]`.
//!
//! Tag 0x00 carries a JSON-encoded message (same object the text protocol
//! would carry); 0x01 and 0x03 are fast paths for terminal output and input
//! with the raw UTF-8 text as payload; 0x06/0x07 are keepalive frames with
//! an empty payload. Semantics are identical to the JSON text protocol.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::messages::{ClientMessage, ServerMessage};

/// JSON message payload
pub const FRAME_JSON: u8 = 0x00;
/// Raw terminal output text (server to client)
pub const FRAME_OUTPUT: u8 = 0x01;
/// Raw terminal input text (client to server)
pub const FRAME_INPUT: u8 = 0x03;
/// Keepalive ping (empty payload)
pub const FRAME_PING: u8 = 0x06;
/// Keepalive pong (empty payload)
pub const FRAME_PONG: u8 = 0x07;

/// Maximum frame payload size (1 MiB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Frame header size: tag byte + length word
const HEADER_SIZE: usize = 5;

/// Framing codec error
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Unknown frame tag: {0:#04x}")]
    UnknownTag(u8),

    #[error("Frame payload is not valid UTF-8")]
    InvalidText(#[from] std::string::FromUtf8Error),
}

/// Codec for the server side: decodes ClientMessage frames, encodes
/// ServerMessage frames
#[derive(Debug, Default)]
pub struct ServerFrameCodec;

impl ServerFrameCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for ServerFrameCodec {
    type Item = ClientMessage;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some((tag, payload)) = split_frame(src)? else {
            return Ok(None);
        };

        let msg = match tag {
            FRAME_JSON => serde_json::from_slice(&payload)?,
            FRAME_INPUT => ClientMessage::Input {
                data: String::from_utf8(payload.to_vec())?,
            },
            FRAME_PING => ClientMessage::Ping,
            other => return Err(CodecError::UnknownTag(other)),
        };
        Ok(Some(msg))
    }
}

impl Encoder<ServerMessage> for ServerFrameCodec {
    type Error = CodecError;

    fn encode(&mut self, item: ServerMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            ServerMessage::Output { data } => put_frame(dst, FRAME_OUTPUT, data.as_bytes()),
            ServerMessage::Pong => put_frame(dst, FRAME_PONG, &[]),
            other => put_frame(dst, FRAME_JSON, &serde_json::to_vec(&other)?),
        }
    }
}

/// Codec for the client side: encodes ClientMessage frames, decodes
/// ServerMessage frames
#[derive(Debug, Default)]
pub struct ClientFrameCodec;

impl ClientFrameCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for ClientFrameCodec {
    type Item = ServerMessage;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some((tag, payload)) = split_frame(src)? else {
            return Ok(None);
        };

        let msg = match tag {
            FRAME_JSON => serde_json::from_slice(&payload)?,
            FRAME_OUTPUT => ServerMessage::Output {
                data: String::from_utf8(payload.to_vec())?,
            },
            FRAME_PONG => ServerMessage::Pong,
            other => return Err(CodecError::UnknownTag(other)),
        };
        Ok(Some(msg))
    }
}

impl Encoder<ClientMessage> for ClientFrameCodec {
    type Error = CodecError;

    fn encode(&mut self, item: ClientMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            ClientMessage::Input { data } => put_frame(dst, FRAME_INPUT, data.as_bytes()),
            ClientMessage::Ping => put_frame(dst, FRAME_PING, &[]),
            other => put_frame(dst, FRAME_JSON, &serde_json::to_vec(&other)?),
        }
    }
}

/// Split one complete frame off the front of the buffer, if present
fn split_frame(src: &mut BytesMut) -> Result<Option<(u8, BytesMut)>, CodecError> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let tag = src[0];
    let len = u32::from_le_bytes([src[1], src[2], src[3], src[4]]) as usize;

    if len > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }

    if src.len() < HEADER_SIZE + len {
        src.reserve(HEADER_SIZE + len - src.len());
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    Ok(Some((tag, src.split_to(len))))
}

/// Append one frame to the buffer
fn put_frame(dst: &mut BytesMut, tag: u8, payload: &[u8]) -> Result<(), CodecError> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge {
            size: payload.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_u8(tag);
    dst.put_u32_le(payload.len() as u32);
    dst.put_slice(payload);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_fast_path_roundtrip() {
        let mut server = ServerFrameCodec::new();
        let mut client = ClientFrameCodec::new();

        let msg = ServerMessage::Output {
            data: "\x1b[31mhello\x1b[0m".into(),
        };

        let mut buf = BytesMut::new();
        server.encode(msg.clone(), &mut buf).unwrap();
        assert_eq!(buf[0], FRAME_OUTPUT);

        let decoded = client.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, msg);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_input_fast_path_roundtrip() {
        let mut server = ServerFrameCodec::new();
        let mut client = ClientFrameCodec::new();

        let msg = ClientMessage::Input { data: "ls\n".into() };

        let mut buf = BytesMut::new();
        client.encode(msg.clone(), &mut buf).unwrap();
        assert_eq!(buf[0], FRAME_INPUT);

        let decoded = server.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_json_frames_carry_full_messages() {
        let mut server = ServerFrameCodec::new();
        let mut client = ClientFrameCodec::new();

        let msg = ClientMessage::AttachSession {
            session_name: "dev".into(),
            cols: 80,
            rows: 24,
            mode: None,
        };

        let mut buf = BytesMut::new();
        client.encode(msg.clone(), &mut buf).unwrap();
        assert_eq!(buf[0], FRAME_JSON);

        let decoded = server.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, msg);

        let reply = ServerMessage::Attached {
            session_name: "dev".into(),
        };
        let mut buf = BytesMut::new();
        server.encode(reply.clone(), &mut buf).unwrap();
        let decoded = client.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, reply);
    }

    #[test]
    fn test_ping_pong_empty_payload() {
        let mut server = ServerFrameCodec::new();
        let mut client = ClientFrameCodec::new();

        let mut buf = BytesMut::new();
        client.encode(ClientMessage::Ping, &mut buf).unwrap();
        assert_eq!(&buf[..], &[FRAME_PING, 0, 0, 0, 0]);
        assert_eq!(
            server.decode(&mut buf).unwrap().unwrap(),
            ClientMessage::Ping
        );

        let mut buf = BytesMut::new();
        server.encode(ServerMessage::Pong, &mut buf).unwrap();
        assert_eq!(&buf[..], &[FRAME_PONG, 0, 0, 0, 0]);
        assert_eq!(
            client.decode(&mut buf).unwrap().unwrap(),
            ServerMessage::Pong
        );
    }

    #[test]
    fn test_partial_frame_returns_none() {
        let mut server = ServerFrameCodec::new();
        let mut client = ClientFrameCodec::new();

        let mut buf = BytesMut::new();
        client
            .encode(ClientMessage::Input { data: "abc".into() }, &mut buf)
            .unwrap();

        // Feed the frame one byte at a time
        let full = buf.clone();
        let mut partial = BytesMut::new();
        for (i, byte) in full.iter().enumerate() {
            partial.put_u8(*byte);
            let result = server.decode(&mut partial).unwrap();
            if i + 1 < full.len() {
                assert!(result.is_none(), "decoded early at byte {}", i);
            } else {
                assert_eq!(result.unwrap(), ClientMessage::Input { data: "abc".into() });
            }
        }
    }

    #[test]
    fn test_multiple_frames_in_buffer() {
        let mut server = ServerFrameCodec::new();
        let mut client = ClientFrameCodec::new();

        let mut buf = BytesMut::new();
        client.encode(ClientMessage::Ping, &mut buf).unwrap();
        client
            .encode(ClientMessage::Input { data: "a".into() }, &mut buf)
            .unwrap();
        client.encode(ClientMessage::ListSessions, &mut buf).unwrap();

        assert_eq!(
            server.decode(&mut buf).unwrap().unwrap(),
            ClientMessage::Ping
        );
        assert_eq!(
            server.decode(&mut buf).unwrap().unwrap(),
            ClientMessage::Input { data: "a".into() }
        );
        assert_eq!(
            server.decode(&mut buf).unwrap().unwrap(),
            ClientMessage::ListSessions
        );
        assert!(server.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_oversized_frame_rejected_on_decode() {
        let mut server = ServerFrameCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u8(FRAME_JSON);
        buf.put_u32_le((MAX_FRAME_SIZE + 1) as u32);

        let result = server.decode(&mut buf);
        assert!(matches!(result, Err(CodecError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let mut server = ServerFrameCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u8(0x42);
        buf.put_u32_le(0);

        let result = server.decode(&mut buf);
        assert!(matches!(result, Err(CodecError::UnknownTag(0x42))));
    }

    #[test]
    fn test_invalid_utf8_input_rejected() {
        let mut server = ServerFrameCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u8(FRAME_INPUT);
        buf.put_u32_le(2);
        buf.put_slice(&[0xff, 0xfe]);

        let result = server.decode(&mut buf);
        assert!(matches!(result, Err(CodecError::InvalidText(_))));
    }
}
