//! webmux-protocol: Wire protocol shared by the webmux server and clients
//!
//! Defines the client→server and server→client message unions exchanged over
//! a single WebSocket per client, plus an optional binary framing variant
//! with identical semantics. Text frames carry one JSON object per message
//! with a `type` discriminant; binary frames use a 1-byte tag, a 4-byte
//! little-endian length and the payload.

pub mod framing;
pub mod messages;
pub mod types;

pub use framing::{
    ClientFrameCodec, CodecError, ServerFrameCodec, FRAME_INPUT, FRAME_JSON, FRAME_OUTPUT,
    FRAME_PING, FRAME_PONG, MAX_FRAME_SIZE,
};
pub use messages::{ClientMessage, ErrorCode, ServerMessage, TopologyEvent};
pub use types::{AttachMode, AudioAction, SessionSummary, WindowInfo};
