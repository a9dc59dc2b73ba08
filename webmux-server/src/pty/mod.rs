//! Pseudo-terminal driver and output pipeline
//!
//! `handle` wraps the OS PTY pair; `pump` bridges the PTY byte stream to
//! per-client network buffers with chunking, UTF-8 boundary safety and
//! backpressure.

#![allow(dead_code)]

mod handle;
mod pump;

pub use handle::{PtyHandle, PtyLaunch};
pub use pump::{OutputPump, PumpConfig, PumpHandle, SessionClosed, Utf8Carry};
