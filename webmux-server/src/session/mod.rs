//! Session attachment engine
//!
//! Owns the registry of live session attachments and the two attachment
//! strategies: `direct` (shared raw PTY) and `isolated` (capture polling
//! plus key injection).

mod direct;
mod engine;
mod isolated;

pub use direct::DirectAttachment;
pub use engine::{SessionEngine, SessionState};
pub use isolated::{InputCommand, IsolatedAttachment};
