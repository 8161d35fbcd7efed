//! State machine module.

pub mod handlers;
pub mod machine;

pub use handlers::{ConnectOutcome, DetachOutcome, DownloadOutcome, HandlerContext};
pub use machine::{DeviceKind, SessionSlot, SessionState};
