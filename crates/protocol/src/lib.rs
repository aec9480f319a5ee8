pub mod constants;
pub mod envelope;
pub mod event;

// Re-export primary types for convenience.
pub use constants::{FailureKind, MessageType};
pub use envelope::{ErrorCode, Incoming, Request, ResultError, ResultMessage};
pub use event::HassEvent;
