//! Fetch coordination
//!
//! - `lock`: database compare-and-set lock with start-rate limiting
//! - `status`: advisory progress row for pollers
//! - `coordinator`: one refresh step per call

mod coordinator;
mod lock;
mod status;

pub use coordinator::{FetchCoordinator, FetchOutcome};
pub use lock::{FetchLock, FetchLockGuard, LockDecision};
pub use status::{FetchStatusSnapshot, StatusPublisher, READY_LABEL};
