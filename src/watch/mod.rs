//! Watch loop: polls targets for change and hands events to the download manager.

pub mod checker;
pub mod event;
pub mod scheduler;
pub mod target;

pub use checker::{check_once, Checker, HttpChecker};
pub use event::{TriggerReason, WatchEvent};
pub use scheduler::{CycleOutcome, WatchLoop, WatchStats};
pub use target::{derive_target_id, parse_target_url, sanitize_key, WatchTarget};
