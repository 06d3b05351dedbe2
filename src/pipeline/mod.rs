//! Pipeline stages for a watcher invocation.
//!
//! - `schedule`: Pick the topic that has waited longest
//! - `diff`: Detect listings not seen before and merge them into state
//! - `notify`: Dispatch capped, throttled notifications
//! - `run`: Drive a topic through fetch, extract, diff, notify and record

pub mod diff;
pub mod notify;
pub mod run;
pub mod schedule;

pub use diff::{ChangeDetector, StateChange};
pub use notify::{DispatchReport, NotificationBatch, NotificationDispatcher};
pub use run::{RunOutcome, RunReport, RunStage, Runner};
pub use schedule::select_topic;
