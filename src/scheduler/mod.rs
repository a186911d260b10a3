//! Work planning and placement.
//!
//! The [`Scheduler`] runs two independent passes:
//!
//! - **Stream discovery** ([`Scheduler::notify_for_streams`]): turns every due
//!   stream into one [`Job`] per required version, each a stream, transcode
//!   and upload [`Action`](job::Action) in that order.
//! - **Assignment and reconciliation** ([`Scheduler::notify_runner_assignments`]):
//!   dispatches the next action of every open job to the least loaded alive
//!   runner, fails running actions whose runner went silent, and requeues
//!   failed actions.
//!
//! Actions of one job run strictly in order. There is no cancellation when an
//! action is reassigned: a runner that was only partitioned away may keep
//! working on it, so execution is at-least-once.

pub mod assigner;
pub mod discovery;
pub mod job;
pub mod store;

pub use assigner::{AssignmentReport, Scheduler};
pub use discovery::DiscoveryReport;
pub use job::{Action, ActionKind, ActionStatus, ActionType, Job, StreamVersion};
pub use store::JobStore;
