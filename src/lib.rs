//! Utilities for running long-lived, cancellable background tasks with
//! hierarchical progress reporting.
//!
//! A [`tasks::Task`] is the unit of work. Any task can run sub-tasks
//! that take up a proportion of its own progress window; the roll-up
//! through the chain of [`tasks::ExecutionScope`]s yields a single
//! normalised value a UI can observe. A [`tasks::TaskContext`] wraps a
//! root task with a cross-thread state machine, observers and one-shot
//! completion callbacks, and a [`drivers::WorkerDriver`] — a dedicated
//! thread or a pooled slot — runs it to completion.
//!
//! The host environment only has to answer two questions, via
//! [`dispatch::MessageDispatch`]: "am I on the message thread" and
//! "run this on the message thread". Completion callbacks, pool queue
//! notifications and [`monitor::TaskMonitor`] refreshes all arrive
//! there.

pub mod dispatch;
pub mod drivers;
pub mod monitor;
pub mod synca;
pub mod tasks;
