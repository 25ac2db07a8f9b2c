//! Periodic triggers. Each one only enqueues a task; the worker pool does the work.

pub(crate) mod cadence;
pub mod daemon;

pub use daemon::Daemons;
