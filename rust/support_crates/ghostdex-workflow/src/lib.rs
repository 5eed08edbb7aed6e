//! Workflow execution utilities: a worker pool for running storage tasks in
//! parallel, and the progress objects through which callers wait on them.
//!
//! # Key Components
//!
//! - [`thread_pool::ThreadPool`] - A fixed set of worker threads draining a shared
//!   FIFO task queue.
//! - [`progress::SimpleProgress`] - Progress record of one task: subject, status,
//!   part counts, and a blocking [`join`](progress::Progress::join).
//! - [`progress::CompositeProgress`] - Aggregated view over a batch of tasks.
//! - [`progress::ProgressParts`] - The `(done, started, known, total)` tuple with
//!   its arithmetic and formatting helpers.

pub mod progress;
pub mod thread_pool;
