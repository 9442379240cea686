//! Task executor.
//!
//! Consumes task messages one at a time per consumer, enumerates the task's
//! range on the blocking pool and publishes a result message. A task is
//! acknowledged only after its result is published.

mod config;
mod worker;

pub use config::ExecutorConfig;
pub use worker::TaskExecutor;
