//! Job pipeline
//!
//! - `dispatcher`: maps job types to activity handlers
//! - `runner`: the polling loop that drains the queue

mod dispatcher;
mod runner;

pub use dispatcher::Dispatcher;
pub use runner::JobRunner;
