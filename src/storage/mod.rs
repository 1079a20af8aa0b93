//! Retention of capture event directories

mod retention;
mod worker;

pub use retention::{RetentionPolicy, TrimReport};
pub use worker::RetentionWorker;
