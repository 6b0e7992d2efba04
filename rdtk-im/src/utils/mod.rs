//! Utility modules for rdtk-im

pub mod db_retry;
pub mod pool_monitor;

pub use db_retry::{retry_on_lock, LockRetry};
pub use pool_monitor::{begin_monitored, MonitoredTransaction};
