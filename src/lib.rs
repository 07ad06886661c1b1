//! Bounded, concurrent appends to many output files
//!
//! See [`Manager`] for the entry point.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod fs;
pub mod humanize;
pub mod limiter;
pub mod observability;
pub mod worker;

pub use dispatch::{Manager, ManagerConfig, RetryPolicy};
pub use error::{Result, WriteError};
pub use fs::{Fault, FileSystem, MemoryFileSystem, OsFileSystem, OutputFile};
pub use observability::{Metrics, MetricsSnapshot};
pub use worker::Body;
