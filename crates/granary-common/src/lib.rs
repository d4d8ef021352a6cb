//! Granary Common Library
//!
//! Shared utilities for the granary workspace:
//!
//! - **Error Handling**: the common error and result types
//! - **Logging**: tracing subscriber setup shared by every binary
//! - **Temp Files**: day-bucketed scratch paths and random suffixes

pub mod error;
pub mod logging;
pub mod tmpfile;

// Re-export commonly used types
pub use error::{GranaryError, Result};
