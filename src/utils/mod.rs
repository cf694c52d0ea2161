//! # Utility Modules
//!
//! Supporting utilities for logging, observability and timing.
//!
//! ## Components
//! - **Logging**: Structured logging configuration
//! - **Metrics**: Thread-safe observability counters
//! - **Timeout**: Async timeout wrappers and default durations

pub mod logging;
pub mod metrics;
pub mod timeout;
