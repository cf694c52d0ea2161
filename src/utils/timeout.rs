//! Timeout defaults and async timeout wrappers.
//!
//! The protocol never cancels an in-flight invocation on its own; callers
//! bound their waits with these helpers.

use std::future::Future;
use std::time::Duration;

use crate::error::{ProtocolError, Result};

/// Default timeout for connection attempts
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default wait for an invocation reply
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval between liveness pings
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Grace period for closing a listener
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Run `future` to completion or fail with [`ProtocolError::Timeout`]
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| ProtocolError::Timeout)
}

/// Like [`with_timeout`] for futures that already return a protocol `Result`
pub async fn with_timeout_error<F, T>(duration: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    with_timeout(duration, future).await?
}
