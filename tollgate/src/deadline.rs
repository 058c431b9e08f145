use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

/// Run one external round trip under a deadline
///
/// Expiry of the deadline is an infrastructure error, never a default value.
pub(crate) async fn bounded<T, E, F>(operation: &'static str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, E>>,
    Error: From<E>,
{
    match timeout(limit, fut).await {
        Ok(result) => result.map_err(Error::from),
        Err(_) => Err(Error::Timeout {
            operation,
            after: limit,
        }),
    }
}
