//! Non-critical operations: presence updates, read receipts, group lookups.

use std::fmt::Display;
use std::future::Future;

/// Await `fut`; on failure log at debug and return `None`. Never propagates.
pub async fn best_effort<T, E, F>(what: &str, fut: F) -> Option<T>
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    match fut.await {
        Ok(v) => Some(v),
        Err(e) => {
            log::debug!("{} failed (ignored): {}", what, e);
            None
        }
    }
}
