//! Cancellable sleeping for retry loops.

use std::time::Duration;

use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use super::TransportError;

/// Sleep for `delay`, returning `Cancelled` early if the token fires first.
pub async fn sleep_with_cancellation(
    delay: Duration,
    cancellation: &CancellationToken,
) -> Result<(), TransportError> {
    if cancellation.is_cancelled() {
        return Err(TransportError::Cancelled);
    }

    if delay.is_zero() {
        yield_now().await;
        return Ok(());
    }

    tokio::select! {
        _ = cancellation.cancelled() => Err(TransportError::Cancelled),
        _ = sleep(delay) => Ok(()),
    }
}
