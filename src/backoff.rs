use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Exponential backoff delay for a zero-based attempt: `base * 2^attempt`.
///
/// Saturates instead of overflowing so large attempt counts stay monotonic.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    base.saturating_mul(factor)
}

/// Sleep for `delay` unless `cancel` fires first. Returns false when cancelled.
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = cancel.cancelled() => false,
    }
}
