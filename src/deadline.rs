use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::timer::Timer;

/// Cancels a deadline- or timeout-bound [`CancellationToken`] early.
///
/// Returned by [`TimeSource::with_deadline`](crate::TimeSource::with_deadline)
/// and [`TimeSource::with_timeout`](crate::TimeSource::with_timeout).
/// [`cancel`](Self::cancel) is synchronous and idempotent. Dropping the handle
/// does not cancel the token; the deadline still applies.
pub struct CancelHandle {
    token: CancellationToken,
    timer: Mutex<Option<Timer>>,
}

impl CancelHandle {
    pub(crate) fn new(token: CancellationToken, timer: Option<Timer>) -> Self {
        Self {
            token,
            timer: Mutex::new(timer),
        }
    }

    /// Cancels the token and releases the deadline timer.
    pub fn cancel(&self) {
        self.token.cancel();
        if let Some(mut timer) = self.timer.lock().take() {
            timer.stop();
        }
    }

    /// Whether the token has been cancelled, by this handle, by the deadline,
    /// or by an ancestor token.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}
