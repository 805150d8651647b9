//! Cancellation token shared between a front-end and a conversion supervisor.
//!
//! The flag is observable synchronously (`is_cancelled`) and awaitable
//! (`cancelled`), so the supervisor can race a cancellation request against
//! process output without polling. `close` seals the token once the outcome
//! is decided, so a request either lands before that decision or is refused.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// A cancellation token for cooperative cancellation of a conversion.
///
/// Clones share state. Once cancelled, a token stays cancelled; once closed,
/// it can no longer be cancelled.
///
/// # Example
///
/// ```
/// use mlxq_core::cancel::CancellationToken;
///
/// let token = CancellationToken::new();
/// let token_clone = token.clone();
///
/// token_clone.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

const OPEN: u8 = 0;
const CANCELLED: u8 = 1;
const CLOSED: u8 = 2;

#[derive(Debug, Default)]
struct Inner {
    state: AtomicU8,
    notify: Notify,
}

impl CancellationToken {
    /// Create a new cancellation token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation and wake every task awaiting `cancelled()`.
    ///
    /// Returns `true` if this call performed the transition, `false` if the
    /// token was already cancelled or closed.
    pub fn cancel(&self) -> bool {
        let first = self
            .inner
            .state
            .compare_exchange(OPEN, CANCELLED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if first {
            self.inner.notify.notify_waiters();
        }
        first
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.state.load(Ordering::SeqCst) == CANCELLED
    }

    /// Refuse any further cancellation.
    ///
    /// Returns `false` if cancellation was requested first; the token then
    /// stays cancelled.
    pub fn close(&self) -> bool {
        match self
            .inner
            .state
            .compare_exchange(OPEN, CLOSED, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => true,
            Err(state) => state == CLOSED,
        }
    }

    /// Wait until cancellation is requested.
    pub async fn cancelled(&self) {
        loop {
            // Register before checking the flag so a concurrent cancel() is not missed.
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}
