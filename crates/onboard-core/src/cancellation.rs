//! Cooperative cancellation shared between a caller, the engine and the
//! workflow definitions it invokes.

use std::sync::Arc;
use tokio::sync::watch;

/// Advisory cancellation signal
///
/// Clones share the same signal. Cancelling is one-way.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    sender: Arc<watch::Sender<bool>>,
}

impl CancellationToken {
    /// Create a token that is not cancelled
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Signal cancellation to every clone of this token
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Whether cancellation has been signalled
    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Wait until cancellation is signalled
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives as long as `self`, so the wait cannot fail
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
