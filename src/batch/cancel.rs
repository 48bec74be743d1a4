//! Cooperative batch cancellation.

use tokio_util::sync::CancellationToken;

/// Cloneable cancellation signal for a batch. All clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle that fires on the process interrupt signal (Ctrl-C).
    ///
    /// Spawns a listener task, so it must be called from within a Tokio runtime.
    pub fn on_ctrl_c() -> Self {
        let handle = Self::new();
        let listener = handle.clone();
        tokio::spawn(async move {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    if signal.is_ok() {
                        tracing::warn!("interrupt received, canceling batch");
                        listener.cancel();
                    }
                }
                _ = listener.canceled() => {}
            }
        });
        handle
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn canceled(&self) {
        self.token.cancelled().await
    }

    /// Handle canceled together with this one, but cancelable on its own too.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl From<CancellationToken> for CancelHandle {
    fn from(token: CancellationToken) -> Self {
        Self { token }
    }
}
