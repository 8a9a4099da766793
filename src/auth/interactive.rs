//! User-facing sign-in through the system browser.

use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info};
use url::Url;

use super::callback_server::{self, CallbackResult};
use crate::error::AuthError;

/// Drives the user through the provider's authorization page.
#[async_trait]
pub trait InteractiveAuthenticator: Send + Sync {
    /// Present `authorize_url` to the user and wait for the redirect.
    ///
    /// Returns the full callback URL including the `code` and `state`
    /// query parameters.
    async fn authorize(&self, authorize_url: &Url) -> Result<String, AuthError>;
}

/// Handle that aborts a pending browser sign-in.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    sender: Arc<Mutex<Option<mpsc::Sender<()>>>>,
}

impl CancelHandle {
    /// Cancel the pending sign-in, if any. Returns whether one was pending.
    pub fn cancel(&self) -> bool {
        let sender = self.slot().take();
        match sender {
            Some(tx) => {
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }

    /// Register a pending sign-in. The receiver fires (or disconnects) on
    /// [`cancel`](Self::cancel).
    pub fn arm(&self) -> mpsc::Receiver<()> {
        let (tx, rx) = mpsc::channel();
        *self.slot() = Some(tx);
        rx
    }

    fn disarm(&self) {
        self.slot().take();
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<mpsc::Sender<()>>> {
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Opens the authorization URL in the default browser and waits for the
/// provider to redirect back to the loopback callback server.
pub struct BrowserSignIn {
    port: u16,
    timeout: Duration,
    cancel: CancelHandle,
}

impl BrowserSignIn {
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self {
            port,
            timeout,
            cancel: CancelHandle::default(),
        }
    }

    /// Handle for aborting a sign-in from another task.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }
}

#[async_trait]
impl InteractiveAuthenticator for BrowserSignIn {
    async fn authorize(&self, authorize_url: &Url) -> Result<String, AuthError> {
        // Stop a previous listener so the port is free
        if self.cancel.cancel() {
            tokio::time::sleep(Duration::from_millis(150)).await;
        }

        let cancel_rx = self.cancel.arm();

        let port = self.port;
        let timeout = self.timeout;
        let server = tokio::task::spawn_blocking(move || {
            callback_server::start_callback_server(port, timeout, cancel_rx)
        });

        info!("Opening browser for sign-in");
        if let Err(e) = open::that(authorize_url.as_str()) {
            error!("Failed to open browser: {}", e);
            self.cancel.cancel();
            let _ = server.await;
            return Err(AuthError::OAuthFailed("Failed to open browser".into()));
        }

        let result = server
            .await
            .map_err(|e| AuthError::OAuthFailed(format!("callback server failed: {}", e)))?;
        self.cancel.disarm();

        match result {
            CallbackResult::Success(url) => Ok(url),
            CallbackResult::Cancelled => Err(AuthError::UserCancelled),
            CallbackResult::TimedOut => Err(AuthError::CallbackTimeout),
            CallbackResult::Error(e) => Err(AuthError::OAuthFailed(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_without_pending_sign_in() {
        let handle = CancelHandle::default();
        assert!(!handle.cancel());
    }

    #[test]
    fn test_cancel_signals_listener() {
        let handle = CancelHandle::default();
        let rx = handle.arm();

        assert!(handle.cancel());
        assert!(rx.try_recv().is_ok());
        assert!(!handle.cancel());
    }
}
