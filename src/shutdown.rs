//! Cooperative shutdown signal shared by every background loop.
//!
//! A `tokio::sync::watch` channel rather than a dedicated crate: every loop
//! already depends on tokio, and a single bool transition is all any of
//! them need to hear.

use tokio::sync::watch;

#[derive(Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    /// Resolves once shutdown has been triggered. Safe to await repeatedly
    /// and from multiple clones of the same token.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn new() -> (Self, ShutdownToken) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, ShutdownToken { rx })
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancelled_resolves_after_trigger() {
        let (handle, token) = ShutdownHandle::new();
        assert!(!token.is_cancelled());
        handle.trigger();
        token.cancelled().await;
        assert!(token.is_cancelled());
    }
}
