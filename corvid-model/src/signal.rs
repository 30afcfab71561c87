//! Awaitable two-state signals.

use parking_lot::Mutex;
use tokio::sync::Notify;

/// A settable, clearable flag that tasks can await.
///
/// `wait` resolves immediately when the flag is set, otherwise it suspends
/// until the next `set`. Unlike a bare [`Notify`], the level is retained:
/// a `set` that happens before anyone waits is not lost.
#[derive(Debug, Default)]
pub struct Flag {
    state: Mutex<bool>,
    notify: Notify,
}

impl Flag {
    /// Create a new flag in the cleared state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag and wake all current waiters.
    pub fn set(&self) {
        *self.state.lock() = true;
        self.notify.notify_waiters();
    }

    /// Clear the flag. Future `wait` calls suspend again.
    pub fn clear(&self) {
        *self.state.lock() = false;
    }

    /// Whether the flag is currently set.
    pub fn is_set(&self) -> bool {
        *self.state.lock()
    }

    /// Suspend until the flag is set.
    pub async fn wait(&self) {
        loop {
            // The notified future must exist before the state check so a
            // set between the check and the await is not missed.
            let notified = self.notify.notified();
            if *self.state.lock() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn wait_resolves_when_already_set() {
        let flag = Flag::new();
        flag.set();
        timeout(Duration::from_millis(100), flag.wait())
            .await
            .expect("wait should resolve immediately");
    }

    #[tokio::test]
    async fn wait_suspends_until_set() {
        let flag = Arc::new(Flag::new());
        assert!(timeout(Duration::from_millis(50), flag.wait()).await.is_err());

        let waiter = flag.clone();
        let handle = tokio::spawn(async move { waiter.wait().await });
        tokio::task::yield_now().await;
        flag.set();
        timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter should be woken")
            .unwrap();
    }

    #[tokio::test]
    async fn clear_resets_the_level() {
        let flag = Flag::new();
        flag.set();
        assert!(flag.is_set());
        flag.clear();
        assert!(!flag.is_set());
        assert!(timeout(Duration::from_millis(50), flag.wait()).await.is_err());
    }
}
