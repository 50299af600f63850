//! Configuration store seam used by the stream source resolver.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// Invoked by the store each time the watched entry changes.
pub type StoreChangeCallback = Arc<dyn Fn() + Send + Sync>;

/// Read access and change feed on a `(category, key)` addressed store.
#[async_trait]
pub trait StreamSourceStore: Send + Sync {
    /// Current value, or `None` when the entry has never been configured.
    async fn get(&self, category: &str, key: &str) -> anyhow::Result<Option<Value>>;

    /// Registers `callback` for changes of `(category, key)`. The
    /// subscription ends when the returned handle is unsubscribed or dropped.
    fn on_change(
        &self,
        category: &str,
        key: &str,
        callback: StoreChangeCallback,
    ) -> anyhow::Result<StoreSubscription>;
}

/// Unsubscribe handle returned by [`StreamSourceStore::on_change`].
pub struct StoreSubscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl StoreSubscription {
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for StoreSubscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl fmt::Debug for StoreSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreSubscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_cancel_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let sub = StoreSubscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        sub.unsubscribe();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_cancels() {
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let counter = calls.clone();
            let _sub = StoreSubscription::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
