//! Change subscriptions on configuration paths.
//!
//! A subscriber registers interest in a path (e.g. `["radio", "stream_url"]`)
//! and is called back with the value found at that path every time a write
//! touches it: a write on the path itself, on one of its ancestors, or on one
//! of its descendants.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde_yaml::Value;
use tracing::debug;
use uuid::Uuid;

/// Callback invoked with the current value at the watched path
/// (`Value::Null` when the path does not exist).
pub type ChangeCallback = Arc<dyn Fn(&Value) + Send + Sync>;

struct Watcher {
    id: Uuid,
    path: Vec<String>,
    callback: ChangeCallback,
}

#[derive(Default)]
pub(crate) struct WatcherRegistry {
    watchers: Mutex<Vec<Watcher>>,
}

impl WatcherRegistry {
    fn lock(&self) -> MutexGuard<'_, Vec<Watcher>> {
        self.watchers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn add(
        self: &Arc<Self>,
        path: Vec<String>,
        callback: ChangeCallback,
    ) -> ConfigSubscription {
        let id = Uuid::new_v4();
        debug!(%id, path = %path.join("."), "Adding configuration watcher");
        self.lock().push(Watcher {
            id,
            path: path.clone(),
            callback,
        });
        ConfigSubscription {
            id,
            path,
            registry: Arc::downgrade(self),
        }
    }

    fn remove(&self, id: Uuid) {
        self.lock().retain(|w| w.id != id);
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns the watchers affected by a write at `changed`, paired with
    /// their watched path. Callbacks are cloned out so they run without the
    /// registry lock held.
    pub(crate) fn affected(&self, changed: &[String]) -> Vec<(Vec<String>, ChangeCallback)> {
        self.lock()
            .iter()
            .filter(|w| paths_overlap(&w.path, changed))
            .map(|w| (w.path.clone(), Arc::clone(&w.callback)))
            .collect()
    }
}

fn paths_overlap(watched: &[String], changed: &[String]) -> bool {
    watched
        .iter()
        .zip(changed.iter())
        .all(|(a, b)| a == b)
}

/// Handle returned by [`crate::Config::on_change`].
///
/// Dropping the handle unsubscribes, so does [`ConfigSubscription::unsubscribe`].
pub struct ConfigSubscription {
    id: Uuid,
    path: Vec<String>,
    registry: Weak<WatcherRegistry>,
}

impl ConfigSubscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for ConfigSubscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            debug!(id = %self.id, path = %self.path.join("."), "Removing configuration watcher");
            registry.remove(self.id);
        }
    }
}

impl std::fmt::Debug for ConfigSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigSubscription")
            .field("id", &self.id)
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_paths_overlap() {
        let watched = path(&["radio", "stream_url"]);
        assert!(paths_overlap(&watched, &path(&["radio", "stream_url"])));
        assert!(paths_overlap(&watched, &path(&["radio"])));
        assert!(paths_overlap(&watched, &path(&["radio", "stream_url", "url"])));
        assert!(!paths_overlap(&watched, &path(&["radio", "name"])));
        assert!(!paths_overlap(&watched, &path(&["player"])));
    }

    #[test]
    fn test_drop_unsubscribes() {
        let registry = Arc::new(WatcherRegistry::default());
        let sub = registry.add(path(&["radio"]), Arc::new(|_| {}));
        assert_eq!(registry.len(), 1);
        drop(sub);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_subscription_outlives_registry() {
        let registry = Arc::new(WatcherRegistry::default());
        let sub = registry.add(path(&["radio"]), Arc::new(|_| {}));
        drop(registry);
        sub.unsubscribe();
    }
}
