//! Stream source resolution.
//!
//! The resolver caches the stream URL read from a [`StreamSourceStore`] and
//! keeps a single change subscription on its `(category, key)` entry. Store
//! queries run outside the controller task: [`StreamSourceResolver::load_stream_url`]
//! returns an owned future whose result is handed back to
//! [`StreamSourceResolver::apply`].

use std::future::Future;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::errors::{ControlError, PlayerError};
use crate::store::{StoreChangeCallback, StoreSubscription, StreamSourceStore};

/// Accepted shapes of the stored value.
#[derive(Deserialize)]
#[serde(untagged)]
enum StreamSourceValue {
    Url(String),
    Entry { url: String },
}

/// Extracts the stream URL from a stored value.
///
/// An empty string is a valid "unconfigured" value. Anything that is not a
/// string or a mapping with a string `url` field is rejected.
pub fn parse_stream_source(value: Value) -> Result<String, ControlError> {
    let url = match serde_json::from_value::<StreamSourceValue>(value) {
        Ok(StreamSourceValue::Url(url)) | Ok(StreamSourceValue::Entry { url }) => url,
        Err(_) => {
            return Err(ControlError::invalid_source(
                "expected a URL string or an object with a `url` field",
            ));
        }
    };

    let url = url.trim().to_string();
    if !url.is_empty() {
        Url::parse(&url).map_err(|e| ControlError::InvalidUrl(url.clone(), e))?;
    }
    Ok(url)
}

/// Outcome of applying a store query result.
#[derive(Clone, Debug, PartialEq)]
pub enum SourceUpdate {
    /// The store holds the URL already cached.
    Unchanged,
    Changed { previous: String, current: String },
    /// Nothing stored; the cached URL is kept.
    Absent,
    /// The query failed; the cached URL is kept.
    Failed(PlayerError),
}

pub struct StreamSourceResolver {
    store: Arc<dyn StreamSourceStore>,
    category: String,
    key: String,
    current: String,
    subscription: Option<StoreSubscription>,
}

impl StreamSourceResolver {
    pub fn new(store: Arc<dyn StreamSourceStore>, category: &str, key: &str) -> Self {
        Self {
            store,
            category: category.to_string(),
            key: key.to_string(),
            current: String::new(),
            subscription: None,
        }
    }

    /// Cached URL, empty when unconfigured.
    pub fn current(&self) -> &str {
        &self.current
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    /// Queries the store. The future does not borrow the resolver.
    pub fn load_stream_url(
        &self,
    ) -> impl Future<Output = Result<Option<String>, ControlError>> + Send + 'static {
        let store = Arc::clone(&self.store);
        let category = self.category.clone();
        let key = self.key.clone();
        async move {
            match store.get(&category, &key).await? {
                Some(value) => parse_stream_source(value).map(Some),
                None => Ok(None),
            }
        }
    }

    /// Stores the result of [`load_stream_url`](Self::load_stream_url).
    pub fn apply(&mut self, result: Result<Option<String>, ControlError>) -> SourceUpdate {
        match result {
            Ok(Some(url)) if url == self.current => SourceUpdate::Unchanged,
            Ok(Some(url)) => {
                debug!(previous = %self.current, current = %url, "Stream URL updated");
                let previous = std::mem::replace(&mut self.current, url.clone());
                SourceUpdate::Changed {
                    previous,
                    current: url,
                }
            }
            Ok(None) => SourceUpdate::Absent,
            Err(err) => {
                warn!(category = %self.category, key = %self.key, "Unable to load stream URL: {}", err);
                let error = match err {
                    ControlError::InvalidSource(msg) => PlayerError::InvalidStreamUrl(msg),
                    ControlError::InvalidUrl(url, _) => PlayerError::InvalidStreamUrl(url),
                    other => PlayerError::SourceUnavailable(other.to_string()),
                };
                SourceUpdate::Failed(error)
            }
        }
    }

    /// Opens the change subscription. Returns `Ok(false)` when one is
    /// already open.
    pub fn subscribe_to_changes(&mut self, callback: StoreChangeCallback) -> Result<bool, ControlError> {
        if self.subscription.is_some() {
            return Ok(false);
        }
        let subscription = self.store.on_change(&self.category, &self.key, callback)?;
        self.subscription = Some(subscription);
        Ok(true)
    }

    pub fn unsubscribe(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            debug!(category = %self.category, key = %self.key, "Closing stream source subscription");
            subscription.unsubscribe();
        }
    }
}

impl Drop for StreamSourceResolver {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
