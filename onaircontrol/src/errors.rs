use thiserror::Error;

/// Errors surfaced to the listener through `PlayerSnapshot::error`.
///
/// The `Display` output is the message shown to the user.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlayerError {
    /// No stream URL configured; nothing to do until the configuration changes.
    #[error("No stream is configured")]
    NotConfigured,
    /// The configured value is not a usable URL.
    #[error("The configured stream URL is invalid: {0}")]
    InvalidStreamUrl(String),
    /// The platform refused to start audio without a user gesture.
    #[error("Playback was blocked, tap to start")]
    PlaybackBlocked,
    /// Connection dropped, stalled or ended; recovery is in progress.
    #[error("Stream interrupted: {0}")]
    Stream(String),
    /// The reconnection ceiling was reached.
    #[error("Connection lost. Press play to try again")]
    RetriesExhausted,
    /// The device reports no network connectivity.
    #[error("No network connection")]
    Offline,
    /// The configuration store could not be queried. The previous URL is kept.
    #[error("Unable to load the stream URL: {0}")]
    SourceUnavailable(String),
}

impl PlayerError {
    /// True for errors the controller recovers from on its own.
    pub fn is_transient(&self) -> bool {
        matches!(self, PlayerError::Stream(_) | PlayerError::Offline)
    }

    /// True for errors that need a human decision (a tap, a config change).
    pub fn needs_user_action(&self) -> bool {
        matches!(
            self,
            PlayerError::NotConfigured
                | PlayerError::InvalidStreamUrl(_)
                | PlayerError::PlaybackBlocked
                | PlayerError::RetriesExhausted
        )
    }
}

/// Failure reported by a playback primitive's `start()`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StartError {
    #[error("start not allowed: {0}")]
    NotAllowed(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP status {0}")]
    Http(u16),
    #[error("unsupported source: {0}")]
    Unsupported(String),
    #[error("start aborted")]
    Aborted,
}

impl StartError {
    /// Gesture/permission rejections are never retried automatically.
    pub fn is_permission(&self) -> bool {
        matches!(self, StartError::NotAllowed(_))
    }
}

/// Errors returned by the controller API itself.
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Stream controller is no longer running")]
    ControllerClosed,
    #[error("Configuration store error: {0}")]
    Store(#[from] anyhow::Error),
    #[error("Invalid stream source: {0}")]
    InvalidSource(String),
    #[error("Invalid stream URL {0}: {1}")]
    InvalidUrl(String, #[source] url::ParseError),
}

impl ControlError {
    pub fn invalid_source(message: &str) -> Self {
        ControlError::InvalidSource(message.to_string())
    }
}
