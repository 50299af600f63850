//! The media-playback primitive seam.
//!
//! A primitive is the object that actually pulls audio from a URL. The
//! controller owns exactly one at a time and recreates it for every
//! reconnection attempt. Primitives report what happens to them through a
//! [`MediaEventSink`]; every event is stamped with the generation of the
//! instance that emitted it so the controller can drop events coming from
//! instances it already discarded.

use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::errors::StartError;

/// How much media data the primitive holds, in increasing order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReadyState {
    #[default]
    HaveNothing,
    HaveMetadata,
    HaveCurrentData,
    HaveFutureData,
    HaveEnoughData,
}

impl ReadyState {
    /// At least "future data": playback can proceed without stalling.
    pub fn has_future_data(&self) -> bool {
        *self >= ReadyState::HaveFutureData
    }
}

/// Reason code carried by [`MediaEvent::Errored`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ErrorReason {
    /// The platform refused to start without a user gesture.
    NotAllowed,
    Network(String),
    Http(u16),
    Decode(String),
    Other(String),
}

impl ErrorReason {
    pub fn is_permission(&self) -> bool {
        matches!(self, ErrorReason::NotAllowed)
    }

    pub fn describe(&self) -> String {
        match self {
            ErrorReason::NotAllowed => "playback not allowed".to_string(),
            ErrorReason::Network(msg) => format!("network error: {msg}"),
            ErrorReason::Http(status) => format!("HTTP status {status}"),
            ErrorReason::Decode(msg) => format!("decode error: {msg}"),
            ErrorReason::Other(msg) => msg.clone(),
        }
    }
}

impl From<&StartError> for ErrorReason {
    fn from(err: &StartError) -> Self {
        match err {
            StartError::NotAllowed(_) => ErrorReason::NotAllowed,
            StartError::Network(msg) => ErrorReason::Network(msg.clone()),
            StartError::Http(status) => ErrorReason::Http(*status),
            StartError::Unsupported(msg) => ErrorReason::Decode(msg.clone()),
            StartError::Aborted => ErrorReason::Other("start aborted".to_string()),
        }
    }
}

/// Events reported by a playback primitive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MediaEvent {
    Started,
    Stopped,
    Errored(ErrorReason),
    BufferingBegan,
    BufferingResolved,
    Ended,
    StreamAborted,
    /// In-band title announced by the stream (ICY `StreamTitle`).
    StreamTitle(String),
}

/// Result of [`MediaPrimitive::start`].
pub type StartFuture = BoxFuture<'static, Result<(), StartError>>;

/// An audio playback object pointed at a single URL.
///
/// Methods other than `start` are synchronous and must not block.
pub trait MediaPrimitive: Send {
    fn assign_source(&mut self, url: &str);

    fn source(&self) -> Option<&str>;

    /// Prepares the primitive for a new source without starting playback.
    fn load(&mut self);

    /// Starts playback. The returned future resolves once playback has
    /// begun or definitively failed; it must not borrow `self`.
    fn start(&mut self) -> StartFuture;

    fn stop(&mut self);

    fn volume(&self) -> f32;

    fn set_volume(&mut self, volume: f32);

    fn ready_state(&self) -> ReadyState;

    fn is_paused(&self) -> bool;
}

/// Builds fresh primitive instances bound to an event sink.
pub trait MediaFactory: Send + Sync {
    fn create(&self, sink: MediaEventSink) -> Box<dyn MediaPrimitive>;
}

/// Event channel handed to each primitive instance.
#[derive(Clone, Debug)]
pub struct MediaEventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, MediaEvent)>,
}

impl MediaEventSink {
    /// The controller builds one per primitive; exposed for driving a
    /// primitive on its own.
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<(u64, MediaEvent)>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Reports an event. Returns false once the controller is gone.
    pub fn emit(&self, event: MediaEvent) -> bool {
        self.tx.send((self.generation, event)).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_state_ordering() {
        assert!(!ReadyState::HaveNothing.has_future_data());
        assert!(!ReadyState::HaveCurrentData.has_future_data());
        assert!(ReadyState::HaveFutureData.has_future_data());
        assert!(ReadyState::HaveEnoughData.has_future_data());
    }

    #[test]
    fn test_start_error_reason() {
        let reason = ErrorReason::from(&StartError::NotAllowed("gesture".into()));
        assert!(reason.is_permission());
        assert_eq!(ErrorReason::from(&StartError::Http(404)), ErrorReason::Http(404));
    }

    #[tokio::test]
    async fn test_sink_stamps_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = MediaEventSink::new(7, tx);
        assert!(sink.emit(MediaEvent::Started));
        assert_eq!(rx.recv().await, Some((7, MediaEvent::Started)));

        drop(rx);
        assert!(sink.is_closed());
        assert!(!sink.emit(MediaEvent::Stopped));
    }
}
