use std::fmt;

use crate::errors::PlayerError;

/// Condition of the playback primitive as seen by the controller.
///
/// Exactly one value holds at any time; only the controller task writes it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PlaybackState {
    #[default]
    Idle,
    Loading,
    Playing,
    Paused,
    Reconnecting,
    Failed,
}

impl PlaybackState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Loading => "loading",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Reconnecting => "reconnecting",
            PlaybackState::Failed => "failed",
        }
    }

    /// States in which `toggle_play` pauses.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            PlaybackState::Loading | PlaybackState::Playing | PlaybackState::Reconnecting
        )
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase of the reconnection supervisor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SupervisorPhase {
    #[default]
    Stable,
    Reconnecting,
    GivenUp,
}

impl fmt::Display for SupervisorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SupervisorPhase::Stable => "stable",
            SupervisorPhase::Reconnecting => "reconnecting",
            SupervisorPhase::GivenUp => "given-up",
        })
    }
}

/// Everything the UI needs to render the player, published after each
/// message the controller handles.
#[derive(Clone, Debug, PartialEq)]
pub struct PlayerSnapshot {
    pub stream_url: String,
    pub state: PlaybackState,
    pub is_loading: bool,
    pub volume: f32,
    pub error: Option<PlayerError>,
    /// Last explicit user choice: true after `play()`, false after `pause()`.
    pub intent: bool,
    pub supervisor: SupervisorPhase,
    pub retry_count: u32,
    pub online: bool,
    /// Title announced in-band by the stream, if any.
    pub now_playing: Option<String>,
}

impl Default for PlayerSnapshot {
    fn default() -> Self {
        Self {
            stream_url: String::new(),
            state: PlaybackState::Idle,
            is_loading: false,
            volume: 1.0,
            error: None,
            intent: false,
            supervisor: SupervisorPhase::Stable,
            retry_count: 0,
            online: true,
            now_playing: None,
        }
    }
}

impl PlayerSnapshot {
    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }
}

/// What the host's "now playing" surface displays.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NowPlaying {
    pub stream_url: String,
    pub title: Option<String>,
    pub playing: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_states() {
        assert!(PlaybackState::Playing.is_active());
        assert!(PlaybackState::Loading.is_active());
        assert!(PlaybackState::Reconnecting.is_active());
        assert!(!PlaybackState::Paused.is_active());
        assert!(!PlaybackState::Idle.is_active());
        assert!(!PlaybackState::Failed.is_active());
    }

    #[test]
    fn test_snapshot_helpers() {
        let mut snapshot = PlayerSnapshot::default();
        assert!(!snapshot.is_playing());
        assert_eq!(snapshot.error_message(), None);

        snapshot.state = PlaybackState::Playing;
        snapshot.error = Some(PlayerError::Offline);
        assert!(snapshot.is_playing());
        assert_eq!(snapshot.error_message().as_deref(), Some("No network connection"));
    }
}
