//! Host environment signals: visibility, connectivity and the system
//! remote-control surface.

use std::sync::Arc;

use tracing::{debug, info};

use crate::model::NowPlaying;
use crate::supervisor::TriggerReason;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvironmentSignal {
    /// `true` when the host became visible.
    VisibilityChanged(bool),
    Online,
    Offline,
}

/// Action requested from the system remote-control affordance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoteAction {
    Play,
    Pause,
    Stop,
}

pub type RemoteActionHandler = Arc<dyn Fn(RemoteAction) + Send + Sync>;

/// System-level "now playing" surface (lock screen, media keys…).
pub trait RemoteControlSurface: Send + Sync {
    fn register(&self, handler: RemoteActionHandler);

    fn unregister(&self);

    fn set_now_playing(&self, now_playing: &NowPlaying);
}

/// What the controller must do after a signal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BridgeAction {
    Nothing,
    Trigger(TriggerReason),
    WentOffline,
    CameOnline { reconnect: bool },
}

/// Tracks visibility and connectivity, and turns transitions into actions.
#[derive(Debug)]
pub struct EnvironmentBridge {
    visible: bool,
    online: bool,
}

impl Default for EnvironmentBridge {
    fn default() -> Self {
        Self {
            visible: true,
            online: true,
        }
    }
}

impl EnvironmentBridge {
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    /// `intent` and `primitive_paused` describe the player when the signal
    /// arrives. Repeated signals with no transition yield `Nothing`.
    pub fn on_signal(
        &mut self,
        signal: EnvironmentSignal,
        intent: bool,
        primitive_paused: bool,
    ) -> BridgeAction {
        match signal {
            EnvironmentSignal::VisibilityChanged(visible) => {
                let was_visible = std::mem::replace(&mut self.visible, visible);
                debug!(visible, "Visibility changed");
                if visible && !was_visible && intent && primitive_paused && self.online {
                    BridgeAction::Trigger(TriggerReason::Foreground)
                } else {
                    BridgeAction::Nothing
                }
            }
            EnvironmentSignal::Offline => {
                if !self.online {
                    return BridgeAction::Nothing;
                }
                info!("Network went offline");
                self.online = false;
                BridgeAction::WentOffline
            }
            EnvironmentSignal::Online => {
                if self.online {
                    return BridgeAction::Nothing;
                }
                info!("Network is back online");
                self.online = true;
                BridgeAction::CameOnline {
                    reconnect: intent && primitive_paused,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_foreground_trigger_requires_transition() {
        let mut bridge = EnvironmentBridge::default();
        assert_eq!(
            bridge.on_signal(EnvironmentSignal::VisibilityChanged(true), true, true),
            BridgeAction::Nothing
        );
        bridge.on_signal(EnvironmentSignal::VisibilityChanged(false), true, true);
        assert_eq!(
            bridge.on_signal(EnvironmentSignal::VisibilityChanged(true), true, true),
            BridgeAction::Trigger(TriggerReason::Foreground)
        );
    }

    #[test]
    fn test_foreground_needs_intent_and_paused() {
        let mut bridge = EnvironmentBridge::default();
        bridge.on_signal(EnvironmentSignal::VisibilityChanged(false), false, true);
        assert_eq!(
            bridge.on_signal(EnvironmentSignal::VisibilityChanged(true), false, true),
            BridgeAction::Nothing
        );
        bridge.on_signal(EnvironmentSignal::VisibilityChanged(false), true, false);
        assert_eq!(
            bridge.on_signal(EnvironmentSignal::VisibilityChanged(true), true, false),
            BridgeAction::Nothing
        );
    }

    #[test]
    fn test_connectivity_transitions() {
        let mut bridge = EnvironmentBridge::default();
        assert_eq!(bridge.on_signal(EnvironmentSignal::Online, true, true), BridgeAction::Nothing);
        assert_eq!(
            bridge.on_signal(EnvironmentSignal::Offline, true, true),
            BridgeAction::WentOffline
        );
        assert_eq!(bridge.on_signal(EnvironmentSignal::Offline, true, true), BridgeAction::Nothing);
        assert!(!bridge.is_online());

        // No foreground trigger while offline
        bridge.on_signal(EnvironmentSignal::VisibilityChanged(false), true, true);
        assert_eq!(
            bridge.on_signal(EnvironmentSignal::VisibilityChanged(true), true, true),
            BridgeAction::Nothing
        );

        assert_eq!(
            bridge.on_signal(EnvironmentSignal::Online, true, true),
            BridgeAction::CameOnline { reconnect: true }
        );
    }
}
