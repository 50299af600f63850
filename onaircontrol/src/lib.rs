//! # onaircontrol - Live radio stream playback control
//!
//! Keeps a continuous audio connection alive against a long-lived HTTP/ICY
//! radio stream and exposes a small play/pause/volume surface.
//!
//! ## Architecture
//!
//! ```text
//! StreamController (handle)
//!   └─ controller task (single owner of all state)
//!        ├─ StreamSourceResolver   stream URL from the configuration store
//!        ├─ MediaPrimitive         recreated on every reconnection attempt
//!        ├─ ReconnectSupervisor    bounded retries, cache-busted URLs
//!        ├─ LivenessWatchdog       silent stops, stuck buffering
//!        └─ EnvironmentBridge      visibility, connectivity, remote control
//! ```
//!
//! The controller is driven through [`StreamController`] and observed through
//! a `tokio::sync::watch` channel of [`PlayerSnapshot`]s.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use onairconfig::get_config;
//! use onaircontrol::{IcyStreamFactory, PlayerConfigExt, StreamController};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = get_config();
//! let factory = Arc::new(IcyStreamFactory::new(config.get_icy_options())?);
//! let controller =
//!     StreamController::start(config.get_player_settings(), config.clone(), factory, None).await?;
//!
//! controller.play().await?;
//! let mut updates = controller.subscribe();
//! while updates.changed().await.is_ok() {
//!     println!("{:?}", updates.borrow().state);
//! }
//! # Ok(())
//! # }
//! ```

pub mod constants;
pub mod controller;
pub mod environment;
pub mod errors;
pub mod model;
pub mod primitive;
pub mod resolver;
pub mod settings;
pub mod store;
pub mod supervisor;
pub mod watchdog;

#[cfg(feature = "onairconfig")]
pub mod config_ext;

#[cfg(feature = "icy")]
pub mod icy;

pub use controller::StreamController;
pub use environment::{
    EnvironmentSignal, RemoteAction, RemoteActionHandler, RemoteControlSurface,
};
pub use errors::{ControlError, PlayerError, StartError};
pub use model::{NowPlaying, PlaybackState, PlayerSnapshot, SupervisorPhase};
pub use primitive::{
    ErrorReason, MediaEvent, MediaEventSink, MediaFactory, MediaPrimitive, ReadyState, StartFuture,
};
pub use resolver::{SourceUpdate, StreamSourceResolver};
pub use settings::PlayerSettings;
pub use store::{StoreChangeCallback, StoreSubscription, StreamSourceStore};
pub use supervisor::{ReconnectPolicy, SupervisorDecision, TriggerReason};

#[cfg(feature = "onairconfig")]
pub use config_ext::PlayerConfigExt;

#[cfg(feature = "icy")]
pub use icy::{IcyOptions, IcyStreamFactory, IcyStreamPrimitive};
