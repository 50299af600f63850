//! The stream controller actor.
//!
//! [`StreamController`] is a cheap handle; all state lives in a single tokio
//! task that multiplexes commands, primitive events, store results and the
//! two timers it owns (the watchdog interval and the reconnection delay).
//! Only that task writes the playback state, the intent flag and the retry
//! counter.

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep, sleep};
use tracing::{debug, error, info, warn};

use crate::environment::{
    BridgeAction, EnvironmentBridge, EnvironmentSignal, RemoteAction, RemoteActionHandler,
    RemoteControlSurface,
};
use crate::errors::{ControlError, PlayerError, StartError};
use crate::model::{NowPlaying, PlaybackState, PlayerSnapshot, SupervisorPhase};
use crate::primitive::{
    MediaEvent, MediaEventSink, MediaFactory, MediaPrimitive, ReadyState, StartFuture,
};
use crate::resolver::{SourceUpdate, StreamSourceResolver};
use crate::settings::{PlayerSettings, clamp_volume};
use crate::store::StreamSourceStore;
use crate::supervisor::{
    CacheBuster, ReconnectPolicy, ReconnectSupervisor, SupervisorDecision, TriggerReason,
};
use crate::watchdog::{LivenessWatchdog, Observation, Verdict};

const COMMAND_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug)]
enum Command {
    Play,
    Pause,
    TogglePlay,
    SetVolume(f32),
    Refresh(oneshot::Sender<SourceUpdate>),
    Signal(EnvironmentSignal),
    Remote(RemoteAction),
    Sync(oneshot::Sender<()>),
    Dispose(oneshot::Sender<()>),
}

/// Messages produced inside the controller (store change feed).
#[derive(Debug)]
enum Internal {
    SourceChanged,
}

type LoadResult = (
    u64,
    Result<Option<String>, ControlError>,
    Option<oneshot::Sender<SourceUpdate>>,
);

enum StartOutcome {
    Finished(Result<(), StartError>),
    TimedOut,
}

struct PendingStart {
    generation: u64,
    future: StartFuture,
    deadline: Pin<Box<Sleep>>,
}

struct ReconnectTimer {
    attempt: u32,
    sleep: Pin<Box<Sleep>>,
}

/// Handle on a running stream controller.
pub struct StreamController {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<PlayerSnapshot>,
    join_handle: JoinHandle<()>,
}

impl StreamController {
    /// Loads the stream URL, subscribes to its changes and spawns the
    /// controller task.
    ///
    /// A failing store query is not fatal: the controller starts without a
    /// URL and reports the failure in its snapshot. Failing to subscribe to
    /// the change feed is.
    pub async fn start(
        settings: PlayerSettings,
        store: Arc<dyn StreamSourceStore>,
        factory: Arc<dyn MediaFactory>,
        remote: Option<Arc<dyn RemoteControlSurface>>,
    ) -> Result<Self, ControlError> {
        let settings = settings.sanitized();
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (media_tx, media_rx) = mpsc::unbounded_channel();

        let mut resolver =
            StreamSourceResolver::new(store, &settings.source_category, &settings.source_key);
        let change_tx = internal_tx.clone();
        resolver.subscribe_to_changes(Arc::new(move || {
            let _ = change_tx.send(Internal::SourceChanged);
        }))?;

        let initial = resolver.load_stream_url().await;
        let mut initial_error = None;
        if let SourceUpdate::Failed(err) = resolver.apply(initial) {
            initial_error = Some(err);
        }

        if let Some(remote) = &remote {
            let weak = command_tx.downgrade();
            let handler: RemoteActionHandler = Arc::new(move |action| {
                if let Some(tx) = weak.upgrade() {
                    if let Err(err) = tx.try_send(Command::Remote(action)) {
                        warn!(?action, "Dropping remote action: {}", err);
                    }
                }
            });
            remote.register(handler);
        }

        let volume = settings.initial_volume;
        let mut task = ControllerTask {
            supervisor: ReconnectSupervisor::new(ReconnectPolicy::from_settings(&settings)),
            watchdog: LivenessWatchdog::new(settings.stuck_buffering_after),
            bridge: EnvironmentBridge::default(),
            cache_buster: CacheBuster::default(),
            settings,
            factory,
            remote,
            resolver,
            primitive: None,
            generation: 0,
            media_tx,
            pending_start: None,
            reconnect: None,
            watchdog_timer: None,
            loads: FuturesUnordered::new(),
            load_seq: 0,
            applied_load: 0,
            state: PlaybackState::Idle,
            intent: false,
            is_loading: false,
            volume,
            deferred_start: false,
            error: initial_error,
            now_playing: None,
            last_now_playing: None,
            snapshot_tx: watch::Sender::new(PlayerSnapshot::default()),
            disposed: false,
        };
        task.publish();
        let snapshot = task.snapshot_tx.subscribe();

        info!(url = %task.resolver.current(), "Starting stream controller");
        let join_handle = tokio::spawn(task.run(command_rx, internal_rx, media_rx));

        Ok(Self {
            commands: command_tx,
            snapshot,
            join_handle,
        })
    }

    async fn send(&self, command: Command) -> Result<(), ControlError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ControlError::ControllerClosed)
    }

    pub async fn play(&self) -> Result<(), ControlError> {
        self.send(Command::Play).await
    }

    pub async fn pause(&self) -> Result<(), ControlError> {
        self.send(Command::Pause).await
    }

    pub async fn toggle_play(&self) -> Result<(), ControlError> {
        self.send(Command::TogglePlay).await
    }

    /// Sets the volume, clamped to [0, 1].
    pub async fn set_volume(&self, level: f32) -> Result<(), ControlError> {
        self.send(Command::SetVolume(level)).await
    }

    /// Re-reads the stream URL from the store and waits for the result.
    pub async fn refresh_stream_url(&self) -> Result<SourceUpdate, ControlError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Refresh(tx)).await?;
        rx.await.map_err(|_| ControlError::ControllerClosed)
    }

    pub async fn signal(&self, signal: EnvironmentSignal) -> Result<(), ControlError> {
        self.send(Command::Signal(signal)).await
    }

    pub async fn remote(&self, action: RemoteAction) -> Result<(), ControlError> {
        self.send(Command::Remote(action)).await
    }

    /// Resolves once every command sent before it, and every event already
    /// queued by the primitive, has been handled.
    pub async fn sync(&self) -> Result<(), ControlError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Sync(tx)).await?;
        rx.await.map_err(|_| ControlError::ControllerClosed)
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlayerSnapshot> {
        self.snapshot.clone()
    }

    /// Tears the controller down and waits for its task to end.
    pub async fn dispose(self) -> Result<(), ControlError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Dispose(tx)).await?;
        let _ = rx.await;
        if let Err(err) = self.join_handle.await {
            if err.is_cancelled() {
                warn!("Stream controller task cancelled: {err}");
            } else {
                error!("Stream controller task failed: {err}");
            }
        }
        Ok(())
    }
}

struct ControllerTask {
    settings: PlayerSettings,
    factory: Arc<dyn MediaFactory>,
    remote: Option<Arc<dyn RemoteControlSurface>>,
    resolver: StreamSourceResolver,
    supervisor: ReconnectSupervisor,
    watchdog: LivenessWatchdog,
    bridge: EnvironmentBridge,
    cache_buster: CacheBuster,

    primitive: Option<Box<dyn MediaPrimitive>>,
    generation: u64,
    media_tx: mpsc::UnboundedSender<(u64, MediaEvent)>,

    pending_start: Option<PendingStart>,
    reconnect: Option<ReconnectTimer>,
    watchdog_timer: Option<Interval>,
    loads: FuturesUnordered<BoxFuture<'static, LoadResult>>,
    load_seq: u64,
    applied_load: u64,

    state: PlaybackState,
    intent: bool,
    is_loading: bool,
    volume: f32,
    /// Play was requested while offline; start as soon as the network is back.
    deferred_start: bool,
    error: Option<PlayerError>,
    now_playing: Option<String>,
    last_now_playing: Option<NowPlaying>,

    snapshot_tx: watch::Sender<PlayerSnapshot>,
    disposed: bool,
}

async fn await_start(slot: &mut Option<PendingStart>) -> (u64, StartOutcome) {
    match slot {
        Some(start) => {
            let generation = start.generation;
            tokio::select! {
                result = &mut start.future => (generation, StartOutcome::Finished(result)),
                _ = &mut start.deadline => (generation, StartOutcome::TimedOut),
            }
        }
        None => pending().await,
    }
}

async fn reconnect_due(timer: &mut Option<ReconnectTimer>) -> u32 {
    match timer {
        Some(timer) => {
            (&mut timer.sleep).await;
            timer.attempt
        }
        None => pending().await,
    }
}

async fn watchdog_tick(timer: &mut Option<Interval>) -> Instant {
    match timer {
        Some(interval) => interval.tick().await,
        None => pending().await,
    }
}

impl ControllerTask {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
        mut media: mpsc::UnboundedReceiver<(u64, MediaEvent)>,
    ) {
        // Internal work and primitive events always win over new commands so
        // a command observes every event queued before it.
        loop {
            tokio::select! {
                biased;

                Some(message) = internal.recv() => self.handle_internal(message),
                Some((seq, result, ack)) = self.loads.next(), if !self.loads.is_empty() => {
                    self.handle_source_loaded(seq, result, ack);
                }
                Some((generation, event)) = media.recv() => self.handle_media_event(generation, event),
                (generation, outcome) = await_start(&mut self.pending_start) => {
                    self.pending_start = None;
                    self.handle_start_outcome(generation, outcome);
                }
                attempt = reconnect_due(&mut self.reconnect) => {
                    self.reconnect = None;
                    self.handle_reconnect_due(attempt);
                }
                now = watchdog_tick(&mut self.watchdog_timer) => self.handle_watchdog_tick(now),
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("All controller handles dropped");
                        self.dispose();
                    }
                },
            }

            self.publish();
            if self.disposed {
                break;
            }
        }

        info!("Stream controller stopped");
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    fn handle_command(&mut self, command: Command) {
        debug!(?command, state = %self.state, "Controller command");
        match command {
            Command::Play => self.play(),
            Command::Pause => self.pause(),
            Command::TogglePlay => {
                if self.state.is_active() {
                    self.pause();
                } else {
                    self.play();
                }
            }
            Command::SetVolume(level) => self.set_volume(level),
            Command::Refresh(ack) => self.request_load(Some(ack)),
            Command::Signal(signal) => self.handle_signal(signal),
            Command::Remote(action) => match action {
                RemoteAction::Play => self.play(),
                RemoteAction::Pause | RemoteAction::Stop => self.pause(),
            },
            Command::Sync(ack) => {
                let _ = ack.send(());
            }
            Command::Dispose(ack) => {
                self.dispose();
                let _ = ack.send(());
            }
        }
    }

    fn play(&mut self) {
        if self.supervisor.reset_after_give_up() {
            self.error = None;
        }

        let url = self.resolver.current().to_string();
        if url.is_empty() {
            warn!("Play requested without a configured stream");
            self.state = PlaybackState::Idle;
            self.is_loading = false;
            self.error = Some(PlayerError::NotConfigured);
            return;
        }

        self.intent = true;
        self.deferred_start = false;

        if !self.bridge.is_online() {
            self.error = Some(PlayerError::Offline);
            self.deferred_start = !self.supervisor.is_reconnecting();
            return;
        }
        if self.pending_start.is_some() || self.supervisor.is_reconnecting() {
            debug!("Playback already being established");
            return;
        }
        if self.state == PlaybackState::Playing && !self.primitive_paused() {
            return;
        }

        if self.primitive.is_none() {
            self.create_primitive(&url);
        }
        self.error = None;
        self.state = PlaybackState::Loading;
        self.is_loading = true;
        self.begin_start();
    }

    fn pause(&mut self) {
        self.intent = false;
        self.deferred_start = false;
        self.reconnect = None;
        self.supervisor.cancel();
        self.pending_start = None;
        self.disarm_watchdog();
        if let Some(primitive) = self.primitive.as_mut() {
            primitive.stop();
        }
        self.is_loading = false;
        if self.state != PlaybackState::Idle {
            self.state = PlaybackState::Paused;
        }
    }

    fn set_volume(&mut self, level: f32) {
        let volume = clamp_volume(level);
        self.volume = volume;
        if let Some(primitive) = self.primitive.as_mut() {
            primitive.set_volume(volume);
        }
    }

    fn handle_signal(&mut self, signal: EnvironmentSignal) {
        let paused = self.primitive_paused();
        match self.bridge.on_signal(signal, self.intent, paused) {
            BridgeAction::Nothing => {}
            BridgeAction::Trigger(reason) => self.request_reconnect(reason),
            BridgeAction::WentOffline => self.go_offline(),
            BridgeAction::CameOnline { reconnect } => {
                if self.error == Some(PlayerError::Offline) {
                    self.error = None;
                }
                if std::mem::take(&mut self.deferred_start) && self.intent {
                    debug!("Network back, starting deferred playback");
                    self.play();
                } else if reconnect {
                    self.request_reconnect(TriggerReason::NetworkRestored);
                }
            }
        }
    }

    /// Reports the missing network unless a pending error still waits for
    /// the user.
    fn report_offline(&mut self) {
        if !self.error.as_ref().is_some_and(PlayerError::needs_user_action) {
            self.error = Some(PlayerError::Offline);
        }
    }

    fn go_offline(&mut self) {
        self.report_offline();

        let recovering = self.supervisor.is_reconnecting() || self.pending_start.is_some();
        if !recovering {
            return;
        }
        // Nothing to gain from attempts against a missing network.
        self.reconnect = None;
        self.pending_start = None;
        self.supervisor.cancel();
        if let Some(primitive) = self.primitive.as_mut() {
            primitive.stop();
        }
        self.is_loading = false;
        self.state = PlaybackState::Paused;
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        info!("Disposing stream controller");
        self.disarm_watchdog();
        self.reconnect = None;
        self.resolver.unsubscribe();
        self.pending_start = None;
        self.discard_primitive();
        if let Some(remote) = &self.remote {
            remote.unregister();
        }
        self.supervisor.cancel();
        self.intent = false;
        self.deferred_start = false;
        self.is_loading = false;
        if self.state != PlaybackState::Idle {
            self.state = PlaybackState::Paused;
        }
        self.disposed = true;
    }

    // ------------------------------------------------------------------
    // Stream source
    // ------------------------------------------------------------------

    fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::SourceChanged => {
                debug!("Stream source changed in store");
                self.request_load(None);
            }
        }
    }

    fn request_load(&mut self, ack: Option<oneshot::Sender<SourceUpdate>>) {
        self.load_seq += 1;
        let seq = self.load_seq;
        let load = self.resolver.load_stream_url();
        self.loads.push(async move { (seq, load.await, ack) }.boxed());
    }

    fn handle_source_loaded(
        &mut self,
        seq: u64,
        result: Result<Option<String>, ControlError>,
        ack: Option<oneshot::Sender<SourceUpdate>>,
    ) {
        let update = if seq <= self.applied_load {
            debug!(seq, applied = self.applied_load, "Dropping outdated store result");
            SourceUpdate::Unchanged
        } else {
            self.applied_load = seq;
            self.resolver.apply(result)
        };

        match &update {
            SourceUpdate::Changed { current, .. } => {
                let current = current.clone();
                self.on_url_changed(&current);
            }
            SourceUpdate::Failed(err) => self.error = Some(err.clone()),
            SourceUpdate::Unchanged | SourceUpdate::Absent => {}
        }

        if let Some(ack) = ack {
            let _ = ack.send(update);
        }
    }

    fn on_url_changed(&mut self, url: &str) {
        if url.is_empty() {
            info!("Stream URL cleared");
            self.reconnect = None;
            self.supervisor.cancel();
            self.pending_start = None;
            self.disarm_watchdog();
            self.discard_primitive();
            self.intent = false;
            self.deferred_start = false;
            self.is_loading = false;
            self.state = PlaybackState::Idle;
            self.error = Some(PlayerError::NotConfigured);
            return;
        }

        if matches!(
            self.error,
            Some(PlayerError::NotConfigured)
                | Some(PlayerError::InvalidStreamUrl(_))
                | Some(PlayerError::SourceUnavailable(_))
        ) {
            self.error = None;
        }

        if self.intent && self.state.is_active() {
            info!(url = %url, "Switching to new stream URL");
            self.reconnect = None;
            self.supervisor.cancel();
            self.pending_start = None;
            self.discard_primitive();
            if !self.bridge.is_online() {
                self.state = PlaybackState::Paused;
                self.is_loading = false;
                return;
            }
            self.create_primitive(url);
            self.state = PlaybackState::Loading;
            self.is_loading = true;
            self.begin_start();
        } else {
            // Picked up by the next play()
            self.discard_primitive();
        }
    }

    // ------------------------------------------------------------------
    // Primitive
    // ------------------------------------------------------------------

    fn create_primitive(&mut self, url: &str) {
        self.generation += 1;
        let sink = MediaEventSink::new(self.generation, self.media_tx.clone());
        let mut primitive = self.factory.create(sink);
        primitive.assign_source(url);
        primitive.set_volume(self.volume);
        primitive.load();
        debug!(generation = self.generation, url = %url, "Created playback primitive");
        self.primitive = Some(primitive);
        self.now_playing = None;
    }

    fn discard_primitive(&mut self) {
        if let Some(mut primitive) = self.primitive.take() {
            debug!(generation = self.generation, "Discarding playback primitive");
            primitive.stop();
        }
    }

    fn begin_start(&mut self) {
        let Some(primitive) = self.primitive.as_mut() else {
            return;
        };
        self.pending_start = Some(PendingStart {
            generation: self.generation,
            future: primitive.start(),
            deadline: Box::pin(sleep(self.settings.start_timeout)),
        });
    }

    fn primitive_paused(&self) -> bool {
        self.primitive.as_ref().is_none_or(|p| p.is_paused())
    }

    fn handle_start_outcome(&mut self, generation: u64, outcome: StartOutcome) {
        if generation != self.generation {
            return;
        }
        match outcome {
            StartOutcome::Finished(Ok(())) => self.on_started(),
            StartOutcome::Finished(Err(err)) if err.is_permission() => {
                warn!(generation, "Start blocked: {}", err);
                self.on_playback_blocked();
            }
            StartOutcome::Finished(Err(err)) => {
                warn!(generation, "Start failed: {}", err);
                self.on_failure(
                    TriggerReason::StartFailed(err.to_string()),
                    PlaybackState::Idle,
                    true,
                );
            }
            StartOutcome::TimedOut => {
                warn!(generation, timeout = ?self.settings.start_timeout, "Start timed out");
                if let Some(primitive) = self.primitive.as_mut() {
                    primitive.stop();
                }
                self.on_failure(TriggerReason::StartTimedOut, PlaybackState::Idle, true);
            }
        }
    }

    fn handle_media_event(&mut self, generation: u64, event: MediaEvent) {
        if generation != self.generation || self.primitive.is_none() {
            debug!(generation, current = self.generation, ?event, "Ignoring event from discarded primitive");
            return;
        }

        debug!(generation, ?event, state = %self.state, "Media event");
        match event {
            MediaEvent::Started => {
                self.pending_start = None;
                self.on_started();
            }
            MediaEvent::Stopped => {
                self.on_failure(TriggerReason::Stopped, PlaybackState::Paused, false)
            }
            MediaEvent::Errored(reason) if reason.is_permission() => self.on_playback_blocked(),
            MediaEvent::Errored(reason) => self.on_failure(
                TriggerReason::Errored(reason.describe()),
                PlaybackState::Idle,
                true,
            ),
            MediaEvent::Ended => self.on_failure(TriggerReason::Ended, PlaybackState::Idle, true),
            MediaEvent::StreamAborted => {
                self.on_failure(TriggerReason::StreamAborted, PlaybackState::Idle, true)
            }
            MediaEvent::BufferingBegan => {
                if self.state == PlaybackState::Playing {
                    self.state = PlaybackState::Loading;
                }
                if self.state.is_active() {
                    self.is_loading = true;
                }
            }
            MediaEvent::BufferingResolved => self.is_loading = false,
            MediaEvent::StreamTitle(title) => {
                info!(title = %title, "Now playing");
                self.now_playing = Some(title);
            }
        }
    }

    fn on_started(&mut self) {
        if self.state != PlaybackState::Playing {
            info!(generation = self.generation, "Playback started");
        }
        self.state = PlaybackState::Playing;
        self.is_loading = false;
        self.error = None;
        self.reconnect = None;
        self.supervisor.confirm_started();
        if self.intent {
            self.arm_watchdog();
        }
    }

    fn on_playback_blocked(&mut self) {
        self.intent = false;
        self.deferred_start = false;
        self.reconnect = None;
        self.supervisor.cancel();
        self.pending_start = None;
        self.disarm_watchdog();
        self.is_loading = false;
        self.state = PlaybackState::Paused;
        self.error = Some(PlayerError::PlaybackBlocked);
    }

    /// Transient failure reported by the primitive or the start attempt.
    ///
    /// Without intent the controller settles in `idle_state`, reporting the
    /// failure when `report` is set.
    fn on_failure(&mut self, reason: TriggerReason, idle_state: PlaybackState, report: bool) {
        if self.supervisor.attempt_in_flight() {
            self.pending_start = None;
            let decision = self.supervisor.attempt_failed(&reason);
            self.apply_decision(decision, &reason);
            return;
        }
        if self.supervisor.phase() != SupervisorPhase::Stable {
            debug!(%reason, phase = %self.supervisor.phase(), "Failure while recovering, ignored");
            return;
        }

        self.pending_start = None;
        if self.intent && self.bridge.is_online() {
            self.request_reconnect(reason);
            return;
        }

        self.is_loading = false;
        self.state = idle_state;
        if !self.bridge.is_online() {
            self.report_offline();
        } else if report {
            self.error = Some(PlayerError::Stream(reason.to_string()));
        }
    }

    // ------------------------------------------------------------------
    // Reconnection
    // ------------------------------------------------------------------

    fn request_reconnect(&mut self, reason: TriggerReason) {
        if !self.bridge.is_online() {
            debug!(%reason, "Offline, reconnection suppressed");
            return;
        }
        let decision = self.supervisor.trigger(&reason);
        self.apply_decision(decision, &reason);
    }

    fn apply_decision(&mut self, decision: SupervisorDecision, reason: &TriggerReason) {
        match decision {
            SupervisorDecision::Ignored => {}
            SupervisorDecision::Retry { attempt, delay } => {
                info!(attempt, ?delay, %reason, "Scheduling reconnection");
                self.state = PlaybackState::Reconnecting;
                self.is_loading = true;
                self.error = Some(PlayerError::Stream(reason.to_string()));
                self.reconnect = Some(ReconnectTimer {
                    attempt,
                    sleep: Box::pin(sleep(delay)),
                });
            }
            SupervisorDecision::GiveUp => {
                warn!(%reason, "Reconnection abandoned");
                self.reconnect = None;
                self.pending_start = None;
                self.disarm_watchdog();
                self.discard_primitive();
                self.is_loading = false;
                self.state = PlaybackState::Failed;
                self.error = Some(PlayerError::RetriesExhausted);
            }
        }
    }

    fn handle_reconnect_due(&mut self, attempt: u32) {
        if !self.intent || !self.bridge.is_online() {
            self.supervisor.cancel();
            return;
        }
        let base = self.resolver.current().to_string();
        if base.is_empty() {
            self.supervisor.cancel();
            self.state = PlaybackState::Idle;
            self.is_loading = false;
            self.error = Some(PlayerError::NotConfigured);
            return;
        }

        self.supervisor.attempt_started();
        self.discard_primitive();
        let url = self.cache_buster.apply(&base);
        info!(attempt, url = %url, "Reconnection attempt");
        self.create_primitive(&url);
        self.begin_start();
    }

    // ------------------------------------------------------------------
    // Watchdog
    // ------------------------------------------------------------------

    fn arm_watchdog(&mut self) {
        if self.watchdog_timer.is_none() {
            let period = self.settings.watchdog_interval;
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.watchdog_timer = Some(interval);
        }
        self.watchdog.arm();
    }

    fn disarm_watchdog(&mut self) {
        self.watchdog_timer = None;
        self.watchdog.disarm();
    }

    fn handle_watchdog_tick(&mut self, now: Instant) {
        let observation = Observation {
            intent: self.intent,
            online: self.bridge.is_online(),
            recovering: self.supervisor.phase() != SupervisorPhase::Stable
                || self.pending_start.is_some(),
            primitive_paused: self.primitive_paused(),
            ready_state: self
                .primitive
                .as_ref()
                .map(|p| p.ready_state())
                .unwrap_or(ReadyState::HaveNothing),
        };

        match self.watchdog.inspect(observation, now) {
            Verdict::SilentlyStopped => {
                warn!("Watchdog: playback stopped silently");
                self.request_reconnect(TriggerReason::SilentlyStopped);
            }
            Verdict::StuckBuffering { since } => {
                warn!(?since, "Watchdog: stuck buffering");
                self.request_reconnect(TriggerReason::StuckBuffering);
            }
            Verdict::Healthy | Verdict::Skipped => {}
        }
    }

    // ------------------------------------------------------------------
    // Publication
    // ------------------------------------------------------------------

    fn publish(&mut self) {
        let snapshot = PlayerSnapshot {
            stream_url: self.resolver.current().to_string(),
            state: self.state,
            is_loading: self.is_loading,
            volume: self.volume,
            error: self.error.clone(),
            intent: self.intent,
            supervisor: self.supervisor.phase(),
            retry_count: self.supervisor.retry_count(),
            online: self.bridge.is_online(),
            now_playing: self.now_playing.clone(),
        };
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });

        let Some(remote) = &self.remote else {
            return;
        };
        let now_playing = NowPlaying {
            stream_url: self.resolver.current().to_string(),
            title: self.now_playing.clone(),
            playing: self.state == PlaybackState::Playing,
        };
        if self.last_now_playing.as_ref() != Some(&now_playing) {
            remote.set_now_playing(&now_playing);
            self.last_now_playing = Some(now_playing);
        }
    }
}
