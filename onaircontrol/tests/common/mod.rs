//! Scriptable test doubles for the controller integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use onairconfig::Config;
use onaircontrol::{
    MediaEvent, MediaEventSink, MediaFactory, MediaPrimitive, NowPlaying, PlayerConfigExt,
    PlayerSettings, ReadyState, RemoteAction, RemoteActionHandler, RemoteControlSurface,
    StartError, StartFuture, StoreChangeCallback, StoreSubscription, StreamController,
    StreamSourceStore,
};
use serde_json::Value;

pub const STREAM_URL: &str = "https://stream.example/live";

/// How `start()` resolves on primitives created from now on.
#[derive(Clone, Debug)]
pub enum StartScript {
    Succeed,
    Fail(StartError),
    Hang,
}

#[derive(Debug)]
pub struct FakeState {
    pub sources: Vec<String>,
    pub loads: usize,
    pub starts: usize,
    pub stops: usize,
    pub volume: f32,
    pub paused: bool,
    pub ready: ReadyState,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            loads: 0,
            starts: 0,
            stops: 0,
            volume: 1.0,
            paused: true,
            ready: ReadyState::HaveNothing,
        }
    }
}

struct FakeWorld {
    script: StartScript,
    instances: Vec<(Arc<Mutex<FakeState>>, MediaEventSink)>,
}

#[derive(Clone)]
pub struct FakeFactory {
    world: Arc<Mutex<FakeWorld>>,
}

impl Default for FakeFactory {
    fn default() -> Self {
        Self {
            world: Arc::new(Mutex::new(FakeWorld {
                script: StartScript::Succeed,
                instances: Vec::new(),
            })),
        }
    }
}

impl FakeFactory {
    pub fn set_script(&self, script: StartScript) {
        self.world.lock().unwrap().script = script;
    }

    /// Number of primitives created so far.
    pub fn created(&self) -> usize {
        self.world.lock().unwrap().instances.len()
    }

    pub fn state(&self, index: usize) -> Arc<Mutex<FakeState>> {
        self.world.lock().unwrap().instances[index].0.clone()
    }

    pub fn last_state(&self) -> Arc<Mutex<FakeState>> {
        let world = self.world.lock().unwrap();
        world.instances.last().expect("no primitive created").0.clone()
    }

    pub fn sink(&self, index: usize) -> MediaEventSink {
        self.world.lock().unwrap().instances[index].1.clone()
    }

    /// Every source assigned, across all primitives, in order.
    pub fn all_sources(&self) -> Vec<String> {
        let world = self.world.lock().unwrap();
        world
            .instances
            .iter()
            .flat_map(|(state, _)| state.lock().unwrap().sources.clone())
            .collect()
    }

    pub fn last_source(&self) -> String {
        self.last_state().lock().unwrap().sources.last().cloned().unwrap_or_default()
    }

    pub fn total_starts(&self) -> usize {
        let world = self.world.lock().unwrap();
        world.instances.iter().map(|(s, _)| s.lock().unwrap().starts).sum()
    }

    pub fn emit(&self, event: MediaEvent) {
        let sink = {
            let world = self.world.lock().unwrap();
            world.instances.last().expect("no primitive created").1.clone()
        };
        sink.emit(event);
    }

    /// Connection drop as the primitive reports it.
    pub fn drop_connection(&self) {
        self.last_state().lock().unwrap().paused = true;
        self.emit(MediaEvent::Stopped);
    }

    /// Playback stops without any event.
    pub fn pause_silently(&self) {
        self.last_state().lock().unwrap().paused = true;
    }

    pub fn set_ready(&self, ready: ReadyState) {
        self.last_state().lock().unwrap().ready = ready;
    }
}

impl MediaFactory for FakeFactory {
    fn create(&self, sink: MediaEventSink) -> Box<dyn MediaPrimitive> {
        let state = Arc::new(Mutex::new(FakeState::default()));
        self.world
            .lock()
            .unwrap()
            .instances
            .push((state.clone(), sink));
        Box::new(FakePrimitive {
            state,
            world: self.world.clone(),
            source: None,
        })
    }
}

struct FakePrimitive {
    state: Arc<Mutex<FakeState>>,
    world: Arc<Mutex<FakeWorld>>,
    source: Option<String>,
}

impl MediaPrimitive for FakePrimitive {
    fn assign_source(&mut self, url: &str) {
        self.source = Some(url.to_string());
        self.state.lock().unwrap().sources.push(url.to_string());
    }

    fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    fn load(&mut self) {
        self.state.lock().unwrap().loads += 1;
    }

    fn start(&mut self) -> StartFuture {
        let script = self.world.lock().unwrap().script.clone();
        let mut state = self.state.lock().unwrap();
        state.starts += 1;
        match script {
            StartScript::Succeed => {
                state.paused = false;
                state.ready = ReadyState::HaveEnoughData;
                futures::future::ready(Ok(())).boxed()
            }
            StartScript::Fail(err) => futures::future::ready(Err(err)).boxed(),
            StartScript::Hang => futures::future::pending().boxed(),
        }
    }

    fn stop(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.stops += 1;
        state.paused = true;
    }

    fn volume(&self) -> f32 {
        self.state.lock().unwrap().volume
    }

    fn set_volume(&mut self, volume: f32) {
        self.state.lock().unwrap().volume = volume;
    }

    fn ready_state(&self) -> ReadyState {
        self.state.lock().unwrap().ready
    }

    fn is_paused(&self) -> bool {
        self.state.lock().unwrap().paused
    }
}

/// Store whose content only changes through `set`, with optional
/// change notifications and failures.
#[derive(Default)]
pub struct FakeStore {
    value: Mutex<Option<Value>>,
    fail: Mutex<bool>,
    callbacks: Arc<Mutex<Vec<StoreChangeCallback>>>,
}

impl FakeStore {
    pub fn with_value(value: Value) -> Arc<Self> {
        let store = Self::default();
        *store.value.lock().unwrap() = Some(value);
        Arc::new(store)
    }

    /// Replaces the value without notifying subscribers.
    pub fn set_silently(&self, value: Value) {
        *self.value.lock().unwrap() = Some(value);
    }

    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    pub fn subscribers(&self) -> usize {
        self.callbacks.lock().unwrap().len()
    }
}

#[async_trait]
impl StreamSourceStore for FakeStore {
    async fn get(&self, _category: &str, _key: &str) -> anyhow::Result<Option<Value>> {
        if *self.fail.lock().unwrap() {
            anyhow::bail!("store unreachable");
        }
        Ok(self.value.lock().unwrap().clone())
    }

    fn on_change(
        &self,
        _category: &str,
        _key: &str,
        callback: StoreChangeCallback,
    ) -> anyhow::Result<StoreSubscription> {
        self.callbacks.lock().unwrap().push(callback.clone());
        let callbacks = self.callbacks.clone();
        Ok(StoreSubscription::new(move || {
            callbacks
                .lock()
                .unwrap()
                .retain(|cb| !Arc::ptr_eq(cb, &callback));
        }))
    }
}

#[derive(Default)]
pub struct FakeRemote {
    pub handler: Mutex<Option<RemoteActionHandler>>,
    pub unregistered: Mutex<bool>,
    pub now_playing: Mutex<Vec<NowPlaying>>,
}

impl FakeRemote {
    pub fn press(&self, action: RemoteAction) {
        let handler = self.handler.lock().unwrap().clone();
        if let Some(handler) = handler {
            handler(action);
        }
    }

    pub fn last_now_playing(&self) -> Option<NowPlaying> {
        self.now_playing.lock().unwrap().last().cloned()
    }
}

impl RemoteControlSurface for FakeRemote {
    fn register(&self, handler: RemoteActionHandler) {
        *self.handler.lock().unwrap() = Some(handler);
    }

    fn unregister(&self) {
        *self.handler.lock().unwrap() = None;
        *self.unregistered.lock().unwrap() = true;
    }

    fn set_now_playing(&self, now_playing: &NowPlaying) {
        self.now_playing.lock().unwrap().push(now_playing.clone());
    }
}

pub fn config_with_url(url: &str) -> Arc<Config> {
    let config = Config::in_memory("").unwrap();
    config.set_stream_url(url).unwrap();
    Arc::new(config)
}

pub fn settings() -> PlayerSettings {
    Config::in_memory("").unwrap().get_player_settings()
}

/// Controller on an in-memory configuration holding `url`.
pub async fn start_controller(url: &str) -> (StreamController, FakeFactory, Arc<Config>) {
    let config = config_with_url(url);
    let factory = FakeFactory::default();
    let controller = StreamController::start(
        settings(),
        config.clone(),
        Arc::new(factory.clone()),
        None,
    )
    .await
    .unwrap();
    (controller, factory, config)
}

/// Lets virtual time run for `duration`, then waits for the controller to
/// drain everything that became due.
pub async fn settle(controller: &StreamController, duration: Duration) {
    tokio::time::sleep(duration).await;
    controller.sync().await.unwrap();
}
