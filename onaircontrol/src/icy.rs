//! Headless HTTP/ICY stream primitive.
//!
//! `IcyStreamPrimitive` opens an Icecast/Shoutcast stream with
//! `Icy-MetaData: 1`, consumes the body without decoding it and reports the
//! connection health as [`MediaEvent`]s:
//!
//! - `Started` on the first audio bytes (and again after a stall resolves)
//! - `BufferingBegan` / `BufferingResolved` around silences longer than the
//!   stall timeout
//! - `Ended` when the server closes the body, `StreamAborted` on transport
//!   errors
//! - `Errored(Network | Http)` when the request itself fails
//! - `StreamTitle` for every in-band `StreamTitle` announcement
//!
//! It is what the `OnAir` monitor uses to watch a station without playing it.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::{FutureExt, StreamExt};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::constants::{DEFAULT_ICY_USER_AGENT, icy_stall_timeout};
use crate::errors::StartError;
use crate::primitive::{
    ErrorReason, MediaEvent, MediaEventSink, MediaFactory, MediaPrimitive, ReadyState, StartFuture,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IcyOptions {
    /// Silence on the wire after which buffering is reported.
    pub stall_timeout: Duration,
    pub user_agent: String,
}

impl Default for IcyOptions {
    fn default() -> Self {
        Self {
            stall_timeout: icy_stall_timeout(),
            user_agent: DEFAULT_ICY_USER_AGENT.to_string(),
        }
    }
}

pub struct IcyStreamFactory {
    client: reqwest::Client,
    options: IcyOptions,
}

impl IcyStreamFactory {
    pub fn new(options: IcyOptions) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(options.user_agent.clone())
            .build()?;
        Ok(Self { client, options })
    }
}

impl MediaFactory for IcyStreamFactory {
    fn create(&self, sink: MediaEventSink) -> Box<dyn MediaPrimitive> {
        Box::new(IcyStreamPrimitive {
            client: self.client.clone(),
            options: self.options.clone(),
            sink,
            source: None,
            volume: 1.0,
            status: Arc::new(Mutex::new(WireStatus::default())),
            session: None,
        })
    }
}

#[derive(Debug)]
struct WireStatus {
    paused: bool,
    ready: ReadyState,
}

impl Default for WireStatus {
    fn default() -> Self {
        Self {
            paused: true,
            ready: ReadyState::HaveNothing,
        }
    }
}

type SharedStatus = Arc<Mutex<WireStatus>>;

fn lock(status: &SharedStatus) -> MutexGuard<'_, WireStatus> {
    status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct IcyStreamPrimitive {
    client: reqwest::Client,
    options: IcyOptions,
    sink: MediaEventSink,
    source: Option<String>,
    volume: f32,
    status: SharedStatus,
    session: Option<CancellationToken>,
}

impl IcyStreamPrimitive {
    fn cancel_session(&mut self) -> bool {
        match self.session.take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

impl MediaPrimitive for IcyStreamPrimitive {
    fn assign_source(&mut self, url: &str) {
        self.cancel_session();
        self.source = Some(url.to_string());
    }

    fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    fn load(&mut self) {
        self.cancel_session();
        *lock(&self.status) = WireStatus::default();
    }

    fn start(&mut self) -> StartFuture {
        let Some(url) = self.source.clone() else {
            return futures::future::ready(Err(StartError::Unsupported("no source assigned".into())))
                .boxed();
        };
        self.cancel_session();

        let token = CancellationToken::new();
        self.session = Some(token.clone());
        let (started_tx, started_rx) = oneshot::channel();

        let session = IcySession {
            client: self.client.clone(),
            url,
            stall_timeout: self.options.stall_timeout,
            sink: self.sink.clone(),
            status: self.status.clone(),
            token,
        };
        tokio::spawn(session.run(started_tx));

        started_rx
            .map(|result| result.unwrap_or(Err(StartError::Aborted)))
            .boxed()
    }

    fn stop(&mut self) {
        let was_running = self.cancel_session();
        lock(&self.status).paused = true;
        if was_running {
            self.sink.emit(MediaEvent::Stopped);
        }
    }

    fn volume(&self) -> f32 {
        self.volume
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
    }

    fn ready_state(&self) -> ReadyState {
        lock(&self.status).ready
    }

    fn is_paused(&self) -> bool {
        lock(&self.status).paused
    }
}

impl Drop for IcyStreamPrimitive {
    fn drop(&mut self) {
        self.cancel_session();
    }
}

struct IcySession {
    client: reqwest::Client,
    url: String,
    stall_timeout: Duration,
    sink: MediaEventSink,
    status: SharedStatus,
    token: CancellationToken,
}

impl IcySession {
    async fn run(self, started: oneshot::Sender<Result<(), StartError>>) {
        let generation = self.sink.generation();
        debug!(generation, url = %self.url, "Opening ICY stream");

        let request = self.client.get(&self.url).header("Icy-MetaData", "1").send();
        let response = tokio::select! {
            _ = self.token.cancelled() => {
                let _ = started.send(Err(StartError::Aborted));
                return;
            }
            response = request => response,
        };

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                warn!(generation, url = %self.url, "ICY request failed: {}", err);
                self.sink.emit(MediaEvent::Errored(ErrorReason::Network(err.to_string())));
                let _ = started.send(Err(StartError::Network(err.to_string())));
                return;
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(generation, url = %self.url, %status, "ICY stream refused");
            self.sink.emit(MediaEvent::Errored(ErrorReason::Http(status.as_u16())));
            let _ = started.send(Err(StartError::Http(status.as_u16())));
            return;
        }

        let metaint = response
            .headers()
            .get("icy-metaint")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|n| *n > 0);
        if let Some(name) = response.headers().get("icy-name").and_then(|v| v.to_str().ok()) {
            debug!(generation, name, ?metaint, "ICY stream accepted");
        }

        let mut reader = IcyMetadataReader::new(metaint);
        let mut body = std::pin::pin!(response.bytes_stream());
        let mut started = Some(started);
        let mut stalled = false;

        loop {
            let next = tokio::select! {
                _ = self.token.cancelled() => break,
                next = tokio::time::timeout(self.stall_timeout, body.next()) => next,
            };

            match next {
                Err(_) => {
                    if !stalled {
                        debug!(generation, "ICY stream stalled");
                        stalled = true;
                        lock(&self.status).ready = ReadyState::HaveCurrentData;
                        self.sink.emit(MediaEvent::BufferingBegan);
                    }
                }
                Ok(Some(Ok(chunk))) => {
                    let parsed = reader.feed(&chunk);
                    if parsed.audio_bytes > 0 {
                        if let Some(tx) = started.take() {
                            self.mark_flowing();
                            let _ = tx.send(Ok(()));
                            self.sink.emit(MediaEvent::Started);
                        } else if stalled {
                            self.mark_flowing();
                            self.sink.emit(MediaEvent::BufferingResolved);
                            self.sink.emit(MediaEvent::Started);
                        }
                        stalled = false;
                    }
                    for title in parsed.titles {
                        self.sink.emit(MediaEvent::StreamTitle(title));
                    }
                }
                Ok(Some(Err(err))) => {
                    warn!(generation, "ICY stream aborted: {}", err);
                    lock(&self.status).paused = true;
                    match started.take() {
                        Some(tx) => {
                            let _ = tx.send(Err(StartError::Network(err.to_string())));
                        }
                        None => {
                            self.sink.emit(MediaEvent::StreamAborted);
                        }
                    }
                    return;
                }
                Ok(None) => {
                    debug!(generation, "ICY stream ended");
                    lock(&self.status).paused = true;
                    match started.take() {
                        Some(tx) => {
                            let _ = tx.send(Err(StartError::Network(
                                "stream closed before any audio".to_string(),
                            )));
                        }
                        None => {
                            self.sink.emit(MediaEvent::Ended);
                        }
                    }
                    return;
                }
            }
        }

        trace!(generation, "ICY session cancelled");
        if let Some(tx) = started.take() {
            let _ = tx.send(Err(StartError::Aborted));
        }
    }

    fn mark_flowing(&self) {
        let mut status = lock(&self.status);
        status.paused = false;
        status.ready = ReadyState::HaveEnoughData;
    }
}

/// Result of feeding a body chunk to [`IcyMetadataReader`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct IcyChunk {
    pub audio_bytes: usize,
    pub titles: Vec<String>,
}

#[derive(Debug)]
enum ReadState {
    Audio { remaining: usize },
    Length,
    Metadata { remaining: usize },
}

/// Splits an ICY body into audio bytes and metadata blocks.
///
/// With `icy-metaint = N`, every N audio bytes are followed by one length
/// byte `L` and `16 * L` bytes of metadata.
#[derive(Debug)]
pub struct IcyMetadataReader {
    metaint: Option<usize>,
    state: ReadState,
    metadata: Vec<u8>,
}

impl IcyMetadataReader {
    pub fn new(metaint: Option<usize>) -> Self {
        Self {
            metaint,
            state: ReadState::Audio {
                remaining: metaint.unwrap_or(usize::MAX),
            },
            metadata: Vec::new(),
        }
    }

    pub fn feed(&mut self, mut chunk: &[u8]) -> IcyChunk {
        let mut out = IcyChunk::default();
        let Some(metaint) = self.metaint else {
            out.audio_bytes = chunk.len();
            return out;
        };

        while !chunk.is_empty() {
            match self.state {
                ReadState::Audio { remaining } => {
                    let take = remaining.min(chunk.len());
                    out.audio_bytes += take;
                    chunk = &chunk[take..];
                    self.state = if take == remaining {
                        ReadState::Length
                    } else {
                        ReadState::Audio {
                            remaining: remaining - take,
                        }
                    };
                }
                ReadState::Length => {
                    let len = chunk[0] as usize * 16;
                    chunk = &chunk[1..];
                    self.state = if len == 0 {
                        ReadState::Audio { remaining: metaint }
                    } else {
                        self.metadata.clear();
                        ReadState::Metadata { remaining: len }
                    };
                }
                ReadState::Metadata { remaining } => {
                    let take = remaining.min(chunk.len());
                    self.metadata.extend_from_slice(&chunk[..take]);
                    chunk = &chunk[take..];
                    if take == remaining {
                        let block = String::from_utf8_lossy(&self.metadata).into_owned();
                        if let Some(title) = parse_stream_title(&block) {
                            out.titles.push(title);
                        }
                        self.metadata.clear();
                        self.state = ReadState::Audio { remaining: metaint };
                    } else {
                        self.state = ReadState::Metadata {
                            remaining: remaining - take,
                        };
                    }
                }
            }
        }
        out
    }
}

/// Extracts `StreamTitle` from an ICY metadata block
/// (`StreamTitle='Artist - Song';StreamUrl='…';`, NUL padded).
pub fn parse_stream_title(block: &str) -> Option<String> {
    const KEY: &str = "StreamTitle='";
    let start = block.find(KEY)? + KEY.len();
    let rest = block[start..].trim_end_matches('\0');
    let end = rest.find("';").or_else(|| rest.rfind('\''))?;
    let title = rest[..end].trim();
    (!title.is_empty()).then(|| title.to_string())
}
