//! OnAir: terminal monitor for a live radio stream.
//!
//! Connects to the station configured under `radio.stream_url` (or the URL
//! given as first argument), keeps the connection alive and reads commands
//! from stdin.

use std::sync::{Arc, Mutex};

use onairconfig::{Config, get_config};
use onaircontrol::{
    EnvironmentSignal, IcyStreamFactory, NowPlaying, PlayerConfigExt, PlayerSnapshot,
    RemoteAction, RemoteActionHandler, RemoteControlSurface, SourceUpdate, StreamController,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

const HELP: &str = "\
commands:
  play | pause | toggle      playback
  vol <0..1>                 volume
  url <URL>                  change the configured stream
  refresh                    re-read the stream URL
  online | offline           simulate connectivity changes
  show | hide                simulate visibility changes
  status                     print the current state
  quit";

fn init_logging(config: &Config) {
    let level = config
        .get_log_min_level()
        .unwrap_or_else(|_| "INFO".to_string());
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = Registry::default().with(filter);
    if config.get_log_enable_console().unwrap_or(true) {
        subscriber
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_ansi(true),
            )
            .init();
    } else {
        subscriber.init();
    }
}

/// Terminal stand-in for a media-session surface: prints what is on air and
/// lets the `remote` command press its buttons.
#[derive(Default)]
struct TerminalRemote {
    handler: Mutex<Option<RemoteActionHandler>>,
}

impl TerminalRemote {
    fn press(&self, action: RemoteAction) {
        let handler = self
            .handler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        match handler {
            Some(handler) => handler(action),
            None => warn!(?action, "No remote handler registered"),
        }
    }
}

impl RemoteControlSurface for TerminalRemote {
    fn register(&self, handler: RemoteActionHandler) {
        *self.handler.lock().unwrap_or_else(|p| p.into_inner()) = Some(handler);
    }

    fn unregister(&self) {
        *self.handler.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }

    fn set_now_playing(&self, now_playing: &NowPlaying) {
        if let Some(title) = &now_playing.title {
            println!("♪ {title}");
        }
    }
}

fn print_status(snapshot: &PlayerSnapshot) {
    let mut line = format!(
        "[{}] {} vol={:.2}",
        snapshot.state,
        if snapshot.stream_url.is_empty() {
            "<no stream>"
        } else {
            &snapshot.stream_url
        },
        snapshot.volume
    );
    if snapshot.retry_count > 0 {
        line.push_str(&format!(" retry={}", snapshot.retry_count));
    }
    if !snapshot.online {
        line.push_str(" offline");
    }
    if let Some(message) = snapshot.error_message() {
        line.push_str(&format!(" ({message})"));
    }
    println!("{line}");
}

/// Runs one stdin command. Returns false on `quit`.
async fn handle_line(
    line: &str,
    controller: &StreamController,
    remote: &TerminalRemote,
    config: &Config,
) -> anyhow::Result<bool> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(true);
    };
    let argument = words.next();

    match command {
        "play" => controller.play().await?,
        "pause" => controller.pause().await?,
        "toggle" => controller.toggle_play().await?,
        "vol" | "volume" => match argument.and_then(|v| v.parse::<f32>().ok()) {
            Some(level) => controller.set_volume(level).await?,
            None => println!("usage: vol <0..1>"),
        },
        "url" => match argument {
            Some(url) => config.set_stream_url(url)?,
            None => println!("usage: url <URL>"),
        },
        "refresh" => match controller.refresh_stream_url().await? {
            SourceUpdate::Changed { current, .. } => println!("stream is now {current}"),
            SourceUpdate::Failed(err) => println!("refresh failed: {err}"),
            SourceUpdate::Unchanged | SourceUpdate::Absent => println!("no change"),
        },
        "online" => controller.signal(EnvironmentSignal::Online).await?,
        "offline" => controller.signal(EnvironmentSignal::Offline).await?,
        "show" => controller.signal(EnvironmentSignal::VisibilityChanged(true)).await?,
        "hide" => controller.signal(EnvironmentSignal::VisibilityChanged(false)).await?,
        "remote" => match argument {
            Some("play") => remote.press(RemoteAction::Play),
            Some("pause") => remote.press(RemoteAction::Pause),
            Some("stop") => remote.press(RemoteAction::Stop),
            _ => println!("usage: remote play|pause|stop"),
        },
        "status" => print_status(&controller.snapshot()),
        "quit" | "exit" => return Ok(false),
        _ => println!("{HELP}"),
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = get_config();
    init_logging(&config);

    if let Some(url) = std::env::args().nth(1) {
        config.set_stream_url(&url)?;
    }

    let factory = Arc::new(IcyStreamFactory::new(config.get_icy_options())?);
    let remote = Arc::new(TerminalRemote::default());
    let controller = StreamController::start(
        config.get_player_settings(),
        config.clone(),
        factory,
        Some(remote.clone()),
    )
    .await?;

    info!("📻 OnAir ready, type `help` for commands");
    print_status(&controller.snapshot());
    controller.play().await?;

    let mut updates = controller.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut last_state = updates.borrow().state;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                if snapshot.state != last_state {
                    last_state = snapshot.state;
                    print_status(&snapshot);
                }
            }
            line = lines.next_line() => match line? {
                Some(line) => {
                    if !handle_line(line.trim(), &controller, &remote, &config).await? {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    controller.dispose().await?;
    info!("✅ OnAir stopped");
    Ok(())
}
