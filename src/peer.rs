//! Session host over stdio
//!
//! Runs one session using line-delimited JSON on stdin/stdout as the
//! signaling transport and a UDP socket for media. Logs go to stderr so
//! stdout carries nothing but protocol messages.

use std::env;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use rover_session::{
    EngineFactory, MediaTrack, Notification, Output, PendingCommand, ReconnectConfig, Session, SessionConfig,
    SimulcastConfig, Str0mEngine, TrackId,
};
use serde_json::{json, Value};
use str0m::media::MediaKind;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio::net::UdpSocket;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const IDLE_TICK: Duration = Duration::from_secs(1);

fn init_log() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[derive(Debug)]
struct PeerOptions {
    publish: Option<MediaKind>,
    metadata: Value,
    reconnect_attempts: Option<u32>,
}

impl PeerOptions {
    fn from_args(args: &[String]) -> anyhow::Result<PeerOptions> {
        let mut options = PeerOptions {
            publish: None,
            metadata: json!({}),
            reconnect_attempts: None,
        };

        let mut args = args.iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--publish" => {
                    options.publish = match args.next().map(String::as_str) {
                        Some("audio") => Some(MediaKind::Audio),
                        Some("video") => Some(MediaKind::Video),
                        other => bail!("--publish expects audio or video, got {:?}", other),
                    }
                }
                "--name" => {
                    let name = args.next().context("--name expects a value")?;
                    options.metadata = json!({ "displayName": name });
                }
                other => bail!("Unknown option {}", other),
            }
        }

        if let Ok(attempts) = env::var("ROVER_RECONNECT_ATTEMPTS") {
            let attempts = attempts
                .parse()
                .with_context(|| format!("ROVER_RECONNECT_ATTEMPTS is not a number: {}", attempts))?;
            options.reconnect_attempts = Some(attempts);
        }

        Ok(options)
    }

    fn session_config(&self) -> SessionConfig {
        let config = SessionConfig::default();
        match self.reconnect_attempts {
            Some(0) => config.without_reconnect(),
            Some(max_attempts) => config.with_reconnect(ReconnectConfig {
                max_attempts,
                ..ReconnectConfig::default()
            }),
            None => config,
        }
    }
}

struct Host {
    session: Session<Str0mEngine>,
    stdout: Stdout,
    options: PeerOptions,
    pending: Vec<PendingCommand<TrackId>>,
    published: bool,
}

impl Host {
    /// Drain session output. Returns `false` once the session is over.
    async fn flush(&mut self) -> anyhow::Result<bool> {
        while let Some(output) = self.session.poll_output() {
            match output {
                Output::Transmit(text) => {
                    self.stdout.write_all(text.as_bytes()).await?;
                    self.stdout.write_all(b"\n").await?;
                    self.stdout.flush().await?;
                }
                Output::Notification(notification) => {
                    info!("Notification: {}", notification.name());
                    match notification {
                        Notification::Connected { .. } => self.publish(),
                        Notification::Disconnected | Notification::ReconnectionRetriesLimitReached => {
                            return Ok(false)
                        }
                        Notification::SignalingError { message } => warn!("Server error: {}", message),
                        _ => {}
                    }
                }
                Output::Reconnect { metadata } => {
                    // stdio cannot be reopened, the next connect goes out on the same pipe.
                    self.session.connect(metadata);
                }
            }
        }

        self.pending.retain_mut(|pending| match pending.try_result() {
            Some(Ok(track_id)) => {
                info!("Publishing {}", track_id);
                false
            }
            Some(Err(e)) => {
                warn!("Publishing failed: {}", e);
                false
            }
            None => true,
        });

        Ok(true)
    }

    fn publish(&mut self) {
        let Some(kind) = self.options.publish else {
            return;
        };
        // Tracks published before a reconnect are re-added by the session.
        if self.published {
            return;
        }
        self.published = true;

        let name = match kind {
            MediaKind::Audio => "microphone",
            MediaKind::Video => "camera",
        };
        let (track_id, pending) = self.session.add_track(
            MediaTrack::new(name, kind),
            json!({ "source": name }),
            SimulcastConfig::disabled(),
            Default::default(),
        );
        info!("Queued {} as {}", name, track_id);
        self.pending.push(pending);
    }

    fn next_deadline(&self) -> Instant {
        let idle = Instant::now() + IDLE_TICK;
        let engine = self.session.engine().and_then(|e| e.poll_timeout());
        [self.session.poll_timeout(), engine]
            .into_iter()
            .flatten()
            .fold(idle, Instant::min)
    }
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    init_log();

    let args: Vec<String> = env::args().skip(2).collect();
    let options = PeerOptions::from_args(&args)?;
    info!("Starting session peer: {:?}", options);

    let socket = Arc::new(UdpSocket::bind("0.0.0.0:0").await?);
    info!("Media socket bound to {}", socket.local_addr()?);

    let engine_socket = socket.clone();
    let factory: EngineFactory<Str0mEngine> = Box::new(move |config| Str0mEngine::new(engine_socket.clone(), config));

    let mut host = Host {
        session: Session::new(options.session_config(), factory),
        stdout: tokio::io::stdout(),
        pending: vec![],
        published: false,
        options,
    };
    host.session.connect(host.options.metadata.clone());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut buf = vec![0; 2000];

    while host.flush().await? {
        let deadline = tokio::time::Instant::from_std(host.next_deadline());

        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => host.session.handle_transport_message(Instant::now(), &line),
                None => {
                    info!("Transport closed");
                    host.session.disconnect();
                    host.flush().await?;
                    break;
                }
            },
            received = socket.recv_from(&mut buf) => {
                let (n, source) = received?;
                let now = Instant::now();
                if let Some(engine) = host.session.engine_mut() {
                    if let Err(e) = engine.handle_receive(now, source, &buf[..n]) {
                        warn!("Dropping datagram from {}: {}", source, e);
                    }
                }
                host.session.handle_engine_events(now);
            }
            _ = tokio::time::sleep_until(deadline) => {
                let now = Instant::now();
                if let Some(engine) = host.session.engine_mut() {
                    if let Err(e) = engine.handle_timeout(now) {
                        warn!("Engine timeout handling failed: {}", e);
                    }
                }
                host.session.handle_timeout(now);
            }
        }
    }

    info!("Session ended");
    Ok(())
}
