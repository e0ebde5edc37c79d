//! Session state machine
//!
//! [`Session`] is sans-IO. The host feeds it transport messages, transport
//! failures and the current time, then drains [`Session::poll_output`] until
//! it returns `None`:
//!
//! ```no_run
//! # use rover_session::{Session, Output, MediaEngine};
//! # fn run<E: MediaEngine>(session: &mut Session<E>, line: &str) {
//! session.handle_transport_message(std::time::Instant::now(), line);
//! while let Some(output) = session.poll_output() {
//!     match output {
//!         Output::Transmit(text) => println!("{}", text),
//!         Output::Notification(n) => println!("{}", n.name()),
//!         Output::Reconnect { metadata } => { /* reopen transport, then connect */ }
//!     }
//! }
//! # }
//! ```

mod commands;
mod negotiation;
mod notification;
mod reconnect;
mod tracks;

#[cfg(test)]
mod tests;

use std::collections::VecDeque;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::engine::{EngineFactory, MediaEngine};
use crate::error::CommandError;
use crate::model::{Endpoint, TrackContext, TrackId, TrackRegistry};
use crate::protocol::events::ConnectData;
use crate::protocol::{self, Decoded, MediaEvent};

pub use commands::{CommandId, PendingCommand};
pub use notification::Notification;
pub use reconnect::{is_auth_failure, ReconnectStatus, SnapshotTrack};

use commands::CommandQueue;
use reconnect::{ReconnectManager, Trigger};

#[derive(Debug)]
pub enum Output {
    /// Text to write to the signaling transport.
    Transmit(String),
    Notification(Notification),
    /// The host should reopen its transport and call [`Session::connect`].
    Reconnect { metadata: Value },
}

pub struct Session<E: MediaEngine> {
    registry: TrackRegistry,
    engine: Option<E>,
    factory: EngineFactory<E>,
    commands: CommandQueue,
    renegotiation_in_flight: bool,
    replace_in_flight: bool,
    /// Set between `connected` and teardown.
    joined: bool,
    bandwidth_estimation: f64,
    reconnect: Option<ReconnectManager>,
    outputs: VecDeque<Output>,
}

impl<E: MediaEngine> Session<E> {
    pub fn new(config: SessionConfig, factory: EngineFactory<E>) -> Session<E> {
        Session {
            registry: TrackRegistry::new(config.endpoint_metadata_parser, config.track_metadata_parser),
            engine: None,
            factory,
            commands: CommandQueue::default(),
            renegotiation_in_flight: false,
            replace_in_flight: false,
            joined: false,
            bandwidth_estimation: 0.0,
            reconnect: config.reconnect.map(ReconnectManager::new),
            outputs: VecDeque::new(),
        }
    }

    /// Ask the server to admit the local endpoint.
    pub fn connect(&mut self, metadata: Value) {
        info!("Connecting");
        self.registry.update_local_metadata(metadata.clone());
        if let Some(manager) = &mut self.reconnect {
            manager.remember_metadata(&metadata);
        }
        self.send(MediaEvent::Connect(ConnectData { metadata }));
    }

    /// Leave the session. Pending track commands are rejected.
    pub fn disconnect(&mut self) {
        info!("Disconnecting");
        self.send(MediaEvent::Disconnect);
        if let Some(manager) = &mut self.reconnect {
            manager.reset();
        }
        self.teardown();
    }

    pub fn poll_output(&mut self) -> Option<Output> {
        self.outputs.pop_front()
    }

    /// When [`Session::handle_timeout`] should next be called.
    pub fn poll_timeout(&self) -> Option<Instant> {
        self.reconnect.as_ref().and_then(|m| m.deadline())
    }

    pub fn handle_transport_message(&mut self, now: Instant, text: &str) {
        match protocol::decode(text) {
            Ok(Decoded::Event(event)) => {
                debug!("Received {}", event.name());
                self.handle_event(now, event);
            }
            Ok(Decoded::Unknown { event_type }) => {
                debug!("Ignoring event of unknown type {}", event_type);
            }
            Err(e) => warn!("Dropping message: {}", e),
        }
        self.handle_engine_events(now);
    }

    /// The transport went away. `reason` is the close reason, if any.
    pub fn handle_transport_closed(&mut self, now: Instant, reason: Option<&str>) {
        if let Some(reason) = reason.filter(|r| is_auth_failure(r)) {
            warn!("Transport closed by authentication failure: {}", reason);
            return;
        }
        info!("Transport closed: {}", reason.unwrap_or("no reason"));
        self.trigger_reconnect(now);
    }

    pub fn handle_transport_error(&mut self, now: Instant, message: &str) {
        warn!("Transport error: {}", message);
        self.trigger_reconnect(now);
    }

    pub fn handle_timeout(&mut self, now: Instant) {
        if let Some(metadata) = self.reconnect.as_mut().and_then(|m| m.handle_timeout(now)) {
            info!("Reconnecting");
            self.teardown();
            self.outputs.push_back(Output::Reconnect { metadata });
        }
        self.handle_engine_events(now);
    }

    /// Process everything the engine has queued since the last call.
    pub fn handle_engine_events(&mut self, now: Instant) {
        while let Some(event) = self.engine.as_mut().and_then(|e| e.poll_event()) {
            self.handle_engine_event(now, event);
        }
    }

    pub fn engine(&self) -> Option<&E> {
        self.engine.as_ref()
    }

    pub fn engine_mut(&mut self) -> Option<&mut E> {
        self.engine.as_mut()
    }

    pub fn local_endpoint(&self) -> &Endpoint {
        self.registry.local()
    }

    /// The local endpoint or a remote one, by id.
    pub fn endpoint(&self, endpoint_id: &str) -> Option<&Endpoint> {
        self.registry.endpoint(endpoint_id)
    }

    pub fn remote_endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.registry.remote_endpoints()
    }

    pub fn remote_tracks(&self) -> impl Iterator<Item = &TrackContext> {
        self.registry.remote_tracks()
    }

    pub fn track(&self, track_id: &TrackId) -> Option<&TrackContext> {
        self.registry.track(track_id)
    }

    /// Latest estimate reported by the server, in bits per second.
    pub fn bandwidth_estimation(&self) -> f64 {
        self.bandwidth_estimation
    }

    pub fn reconnect_status(&self) -> Option<ReconnectStatus> {
        self.reconnect.as_ref().map(|m| m.status())
    }

    fn trigger_reconnect(&mut self, now: Instant) {
        let Some(manager) = &mut self.reconnect else {
            return;
        };
        if !self.joined && !manager.is_reconnecting() {
            debug!("Not joined, nothing to recover");
            return;
        }

        let registry = &self.registry;
        let outcome = manager.trigger(now, || {
            registry
                .local_tracks()
                .filter_map(|t| {
                    Some(SnapshotTrack {
                        track: t.track.clone()?,
                        metadata: t.metadata.raw.clone(),
                        simulcast_config: t.simulcast_config.clone(),
                        max_bandwidth: t.max_bandwidth.clone(),
                    })
                })
                .collect()
        });

        match outcome {
            Trigger::Started(_) => self.notify(Notification::ReconnectionStarted),
            Trigger::LimitReached => self.notify(Notification::ReconnectionRetriesLimitReached),
            Trigger::Scheduled(_) | Trigger::AlreadyScheduled | Trigger::Ignored => {}
        }
    }

    /// Called once the server has admitted the local endpoint.
    fn handle_rejoined(&mut self) {
        let Some(tracks) = self.reconnect.as_mut().and_then(|m| m.handle_connected()) else {
            return;
        };
        info!("Reconnected, republishing {} tracks", tracks.len());
        for snapshot in tracks {
            // Results are not awaited; failures are logged by the queue.
            let _ = self.add_track(
                snapshot.track,
                snapshot.metadata,
                snapshot.simulcast_config,
                snapshot.max_bandwidth,
            );
        }
        self.notify(Notification::Reconnected);
    }

    /// Drop the engine and everything learned from the server.
    pub(crate) fn teardown(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            engine.close();
        }
        self.registry.reset();
        self.commands.reject_all(CommandError::SessionClosed);
        self.renegotiation_in_flight = false;
        self.replace_in_flight = false;
        self.joined = false;
    }

    pub(crate) fn send(&mut self, event: MediaEvent) {
        match protocol::encode(&event) {
            Ok(text) => {
                debug!("Sending {}", event.name());
                self.outputs.push_back(Output::Transmit(text));
            }
            Err(e) => error!("Failed to encode {}: {}", event.name(), e),
        }
    }

    pub(crate) fn notify(&mut self, notification: Notification) {
        self.outputs.push_back(Output::Notification(notification));
    }
}
