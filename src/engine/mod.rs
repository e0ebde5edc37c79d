//! Media engine capability
//!
//! The session never touches ICE, DTLS or RTP itself. Everything below the
//! signaling layer is reached through [`MediaEngine`], a synchronous
//! collaborator polled for events the same way `str0m::Rtc` is polled for
//! output.

pub mod rtc;

#[cfg(test)]
pub(crate) mod fake;

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use str0m::media::{Direction, MediaKind, Mid};
use str0m::IceConnectionState;

use crate::bandwidth::EncodingParameters;
use crate::error::EngineError;
use crate::model::MediaTrack;
use crate::protocol::events::{IceCandidate, TurnServer};

pub use rtc::Str0mEngine;

/// Handle to one sending transceiver of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SenderId(u64);

impl SenderId {
    pub fn next() -> SenderId {
        static ID_COUNTER: AtomicU64 = AtomicU64::new(0);
        SenderId(ID_COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl Deref for SenderId {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for SenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sender-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransceiverInfo {
    /// Position in creation order, used to address the transceiver.
    pub index: usize,
    /// Assigned once the transceiver has been part of an offer.
    pub mid: Option<Mid>,
    pub kind: MediaKind,
    pub direction: Direction,
    pub sender: Option<SenderId>,
}

/// How a local source is attached.
#[derive(Debug, Clone, PartialEq)]
pub struct TransceiverInit {
    pub direction: Direction,
    pub stream_id: String,
    pub send_encodings: Vec<EncodingParameters>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineState {
    pub signaling: SignalingState,
    pub connection: ConnectionState,
    pub ice: IceConnectionState,
}

impl EngineState {
    pub fn new() -> EngineState {
        EngineState {
            signaling: SignalingState::Stable,
            connection: ConnectionState::New,
            ice: IceConnectionState::New,
        }
    }

    /// Whether a structural change may be started right now.
    pub fn is_settled(&self) -> bool {
        self.signaling == SignalingState::Stable
            && self.connection == ConnectionState::Connected
            && matches!(
                self.ice,
                IceConnectionState::Connected | IceConnectionState::Completed
            )
    }
}

impl Default for EngineState {
    fn default() -> Self {
        EngineState::new()
    }
}

#[derive(Debug, Clone)]
pub enum EngineEvent {
    SignalingStateChange(SignalingState),
    ConnectionStateChange(ConnectionState),
    IceConnectionStateChange(IceConnectionState),
    /// First media received on a transceiver.
    TrackArrived {
        mid: Mid,
        track: MediaTrack,
        stream_id: Option<String>,
    },
    LocalCandidate(IceCandidate),
}

/// One statistics record as reported by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsEntry {
    pub id: String,
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineConfig {
    pub turn_servers: Vec<TurnServer>,
}

/// Builds an engine the first time the server asks for an offer.
pub type EngineFactory<E> = Box<dyn FnMut(&EngineConfig) -> Result<E, EngineError> + Send>;

pub trait MediaEngine {
    /// Produce an SDP offer covering every transceiver.
    fn create_offer(&mut self) -> Result<String, EngineError>;

    fn set_local_description(&mut self, sdp: &str) -> Result<(), EngineError>;

    fn set_remote_description(&mut self, sdp: &str) -> Result<(), EngineError>;

    fn restart_ice(&mut self);

    fn add_remote_candidate(&mut self, candidate: &IceCandidate) -> Result<(), EngineError>;

    fn add_source(&mut self, track: &MediaTrack, init: TransceiverInit) -> Result<SenderId, EngineError>;

    fn remove_source(&mut self, sender: SenderId) -> Result<(), EngineError>;

    /// Swap the source of a sender. `None` mutes it.
    fn replace_track(&mut self, sender: SenderId, track: Option<&MediaTrack>) -> Result<(), EngineError>;

    fn add_recv_only(&mut self, kind: MediaKind);

    fn transceivers(&self) -> Vec<TransceiverInfo>;

    fn set_direction(&mut self, index: usize, direction: Direction);

    fn sender_parameters(&self, sender: SenderId) -> Option<Vec<EncodingParameters>>;

    fn set_sender_parameters(&mut self, sender: SenderId, params: Vec<EncodingParameters>) -> Result<(), EngineError>;

    /// Statistics for one sender, or for the whole connection.
    fn stats(&self, sender: Option<SenderId>) -> Vec<StatsEntry>;

    fn state(&self) -> EngineState;

    fn poll_event(&mut self) -> Option<EngineEvent>;

    fn close(&mut self);
}
