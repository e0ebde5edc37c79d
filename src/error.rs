//! Error types for the session engine.

use thiserror::Error;

use crate::model::TrackId;

/// Result alias used throughout the library.
pub type Result<T, E = SessionError> = std::result::Result<T, E>;

/// A single inbound or outbound message could not be (de)serialized.
///
/// Only the offending message is dropped, the session keeps running.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("message has no `type` tag")]
    MissingType,

    #[error("custom event carries no payload")]
    MissingCustomPayload,
}

/// Failures reported by the media engine collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("sdp error: {0}")]
    Sdp(String),

    #[error("ice error: {0}")]
    Ice(String),

    #[error("no pending offer to match the answer")]
    NoPendingOffer,

    #[error("nothing to negotiate")]
    NoChanges,

    #[error("unknown sender")]
    UnknownSender,

    #[error("engine closed")]
    Closed,
}

/// Why a queued track command was rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("This track was already added to the media engine, it can't be added again")]
    DuplicateTrack,

    #[error("Invalid type of `max_bandwidth` argument for a non-simulcast track, expected a single limit")]
    InvalidBandwidthLimit,

    #[error("Cannot add tracks before being accepted by the server")]
    NotAccepted,

    #[error("Track '{0}' doesn't exist")]
    UnknownTrack(TrackId),

    #[error("media engine rejected the command: {0}")]
    Engine(#[from] EngineError),

    #[error("session closed before the command completed")]
    SessionClosed,
}

/// Umbrella error for the public API.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("encoding '{0}' doesn't exist on this track")]
    UnknownEncoding(String),

    #[error("audio track cannot have multiple encodings")]
    AudioWithEncodings,
}
