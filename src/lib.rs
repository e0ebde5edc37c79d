//! Client-side media session engine.
//!
//! Negotiates and maintains a real-time media session with a signaling and
//! media server: JSON signaling events in, SDP offers and track updates out,
//! with ICE and RTP delegated to a [`MediaEngine`].

pub mod bandwidth;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod protocol;
pub mod session;
pub mod util;

pub use config::{ReconnectConfig, SessionConfig};
pub use engine::{EngineConfig, EngineEvent, EngineFactory, MediaEngine, Str0mEngine};
pub use error::{CommandError, EngineError, ProtocolError, Result, SessionError};
pub use model::{BandwidthLimit, MediaTrack, SimulcastConfig, TrackEncoding, TrackId};
pub use session::{Notification, Output, PendingCommand, Session};
