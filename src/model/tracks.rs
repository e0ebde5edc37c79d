//! Media track management
//!
//! This module provides the data structures describing local and remote media
//! tracks in a session: their identity, metadata, simulcast configuration and
//! where a local track is in the offer/answer cycle.

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use str0m::media::MediaKind;
use uuid::Uuid;

use crate::engine::SenderId;
use crate::model::metadata::{Metadata, MetadataParser};

/// Protocol-level identity of a track.
///
/// Local track ids are namespaced by the owning endpoint id:
/// `"{endpoint_id}:{uuid}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(String);

impl TrackId {
    /// Issue a fresh id for a track published by `endpoint_id`.
    pub fn generate(endpoint_id: &str) -> TrackId {
        TrackId(format!("{}:{}", endpoint_id, Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for TrackId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrackId {
    fn from(value: &str) -> Self {
        TrackId(value.to_string())
    }
}

impl From<String> for TrackId {
    fn from(value: String) -> Self {
        TrackId(value)
    }
}

/// One simulcast quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TrackEncoding {
    #[serde(rename = "l")]
    Low,
    #[serde(rename = "m")]
    Medium,
    #[serde(rename = "h")]
    High,
}

impl TrackEncoding {
    /// Sender encoding order used when a simulcast track is attached.
    pub const ALL: [TrackEncoding; 3] = [TrackEncoding::Low, TrackEncoding::Medium, TrackEncoding::High];

    pub fn rid(self) -> &'static str {
        match self {
            TrackEncoding::Low => "l",
            TrackEncoding::Medium => "m",
            TrackEncoding::High => "h",
        }
    }

    /// Resolution divisor of this tier relative to the captured frame.
    pub fn scale_resolution_down_by(self) -> f64 {
        match self {
            TrackEncoding::Low => 4.0,
            TrackEncoding::Medium => 2.0,
            TrackEncoding::High => 1.0,
        }
    }
}

impl fmt::Display for TrackEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.rid())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulcastConfig {
    pub enabled: bool,
    #[serde(default)]
    pub active_encodings: Vec<TrackEncoding>,
    #[serde(default)]
    pub disabled_encodings: Vec<TrackEncoding>,
}

impl SimulcastConfig {
    pub fn disabled() -> SimulcastConfig {
        SimulcastConfig::default()
    }

    pub fn with_encodings(active: &[TrackEncoding]) -> SimulcastConfig {
        SimulcastConfig {
            enabled: true,
            active_encodings: active.to_vec(),
            disabled_encodings: vec![],
        }
    }
}

/// Bandwidth cap for a track, in kbps. Zero means unlimited.
#[derive(Debug, Clone, PartialEq)]
pub enum BandwidthLimit {
    /// Applied across all encodings of the track.
    Single(u32),
    /// Applied per simulcast encoding.
    Simulcast(HashMap<TrackEncoding, u32>),
}

impl Default for BandwidthLimit {
    fn default() -> Self {
        BandwidthLimit::Single(0)
    }
}

impl From<u32> for BandwidthLimit {
    fn from(kbps: u32) -> Self {
        BandwidthLimit::Single(kbps)
    }
}

/// Where a local track is in the offer/answer cycle.
///
/// Only ever moves forward: `Awaiting` → `Offered` → `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NegotiationStatus {
    Awaiting,
    Offered,
    Done,
}

impl NegotiationStatus {
    /// Move to `next` if it is later in the cycle. Returns whether it moved.
    pub fn advance(&mut self, next: NegotiationStatus) -> bool {
        if next > *self {
            *self = next;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VadStatus {
    Speech,
    #[default]
    Silence,
}

/// Why the server switched the variant it forwards for a remote track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingReason {
    Other,
    EncodingInactive,
    LowBandwidth,
}

/// Handle to an already-acquired media track.
///
/// Clones share the ended flag, so a snapshot taken for reconnection observes
/// `stop()` calls made by the owner.
#[derive(Debug, Clone)]
pub struct MediaTrack {
    id: String,
    kind: MediaKind,
    stream_id: Option<String>,
    ended: Arc<AtomicBool>,
}

impl MediaTrack {
    pub fn new(id: impl Into<String>, kind: MediaKind) -> MediaTrack {
        MediaTrack {
            id: id.into(),
            kind,
            stream_id: None,
            ended: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_stream(mut self, stream_id: impl Into<String>) -> MediaTrack {
        self.stream_id = Some(stream_id.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn stream_id(&self) -> Option<&str> {
        self.stream_id.as_deref()
    }

    pub fn stop(&self) {
        self.ended.store(true, Ordering::SeqCst);
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }
}

impl PartialEq for MediaTrack {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// A single local or remote track.
#[derive(Debug, Clone)]
pub struct TrackContext {
    pub track_id: TrackId,
    /// Id of the owning endpoint.
    pub endpoint_id: String,
    /// Unknown for remote tracks until their media arrives.
    pub kind: Option<MediaKind>,
    pub track: Option<MediaTrack>,
    pub stream_id: Option<String>,
    pub metadata: Metadata,
    pub simulcast_config: SimulcastConfig,
    pub max_bandwidth: BandwidthLimit,
    /// Variant currently forwarded by the server (remote only).
    pub encoding: Option<TrackEncoding>,
    pub encoding_reason: Option<EncodingReason>,
    pub vad_status: VadStatus,
    pub negotiation_status: NegotiationStatus,
    pub pending_metadata_update: bool,
    /// Engine sender carrying this track (local only).
    pub sender: Option<SenderId>,
}

impl TrackContext {
    pub fn local(
        track_id: TrackId,
        endpoint_id: &str,
        track: MediaTrack,
        metadata: Metadata,
        simulcast_config: SimulcastConfig,
        max_bandwidth: BandwidthLimit,
    ) -> TrackContext {
        let stream_id = track
            .stream_id()
            .map(str::to_string)
            .unwrap_or_else(|| track_id.to_string());

        TrackContext {
            track_id,
            endpoint_id: endpoint_id.to_string(),
            kind: Some(track.kind()),
            track: Some(track),
            stream_id: Some(stream_id),
            metadata,
            simulcast_config,
            max_bandwidth,
            encoding: None,
            encoding_reason: None,
            vad_status: VadStatus::default(),
            negotiation_status: NegotiationStatus::Awaiting,
            pending_metadata_update: false,
            sender: None,
        }
    }

    pub fn remote(
        track_id: TrackId,
        endpoint_id: &str,
        metadata: Metadata,
        simulcast_config: SimulcastConfig,
    ) -> TrackContext {
        TrackContext {
            track_id,
            endpoint_id: endpoint_id.to_string(),
            kind: None,
            track: None,
            stream_id: None,
            metadata,
            simulcast_config,
            max_bandwidth: BandwidthLimit::default(),
            encoding: None,
            encoding_reason: None,
            vad_status: VadStatus::default(),
            negotiation_status: NegotiationStatus::Awaiting,
            pending_metadata_update: false,
            sender: None,
        }
    }

    pub fn update_metadata(&mut self, raw: serde_json::Value, parser: &MetadataParser) {
        self.metadata.update(raw, parser);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_track_ids_are_namespaced_by_endpoint() {
        let id = TrackId::generate("endpoint-1");
        assert!(id.starts_with("endpoint-1:"));
        assert_ne!(id, TrackId::generate("endpoint-1"));
    }

    #[test]
    fn negotiation_status_never_moves_backwards() {
        let mut status = NegotiationStatus::Awaiting;
        assert!(status.advance(NegotiationStatus::Offered));
        assert!(status.advance(NegotiationStatus::Done));
        assert!(!status.advance(NegotiationStatus::Offered));
        assert!(!status.advance(NegotiationStatus::Awaiting));
        assert_eq!(status, NegotiationStatus::Done);
    }

    #[test]
    fn stopping_a_clone_ends_the_original() {
        let track = MediaTrack::new("cam", MediaKind::Video);
        let snapshot = track.clone();
        track.stop();
        assert!(snapshot.is_ended());
    }

    #[test]
    fn encodings_use_single_letter_wire_names() {
        let json = serde_json::to_string(&TrackEncoding::Medium).unwrap();
        assert_eq!(json, "\"m\"");
        let parsed: TrackEncoding = serde_json::from_str("\"h\"").unwrap();
        assert_eq!(parsed, TrackEncoding::High);
    }
}
