//! Signaling event types
//!
//! Every message exchanged with the server is a `{"type", "data"}` object.
//! Events that travel over the media channel are wrapped once more inside a
//! `custom` event.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bandwidth::TrackBitrates;
use crate::model::{EncodingReason, SimulcastConfig, TrackEncoding, TrackId, VadStatus};

/// Control-channel events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum MediaEvent {
    Connect(ConnectData),
    Connected(ConnectedData),
    EndpointAdded(EndpointInfo),
    EndpointRemoved(EndpointRemovedData),
    EndpointUpdated(EndpointUpdatedData),
    TracksAdded(TracksAddedData),
    TracksRemoved(TracksRemovedData),
    TrackUpdated(TrackUpdatedData),
    TracksPriority(TracksPriorityData),
    TrackEncodingEnabled(TrackEncodingData),
    TrackEncodingDisabled(TrackEncodingData),
    UpdateEndpointMetadata(UpdateEndpointMetadataData),
    UpdateTrackMetadata(UpdateTrackMetadataData),
    Error(ErrorData),
    Disconnect,
    Custom(CustomEvent),
}

/// Events carried over the media channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum CustomEvent {
    OfferData(OfferData),
    SdpOffer(SdpOfferData),
    SdpAnswer(SdpAnswerData),
    Candidate(IceCandidate),
    RenegotiateTracks,
    MuteTrack(TrackIdData),
    UnmuteTrack(TrackIdData),
    SetTargetTrackVariant(TargetTrackVariantData),
    TrackVariantBitrates(TrackVariantBitratesData),
    EncodingSwitched(EncodingSwitchedData),
    VadNotification(VadNotificationData),
    BandwidthEstimation(BandwidthEstimationData),
    EnableTrackEncoding(LocalTrackEncodingData),
    DisableTrackEncoding(LocalTrackEncodingData),
}

/// Wire names of [`MediaEvent`] variants.
pub const CONTROL_EVENTS: &[&str] = &[
    "connect",
    "connected",
    "endpointAdded",
    "endpointRemoved",
    "endpointUpdated",
    "tracksAdded",
    "tracksRemoved",
    "trackUpdated",
    "tracksPriority",
    "trackEncodingEnabled",
    "trackEncodingDisabled",
    "updateEndpointMetadata",
    "updateTrackMetadata",
    "error",
    "disconnect",
    "custom",
];

/// Wire names of [`CustomEvent`] variants.
pub const CUSTOM_EVENTS: &[&str] = &[
    "offerData",
    "sdpOffer",
    "sdpAnswer",
    "candidate",
    "renegotiateTracks",
    "muteTrack",
    "unmuteTrack",
    "setTargetTrackVariant",
    "trackVariantBitrates",
    "encodingSwitched",
    "vadNotification",
    "bandwidthEstimation",
    "enableTrackEncoding",
    "disableTrackEncoding",
];

impl MediaEvent {
    /// Get the event name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Connected(_) => "connected",
            Self::EndpointAdded(_) => "endpointAdded",
            Self::EndpointRemoved(_) => "endpointRemoved",
            Self::EndpointUpdated(_) => "endpointUpdated",
            Self::TracksAdded(_) => "tracksAdded",
            Self::TracksRemoved(_) => "tracksRemoved",
            Self::TrackUpdated(_) => "trackUpdated",
            Self::TracksPriority(_) => "tracksPriority",
            Self::TrackEncodingEnabled(_) => "trackEncodingEnabled",
            Self::TrackEncodingDisabled(_) => "trackEncodingDisabled",
            Self::UpdateEndpointMetadata(_) => "updateEndpointMetadata",
            Self::UpdateTrackMetadata(_) => "updateTrackMetadata",
            Self::Error(_) => "error",
            Self::Disconnect => "disconnect",
            Self::Custom(custom) => custom.name(),
        }
    }
}

impl CustomEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::OfferData(_) => "offerData",
            Self::SdpOffer(_) => "sdpOffer",
            Self::SdpAnswer(_) => "sdpAnswer",
            Self::Candidate(_) => "candidate",
            Self::RenegotiateTracks => "renegotiateTracks",
            Self::MuteTrack(_) => "muteTrack",
            Self::UnmuteTrack(_) => "unmuteTrack",
            Self::SetTargetTrackVariant(_) => "setTargetTrackVariant",
            Self::TrackVariantBitrates(_) => "trackVariantBitrates",
            Self::EncodingSwitched(_) => "encodingSwitched",
            Self::VadNotification(_) => "vadNotification",
            Self::BandwidthEstimation(_) => "bandwidthEstimation",
            Self::EnableTrackEncoding(_) => "enableTrackEncoding",
            Self::DisableTrackEncoding(_) => "disableTrackEncoding",
        }
    }
}

impl From<CustomEvent> for MediaEvent {
    fn from(event: CustomEvent) -> Self {
        MediaEvent::Custom(event)
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectData {
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedData {
    pub id: String,
    #[serde(default)]
    pub other_endpoints: Vec<EndpointInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub endpoint_type: String,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub tracks: BTreeMap<TrackId, TrackInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub simulcast_config: SimulcastConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointRemovedData {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointUpdatedData {
    pub id: String,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TracksAddedData {
    pub endpoint_id: String,
    pub tracks: BTreeMap<TrackId, TrackInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TracksRemovedData {
    pub endpoint_id: String,
    pub track_ids: Vec<TrackId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackUpdatedData {
    pub endpoint_id: String,
    pub track_id: TrackId,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracksPriorityData {
    pub tracks: Vec<TrackId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackEncodingData {
    pub endpoint_id: String,
    pub track_id: TrackId,
    pub encoding: TrackEncoding,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateEndpointMetadataData {
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTrackMetadataData {
    pub track_id: TrackId,
    pub track_metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TracksTypes {
    #[serde(default)]
    pub audio: usize,
    #[serde(default)]
    pub video: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnServer {
    pub server_addr: String,
    pub server_port: u16,
    pub transport: String,
    pub password: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferData {
    #[serde(default)]
    pub tracks_types: TracksTypes,
    #[serde(default)]
    pub integrated_turn_servers: Vec<TurnServer>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SdpOfferData {
    pub sdp_offer: SessionDescription,
    pub track_id_to_track_metadata: BTreeMap<TrackId, Value>,
    pub track_id_to_track_bitrates: BTreeMap<TrackId, TrackBitrates>,
    pub mid_to_track_id: BTreeMap<String, TrackId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SdpAnswerData {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
    #[serde(default)]
    pub mid_to_track_id: BTreeMap<String, TrackId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_m_line_index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackIdData {
    pub track_id: TrackId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetTrackVariantData {
    pub track_id: TrackId,
    pub variant: TrackEncoding,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackVariantBitratesData {
    pub track_id: TrackId,
    pub variant_bitrates: TrackBitrates,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodingSwitchedData {
    pub endpoint_id: String,
    pub track_id: TrackId,
    pub encoding: TrackEncoding,
    pub reason: EncodingReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VadNotificationData {
    pub track_id: TrackId,
    pub status: VadStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandwidthEstimationData {
    pub estimation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalTrackEncodingData {
    pub track_id: TrackId,
    pub encoding: TrackEncoding,
}
