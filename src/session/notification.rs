use serde_json::Value;

use crate::model::{Endpoint, MediaTrack, TrackContext, TrackEncoding, TrackId};

/// Something the host should know about.
///
/// Payloads are snapshots taken when the notification was queued, later
/// changes to the session are not reflected in them.
#[derive(Debug, Clone)]
pub enum Notification {
    Connected {
        endpoint_id: String,
        other_endpoints: Vec<Endpoint>,
    },
    Disconnected,

    TrackAdded(TrackContext),
    /// Media for a remote track started flowing.
    TrackReady(TrackContext),
    TrackUpdated(TrackContext),
    TrackRemoved(TrackContext),
    EndpointAdded(Endpoint),
    EndpointUpdated(Endpoint),
    EndpointRemoved(Endpoint),
    EncodingChanged(TrackContext),
    TrackEncodingEnabled {
        track: TrackContext,
        encoding: TrackEncoding,
    },
    TrackEncodingDisabled {
        track: TrackContext,
        encoding: TrackEncoding,
    },
    VoiceActivityChanged(TrackContext),
    BandwidthEstimationChanged(f64),
    TracksPriorityChanged {
        enabled: Vec<TrackContext>,
        disabled: Vec<TrackContext>,
    },
    TargetTrackEncodingRequested {
        track_id: TrackId,
        variant: TrackEncoding,
    },

    LocalTrackAdded(TrackContext),
    LocalTrackRemoved {
        track_id: TrackId,
    },
    LocalTrackReplaced {
        track_id: TrackId,
        track: Option<MediaTrack>,
    },
    LocalTrackMuted {
        track_id: TrackId,
    },
    LocalTrackUnmuted {
        track_id: TrackId,
    },
    LocalTrackMetadataChanged {
        track_id: TrackId,
        metadata: Value,
    },
    LocalEndpointMetadataChanged {
        metadata: Value,
    },
    LocalTrackBandwidthSet {
        track_id: TrackId,
        bandwidth: u32,
    },
    LocalTrackEncodingBandwidthSet {
        track_id: TrackId,
        encoding: TrackEncoding,
        bandwidth: u32,
    },
    LocalTrackEncodingEnabled {
        track_id: TrackId,
        encoding: TrackEncoding,
    },
    LocalTrackEncodingDisabled {
        track_id: TrackId,
        encoding: TrackEncoding,
    },

    SignalingError {
        message: String,
    },
    ConnectionError {
        message: String,
    },
    ReconnectionStarted,
    Reconnected,
    ReconnectionRetriesLimitReached,
}

impl Notification {
    pub fn name(&self) -> &'static str {
        match self {
            Notification::Connected { .. } => "connected",
            Notification::Disconnected => "disconnected",
            Notification::TrackAdded(_) => "trackAdded",
            Notification::TrackReady(_) => "trackReady",
            Notification::TrackUpdated(_) => "trackUpdated",
            Notification::TrackRemoved(_) => "trackRemoved",
            Notification::EndpointAdded(_) => "endpointAdded",
            Notification::EndpointUpdated(_) => "endpointUpdated",
            Notification::EndpointRemoved(_) => "endpointRemoved",
            Notification::EncodingChanged(_) => "encodingChanged",
            Notification::TrackEncodingEnabled { .. } => "trackEncodingEnabled",
            Notification::TrackEncodingDisabled { .. } => "trackEncodingDisabled",
            Notification::VoiceActivityChanged(_) => "voiceActivityChanged",
            Notification::BandwidthEstimationChanged(_) => "bandwidthEstimationChanged",
            Notification::TracksPriorityChanged { .. } => "tracksPriorityChanged",
            Notification::TargetTrackEncodingRequested { .. } => "targetTrackEncodingRequested",
            Notification::LocalTrackAdded(_) => "localTrackAdded",
            Notification::LocalTrackRemoved { .. } => "localTrackRemoved",
            Notification::LocalTrackReplaced { .. } => "localTrackReplaced",
            Notification::LocalTrackMuted { .. } => "localTrackMuted",
            Notification::LocalTrackUnmuted { .. } => "localTrackUnmuted",
            Notification::LocalTrackMetadataChanged { .. } => "localTrackMetadataChanged",
            Notification::LocalEndpointMetadataChanged { .. } => "localEndpointMetadataChanged",
            Notification::LocalTrackBandwidthSet { .. } => "localTrackBandwidthSet",
            Notification::LocalTrackEncodingBandwidthSet { .. } => "localTrackEncodingBandwidthSet",
            Notification::LocalTrackEncodingEnabled { .. } => "localTrackEncodingEnabled",
            Notification::LocalTrackEncodingDisabled { .. } => "localTrackEncodingDisabled",
            Notification::SignalingError { .. } => "signalingError",
            Notification::ConnectionError { .. } => "connectionError",
            Notification::ReconnectionStarted => "reconnectionStarted",
            Notification::Reconnected => "reconnected",
            Notification::ReconnectionRetriesLimitReached => "reconnectionRetriesLimitReached",
        }
    }
}
