//! Reactions to server events and engine events.

use std::collections::BTreeMap;
use std::time::Instant;

use str0m::media::{Direction, MediaKind};
use tracing::{debug, error, info, warn};

use crate::bandwidth::{default_bitrate, track_bitrates, TrackBitrates};
use crate::engine::{ConnectionState, EngineConfig, EngineEvent, MediaEngine};
use crate::model::{Endpoint, NegotiationStatus, TrackContext, TrackId};
use crate::protocol::events::*;
use crate::protocol::{CustomEvent, MediaEvent};
use crate::session::notification::Notification;
use crate::session::Session;

/// Bitrates to advertise for one local track.
fn advertised_bitrates<E: MediaEngine>(engine: &E, track: &TrackContext) -> TrackBitrates {
    let kind = track.kind.unwrap_or(MediaKind::Video);
    let params = match (&track.track, track.sender) {
        (Some(_), Some(sender)) => engine.sender_parameters(sender),
        _ => None,
    };
    track_bitrates(kind, params.as_deref()).unwrap_or_else(|e| {
        warn!("Bitrates of {} unavailable: {}", track.track_id, e);
        TrackBitrates::Single(default_bitrate(kind))
    })
}

impl<E: MediaEngine> Session<E> {
    pub(crate) fn handle_event(&mut self, now: Instant, event: MediaEvent) {
        match event {
            MediaEvent::Connected(data) => self.on_connected(data),
            MediaEvent::EndpointAdded(info) => self.on_endpoint_added(info),
            MediaEvent::EndpointRemoved(data) => self.on_endpoint_removed(data),
            MediaEvent::EndpointUpdated(data) => self.on_endpoint_updated(data),
            MediaEvent::TracksAdded(data) => self.on_tracks_added(data),
            MediaEvent::TracksRemoved(data) => self.on_tracks_removed(data),
            MediaEvent::TrackUpdated(data) => self.on_track_updated(data),
            MediaEvent::TracksPriority(data) => self.on_tracks_priority(data),
            MediaEvent::TrackEncodingEnabled(data) => self.on_remote_encoding(data, true),
            MediaEvent::TrackEncodingDisabled(data) => self.on_remote_encoding(data, false),
            MediaEvent::Error(data) => {
                error!("Signaling error: {}", data.message);
                self.notify(Notification::SignalingError { message: data.message });
                self.disconnect();
            }
            MediaEvent::Custom(custom) => self.handle_custom(now, custom),
            other @ (MediaEvent::Connect(_)
            | MediaEvent::UpdateEndpointMetadata(_)
            | MediaEvent::UpdateTrackMetadata(_)
            | MediaEvent::Disconnect) => {
                debug!("Ignoring client-bound event {}", other.name());
            }
        }
    }

    fn handle_custom(&mut self, now: Instant, event: CustomEvent) {
        match event {
            CustomEvent::OfferData(data) => self.on_offer_data(now, data),
            CustomEvent::SdpAnswer(answer) => self.on_sdp_answer(answer),
            CustomEvent::Candidate(candidate) => match self.engine.as_mut() {
                Some(engine) => {
                    if let Err(e) = engine.add_remote_candidate(&candidate) {
                        warn!("Remote candidate rejected: {}", e);
                    }
                }
                None => debug!("Dropping candidate received before the engine exists"),
            },
            CustomEvent::EncodingSwitched(data) => {
                let Some(track) = self.registry.remote_track_mut(&data.track_id) else {
                    warn!("Encoding switched on unknown track {}", data.track_id);
                    return;
                };
                track.encoding = Some(data.encoding);
                track.encoding_reason = Some(data.reason);
                let track = track.clone();
                self.notify(Notification::EncodingChanged(track));
            }
            CustomEvent::VadNotification(data) => {
                let Some(track) = self.registry.remote_track_mut(&data.track_id) else {
                    debug!("Voice activity for unknown track {}", data.track_id);
                    return;
                };
                track.vad_status = data.status;
                let track = track.clone();
                self.notify(Notification::VoiceActivityChanged(track));
            }
            CustomEvent::BandwidthEstimation(data) => {
                self.bandwidth_estimation = data.estimation;
                self.notify(Notification::BandwidthEstimationChanged(data.estimation));
            }
            other => debug!("Ignoring client-bound event {}", other.name()),
        }
    }

    fn endpoint_from_info(&self, info: EndpointInfo) -> Endpoint {
        let metadata = self.registry.parse_endpoint_metadata(info.metadata);
        let mut endpoint = Endpoint::new(info.id, info.endpoint_type, metadata);
        for (track_id, track) in info.tracks {
            let context = TrackContext::remote(
                track_id.clone(),
                &endpoint.id,
                self.registry.parse_track_metadata(track.metadata),
                track.simulcast_config,
            );
            endpoint.tracks.insert(track_id, context);
        }
        endpoint
    }

    fn on_connected(&mut self, data: ConnectedData) {
        info!("Connected as {} with {} other endpoints", data.id, data.other_endpoints.len());
        self.registry.set_local_id(&data.id);
        self.joined = true;

        for info in data.other_endpoints {
            let endpoint = self.endpoint_from_info(info);
            self.registry.add_endpoint(endpoint);
        }

        let other_endpoints = self.registry.remote_endpoints().cloned().collect();
        self.notify(Notification::Connected {
            endpoint_id: data.id,
            other_endpoints,
        });

        let tracks: Vec<TrackContext> = self.registry.remote_tracks().cloned().collect();
        for track in tracks {
            self.notify(Notification::TrackAdded(track));
        }

        self.handle_rejoined();
    }

    fn on_endpoint_added(&mut self, info: EndpointInfo) {
        if self.registry.is_local(&info.id) {
            return;
        }
        let endpoint = self.endpoint_from_info(info);
        let tracks: Vec<TrackContext> = endpoint.tracks.values().cloned().collect();
        self.registry.add_endpoint(endpoint.clone());
        self.notify(Notification::EndpointAdded(endpoint));
        for track in tracks {
            self.notify(Notification::TrackAdded(track));
        }
    }

    fn on_endpoint_removed(&mut self, data: EndpointRemovedData) {
        if self.registry.is_local(&data.id) {
            info!("Server removed the local endpoint");
            if let Some(manager) = &mut self.reconnect {
                manager.reset();
            }
            self.teardown();
            self.notify(Notification::Disconnected);
            return;
        }

        let Some((endpoint, tracks)) = self.registry.remove_endpoint(&data.id) else {
            warn!("Removal of unknown endpoint {}", data.id);
            return;
        };
        for track in tracks {
            self.notify(Notification::TrackRemoved(track));
        }
        self.notify(Notification::EndpointRemoved(endpoint));
    }

    fn on_endpoint_updated(&mut self, data: EndpointUpdatedData) {
        if self.registry.is_local(&data.id) {
            return;
        }
        match self.registry.update_endpoint_metadata(&data.id, data.metadata) {
            Some(endpoint) => {
                let endpoint = endpoint.clone();
                self.notify(Notification::EndpointUpdated(endpoint));
            }
            None => warn!("Update of unknown endpoint {}", data.id),
        }
    }

    fn on_tracks_added(&mut self, data: TracksAddedData) {
        if self.registry.is_local(&data.endpoint_id) {
            return;
        }
        self.renegotiation_in_flight = true;

        for (track_id, info) in data.tracks {
            let metadata = self.registry.parse_track_metadata(info.metadata);
            let context = TrackContext::remote(track_id, &data.endpoint_id, metadata, info.simulcast_config);
            if self.registry.upsert_track(context.clone()) {
                self.notify(Notification::TrackAdded(context));
            }
        }
    }

    fn on_tracks_removed(&mut self, data: TracksRemovedData) {
        if self.registry.is_local(&data.endpoint_id) {
            return;
        }
        self.renegotiation_in_flight = true;

        for track_id in data.track_ids {
            match self.registry.remove_track(&track_id) {
                Some(track) => self.notify(Notification::TrackRemoved(track)),
                None => debug!("Removal of unknown track {}", track_id),
            }
        }
    }

    fn on_track_updated(&mut self, data: TrackUpdatedData) {
        if self.registry.is_local(&data.endpoint_id) {
            return;
        }
        match self.registry.update_track_metadata(&data.track_id, data.metadata) {
            Some(track) => {
                let track = track.clone();
                self.notify(Notification::TrackUpdated(track));
            }
            None => warn!("Update of unknown track {}", data.track_id),
        }
    }

    fn on_tracks_priority(&mut self, data: TracksPriorityData) {
        let (enabled, disabled): (Vec<TrackContext>, Vec<TrackContext>) = self
            .registry
            .remote_tracks()
            .cloned()
            .partition(|t| data.tracks.contains(&t.track_id));
        self.notify(Notification::TracksPriorityChanged { enabled, disabled });
    }

    fn on_remote_encoding(&mut self, data: TrackEncodingData, enabled: bool) {
        let Some(track) = self.registry.remote_track_mut(&data.track_id) else {
            warn!("Encoding change on unknown track {}", data.track_id);
            return;
        };
        let disabled = &mut track.simulcast_config.disabled_encodings;
        disabled.retain(|e| *e != data.encoding);
        if !enabled {
            disabled.push(data.encoding);
        }

        let track = track.clone();
        let notification = if enabled {
            Notification::TrackEncodingEnabled {
                track,
                encoding: data.encoding,
            }
        } else {
            Notification::TrackEncodingDisabled {
                track,
                encoding: data.encoding,
            }
        };
        self.notify(notification);
    }

    fn on_offer_data(&mut self, now: Instant, data: OfferData) {
        if let Some(engine) = self.engine.as_mut() {
            engine.restart_ice();
        } else {
            let config = EngineConfig {
                turn_servers: data.integrated_turn_servers,
            };
            match (self.factory)(&config) {
                Ok(engine) => self.engine = Some(engine),
                Err(e) => {
                    error!("Failed to create media engine: {}", e);
                    self.notify(Notification::ConnectionError { message: e.to_string() });
                    self.trigger_reconnect(now);
                    return;
                }
            }

            let track_ids: Vec<TrackId> = self.registry.local_tracks().map(|t| t.track_id.clone()).collect();
            for track_id in track_ids {
                if let Err(e) = self.attach_local_track(&track_id) {
                    error!("Failed to attach track {}: {}", track_id, e);
                }
            }
            self.set_sendonly();
        }

        self.add_transceivers_if_needed(&data.tracks_types);
        self.create_and_send_offer();
    }

    /// Make sure there is a receiving transceiver for every track the server
    /// is about to send.
    fn add_transceivers_if_needed(&mut self, wanted: &TracksTypes) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        let transceivers = engine.transceivers();

        for (kind, count) in [(MediaKind::Audio, wanted.audio), (MediaKind::Video, wanted.video)] {
            let have = transceivers
                .iter()
                .filter(|t| t.kind == kind && t.direction == Direction::RecvOnly)
                .count();
            for _ in have..count {
                engine.add_recv_only(kind);
            }
        }
    }

    fn create_and_send_offer(&mut self) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };

        let sdp = match engine.create_offer() {
            Ok(sdp) => sdp,
            Err(e) => {
                error!("Failed to create offer: {}", e);
                return;
            }
        };
        if let Err(e) = engine.set_local_description(&sdp) {
            error!("Failed to apply local offer: {}", e);
            return;
        }

        let mut mid_to_track_id = BTreeMap::new();
        for transceiver in engine.transceivers() {
            let (Some(mid), Some(sender)) = (transceiver.mid, transceiver.sender) else {
                continue;
            };
            if let Some(track) = self.registry.local_tracks().find(|t| t.sender == Some(sender)) {
                mid_to_track_id.insert(mid.to_string(), track.track_id.clone());
            }
        }

        let mut track_id_to_track_metadata = BTreeMap::new();
        let mut track_id_to_track_bitrates = BTreeMap::new();
        for track in self.registry.local_tracks() {
            track_id_to_track_metadata.insert(track.track_id.clone(), track.metadata.raw.clone());
            track_id_to_track_bitrates.insert(track.track_id.clone(), advertised_bitrates(&*engine, track));
        }

        for track in self.registry.local_tracks_mut() {
            track.negotiation_status.advance(NegotiationStatus::Offered);
        }

        info!("Sending offer covering {} local tracks", mid_to_track_id.len());
        self.send(
            CustomEvent::SdpOffer(SdpOfferData {
                sdp_offer: SessionDescription {
                    sdp_type: SdpType::Offer,
                    sdp,
                },
                track_id_to_track_metadata,
                track_id_to_track_bitrates,
                mid_to_track_id,
            })
            .into(),
        );
    }

    fn on_sdp_answer(&mut self, answer: SdpAnswerData) {
        self.registry.set_mid_map(answer.mid_to_track_id.clone());

        for track_id in answer.mid_to_track_id.values() {
            let Some(track) = self.registry.local_track_mut(track_id) else {
                continue;
            };
            track.negotiation_status.advance(NegotiationStatus::Done);
            if !track.pending_metadata_update {
                continue;
            }
            track.pending_metadata_update = false;
            let metadata = track.metadata.raw.clone();

            self.send(MediaEvent::UpdateTrackMetadata(UpdateTrackMetadataData {
                track_id: track_id.clone(),
                track_metadata: metadata.clone(),
            }));
            self.notify(Notification::LocalTrackMetadataChanged {
                track_id: track_id.clone(),
                metadata,
            });
        }

        let Some(engine) = self.engine.as_mut() else {
            warn!("Answer received before the engine exists");
            return;
        };
        if let Err(e) = engine.set_remote_description(&answer.sdp) {
            error!("Failed to accept answer: {}", e);
            return;
        }

        // Encodings disabled while no sender existed.
        for track in self.registry.local_tracks() {
            let disabled = &track.simulcast_config.disabled_encodings;
            let Some(sender) = track.sender.filter(|_| !disabled.is_empty()) else {
                continue;
            };
            let Some(mut params) = engine.sender_parameters(sender) else {
                continue;
            };
            for encoding in params.iter_mut() {
                if encoding.rid.map_or(false, |rid| disabled.contains(&rid)) {
                    encoding.active = false;
                }
            }
            if let Err(e) = engine.set_sender_parameters(sender, params) {
                warn!("Failed to disable encodings of {}: {}", track.track_id, e);
            }
        }

        self.renegotiation_in_flight = false;
        self.process_next_command();
    }

    pub(crate) fn handle_engine_event(&mut self, now: Instant, event: EngineEvent) {
        match event {
            EngineEvent::SignalingStateChange(state) => {
                debug!("Signaling state {:?}", state);
                self.process_next_command();
            }
            EngineEvent::IceConnectionStateChange(state) => {
                debug!("ICE connection state {:?}", state);
                self.process_next_command();
            }
            EngineEvent::ConnectionStateChange(ConnectionState::Failed) => {
                warn!("Media connection failed");
                self.notify(Notification::ConnectionError {
                    message: "media connection failed".to_string(),
                });
                self.trigger_reconnect(now);
            }
            EngineEvent::ConnectionStateChange(state) => {
                debug!("Connection state {:?}", state);
                self.process_next_command();
            }
            EngineEvent::LocalCandidate(candidate) => {
                self.send(CustomEvent::Candidate(candidate).into());
            }
            EngineEvent::TrackArrived { mid, track, stream_id } => {
                let mid = mid.to_string();
                let Some(mapped) = self.registry.find_track_by_mid(&mid) else {
                    debug!("Media arrived on unmapped mid {}", mid);
                    return;
                };
                if self.registry.is_local(&mapped.endpoint_id) {
                    return;
                }
                let track_id = mapped.track_id.clone();
                let Some(context) = self.registry.remote_track_mut(&track_id) else {
                    debug!("Media arrived for unknown track {}", track_id);
                    return;
                };
                context.kind = Some(track.kind());
                context.track = Some(track);
                context.stream_id = stream_id;
                let context = context.clone();
                info!("Remote track {} ready", track_id);
                self.notify(Notification::TrackReady(context));
            }
        }
    }
}
