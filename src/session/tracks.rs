//! Local track operations that bypass the command queue.

use std::collections::HashMap;

use serde_json::Value;
use str0m::media::MediaKind;
use tracing::{debug, info, warn};

use crate::bandwidth::{apply_bandwidth_limitation, kbps_to_bps, track_bitrates, TrackBitrates};
use crate::engine::{MediaEngine, StatsEntry};
use crate::error::{CommandError, Result, SessionError};
use crate::model::{BandwidthLimit, NegotiationStatus, TrackEncoding, TrackId};
use crate::protocol::events::*;
use crate::protocol::{CustomEvent, MediaEvent};
use crate::session::notification::Notification;
use crate::session::Session;

impl<E: MediaEngine> Session<E> {
    pub fn update_endpoint_metadata(&mut self, metadata: Value) {
        self.registry.update_local_metadata(metadata.clone());
        if let Some(manager) = &mut self.reconnect {
            manager.remember_metadata(&metadata);
        }
        self.send(MediaEvent::UpdateEndpointMetadata(UpdateEndpointMetadataData {
            metadata: metadata.clone(),
        }));
        self.notify(Notification::LocalEndpointMetadataChanged { metadata });
    }

    /// Update a local track's metadata.
    ///
    /// The server only learns about it once the track has been negotiated; an
    /// update made while an offer is outstanding is sent with the answer.
    pub fn update_track_metadata(&mut self, track_id: &TrackId, metadata: Value) -> Result<()> {
        let Some(track) = self.registry.update_local_track_metadata(track_id, metadata.clone()) else {
            return Err(CommandError::UnknownTrack(track_id.clone()).into());
        };

        let status = track.negotiation_status;
        match status {
            NegotiationStatus::Done => {
                self.send(MediaEvent::UpdateTrackMetadata(UpdateTrackMetadataData {
                    track_id: track_id.clone(),
                    track_metadata: metadata.clone(),
                }));
                self.notify(Notification::LocalTrackMetadataChanged {
                    track_id: track_id.clone(),
                    metadata,
                });
            }
            NegotiationStatus::Offered => {
                if let Some(track) = self.registry.local_track_mut(track_id) {
                    track.pending_metadata_update = true;
                }
            }
            NegotiationStatus::Awaiting => {
                debug!("Track {} not offered yet, metadata kept locally", track_id);
            }
        }
        Ok(())
    }

    /// Ask the server to forward `encoding` of a remote simulcast track.
    pub fn set_target_track_encoding(&mut self, track_id: &TrackId, encoding: TrackEncoding) {
        let Some(track) = self.registry.remote_tracks().find(|t| &t.track_id == track_id) else {
            warn!("Cannot target an encoding of unknown remote track {}", track_id);
            return;
        };
        let simulcast = &track.simulcast_config;
        if !simulcast.enabled || !simulcast.active_encodings.contains(&encoding) {
            warn!("Track {} does not offer encoding {}", track_id, encoding);
            return;
        }

        self.send(
            CustomEvent::SetTargetTrackVariant(TargetTrackVariantData {
                track_id: track_id.clone(),
                variant: encoding,
            })
            .into(),
        );
        self.notify(Notification::TargetTrackEncodingRequested {
            track_id: track_id.clone(),
            variant: encoding,
        });
    }

    pub fn enable_track_encoding(&mut self, track_id: &TrackId, encoding: TrackEncoding) -> Result<()> {
        self.set_encoding_active(track_id, encoding, true)
    }

    pub fn disable_track_encoding(&mut self, track_id: &TrackId, encoding: TrackEncoding) -> Result<()> {
        self.set_encoding_active(track_id, encoding, false)
    }

    fn set_encoding_active(&mut self, track_id: &TrackId, encoding: TrackEncoding, active: bool) -> Result<()> {
        let Some(track) = self.registry.local_track_mut(track_id) else {
            return Err(CommandError::UnknownTrack(track_id.clone()).into());
        };

        // Applied to the sender now, or after the next answer if there is none.
        if let (Some(engine), Some(sender)) = (self.engine.as_mut(), track.sender) {
            if let Some(mut params) = engine.sender_parameters(sender) {
                let layer = params
                    .iter_mut()
                    .find(|p| p.rid == Some(encoding))
                    .ok_or_else(|| SessionError::UnknownEncoding(encoding.to_string()))?;
                layer.active = active;
                engine.set_sender_parameters(sender, params)?;
            }
        }

        let disabled = &mut track.simulcast_config.disabled_encodings;
        disabled.retain(|e| *e != encoding);
        if !active {
            disabled.push(encoding);
        }

        let data = LocalTrackEncodingData {
            track_id: track_id.clone(),
            encoding,
        };
        let track_id = track_id.clone();
        if active {
            self.send(CustomEvent::EnableTrackEncoding(data).into());
            self.notify(Notification::LocalTrackEncodingEnabled { track_id, encoding });
        } else {
            self.send(CustomEvent::DisableTrackEncoding(data).into());
            self.notify(Notification::LocalTrackEncodingDisabled { track_id, encoding });
        }
        Ok(())
    }

    /// Cap the total bitrate of a local track, in kbps. Zero lifts the cap.
    ///
    /// Returns `false` when the track has no sender yet; the limit is kept and
    /// applied when it gets one.
    pub fn set_track_bandwidth(&mut self, track_id: &TrackId, bandwidth: u32) -> Result<bool> {
        let Some(track) = self.registry.local_track_mut(track_id) else {
            return Err(CommandError::UnknownTrack(track_id.clone()).into());
        };
        let limit = BandwidthLimit::Single(bandwidth);
        track.max_bandwidth = limit.clone();
        let kind = track.kind.unwrap_or(MediaKind::Video);

        let (Some(engine), Some(sender)) = (self.engine.as_mut(), track.sender) else {
            debug!("Track {} has no sender, limit stored", track_id);
            return Ok(false);
        };
        let Some(mut params) = engine.sender_parameters(sender) else {
            return Ok(false);
        };
        apply_bandwidth_limitation(&mut params, &limit);
        let bitrates = track_bitrates(kind, Some(params.as_slice()))?;
        engine.set_sender_parameters(sender, params)?;

        info!("Track {} limited to {} kbps", track_id, bandwidth);
        self.send_variant_bitrates(track_id, bitrates);
        self.notify(Notification::LocalTrackBandwidthSet {
            track_id: track_id.clone(),
            bandwidth,
        });
        Ok(true)
    }

    /// Cap one simulcast encoding of a local track, in kbps.
    ///
    /// Only simulcast video tracks have encodings to cap. The limit is kept
    /// when the track has no sender yet, as with [`Session::set_track_bandwidth`].
    pub fn set_encoding_bandwidth(
        &mut self,
        track_id: &TrackId,
        encoding: TrackEncoding,
        bandwidth: u32,
    ) -> Result<bool> {
        let Some(track) = self.registry.local_track_mut(track_id) else {
            return Err(CommandError::UnknownTrack(track_id.clone()).into());
        };
        if !track.simulcast_config.enabled || track.kind != Some(MediaKind::Video) {
            return Err(SessionError::UnknownEncoding(encoding.to_string()));
        }

        let bitrates = match (self.engine.as_mut(), track.sender) {
            (Some(engine), Some(sender)) => match engine.sender_parameters(sender) {
                Some(mut params) => {
                    let layer = params
                        .iter_mut()
                        .find(|p| p.rid == Some(encoding))
                        .ok_or_else(|| SessionError::UnknownEncoding(encoding.to_string()))?;
                    layer.max_bitrate = kbps_to_bps(bandwidth);
                    let bitrates = track_bitrates(MediaKind::Video, Some(params.as_slice()))?;
                    engine.set_sender_parameters(sender, params)?;
                    Some(bitrates)
                }
                None => None,
            },
            _ => None,
        };

        if let BandwidthLimit::Simulcast(limits) = &mut track.max_bandwidth {
            limits.insert(encoding, bandwidth);
        } else {
            track.max_bandwidth = BandwidthLimit::Simulcast(HashMap::from([(encoding, bandwidth)]));
        }

        let Some(bitrates) = bitrates else {
            debug!("Track {} has no sender, encoding limit stored", track_id);
            return Ok(false);
        };
        self.send_variant_bitrates(track_id, bitrates);
        self.notify(Notification::LocalTrackEncodingBandwidthSet {
            track_id: track_id.clone(),
            encoding,
            bandwidth,
        });
        Ok(true)
    }

    fn send_variant_bitrates(&mut self, track_id: &TrackId, variant_bitrates: TrackBitrates) {
        self.send(
            CustomEvent::TrackVariantBitrates(TrackVariantBitratesData {
                track_id: track_id.clone(),
                variant_bitrates,
            })
            .into(),
        );
    }

    /// Engine statistics for a local track, or for the whole connection.
    pub fn get_stats(&self, track_id: Option<&TrackId>) -> Vec<StatsEntry> {
        let Some(engine) = self.engine.as_ref() else {
            return vec![];
        };
        match track_id {
            Some(track_id) => match self.registry.local_track(track_id).and_then(|t| t.sender) {
                Some(sender) => engine.stats(Some(sender)),
                None => vec![],
            },
            None => engine.stats(None),
        }
    }
}
