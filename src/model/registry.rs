//! Track registry
//!
//! Single source of truth for the endpoints and tracks of a session, plus the
//! mid ↔ track id correspondence learned from the latest SDP answer.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, warn};

use crate::model::endpoint::Endpoint;
use crate::model::metadata::{passthrough, Metadata, MetadataParser};
use crate::model::tracks::{TrackContext, TrackId};

pub struct TrackRegistry {
    local: Endpoint,
    remotes: IndexMap<String, Endpoint>,
    /// Remote track id → owning endpoint id.
    track_index: HashMap<TrackId, String>,
    mid_to_track: HashMap<String, TrackId>,
    endpoint_parser: MetadataParser,
    track_parser: MetadataParser,
}

impl Default for TrackRegistry {
    fn default() -> Self {
        TrackRegistry::new(passthrough(), passthrough())
    }
}

impl TrackRegistry {
    pub fn new(endpoint_parser: MetadataParser, track_parser: MetadataParser) -> TrackRegistry {
        TrackRegistry {
            local: Endpoint::local(),
            remotes: IndexMap::new(),
            track_index: HashMap::new(),
            mid_to_track: HashMap::new(),
            endpoint_parser,
            track_parser,
        }
    }

    pub fn parse_endpoint_metadata(&self, raw: Value) -> Metadata {
        Metadata::parse(raw, &self.endpoint_parser)
    }

    pub fn parse_track_metadata(&self, raw: Value) -> Metadata {
        Metadata::parse(raw, &self.track_parser)
    }

    pub fn local(&self) -> &Endpoint {
        &self.local
    }

    pub fn local_id(&self) -> &str {
        &self.local.id
    }

    pub fn is_local(&self, endpoint_id: &str) -> bool {
        !self.local.id.is_empty() && self.local.id == endpoint_id
    }

    pub fn set_local_id(&mut self, id: impl Into<String>) {
        self.local.id = id.into();
        let id = self.local.id.clone();
        for track in self.local.tracks.values_mut() {
            track.endpoint_id = id.clone();
        }
    }

    pub fn update_local_metadata(&mut self, raw: Value) {
        self.local.metadata.update(raw, &self.endpoint_parser);
    }

    // -----------------------------------------------------------------
    // Endpoints
    // -----------------------------------------------------------------

    /// Register a remote endpoint. Returns `false` for the local id.
    pub fn add_endpoint(&mut self, endpoint: Endpoint) -> bool {
        if self.is_local(&endpoint.id) {
            return false;
        }
        for track_id in endpoint.tracks.keys() {
            self.track_index.insert(track_id.clone(), endpoint.id.clone());
        }
        self.remotes.insert(endpoint.id.clone(), endpoint);
        true
    }

    /// Remove a remote endpoint and every track it owns.
    ///
    /// The removed tracks are returned in insertion order so callers can
    /// notify about each of them before the endpoint itself.
    pub fn remove_endpoint(&mut self, endpoint_id: &str) -> Option<(Endpoint, Vec<TrackContext>)> {
        let mut endpoint = self.remotes.shift_remove(endpoint_id)?;
        let tracks: Vec<TrackContext> = endpoint.tracks.drain(..).map(|(_, t)| t).collect();

        for track in &tracks {
            self.track_index.remove(&track.track_id);
        }
        self.mid_to_track
            .retain(|_, track_id| !tracks.iter().any(|t| &t.track_id == track_id));

        Some((endpoint, tracks))
    }

    pub fn endpoint(&self, endpoint_id: &str) -> Option<&Endpoint> {
        if self.is_local(endpoint_id) {
            return Some(&self.local);
        }
        self.remotes.get(endpoint_id)
    }

    pub fn remote_endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.remotes.values()
    }

    pub fn update_endpoint_metadata(&mut self, endpoint_id: &str, raw: Value) -> Option<&Endpoint> {
        let endpoint = self.remotes.get_mut(endpoint_id)?;
        endpoint.metadata.update(raw, &self.endpoint_parser);
        Some(&*endpoint)
    }

    // -----------------------------------------------------------------
    // Remote tracks
    // -----------------------------------------------------------------

    /// Insert or replace a remote track. Fails if its endpoint is unknown.
    pub fn upsert_track(&mut self, track: TrackContext) -> bool {
        let Some(endpoint) = self.remotes.get_mut(&track.endpoint_id) else {
            warn!("Track {} references unknown endpoint {}", track.track_id, track.endpoint_id);
            return false;
        };
        self.track_index
            .insert(track.track_id.clone(), track.endpoint_id.clone());
        endpoint.tracks.insert(track.track_id.clone(), track);
        true
    }

    pub fn remove_track(&mut self, track_id: &TrackId) -> Option<TrackContext> {
        let endpoint_id = self.track_index.remove(track_id)?;
        self.mid_to_track.retain(|_, t| t != track_id);
        self.remotes
            .get_mut(&endpoint_id)
            .and_then(|e| e.tracks.shift_remove(track_id))
    }

    pub fn track(&self, track_id: &TrackId) -> Option<&TrackContext> {
        if let Some(track) = self.local.tracks.get(track_id) {
            return Some(track);
        }
        let endpoint_id = self.track_index.get(track_id)?;
        self.remotes.get(endpoint_id)?.tracks.get(track_id)
    }

    pub fn remote_track_mut(&mut self, track_id: &TrackId) -> Option<&mut TrackContext> {
        let endpoint_id = self.track_index.get(track_id)?;
        self.remotes.get_mut(endpoint_id)?.tracks.get_mut(track_id)
    }

    pub fn remote_tracks(&self) -> impl Iterator<Item = &TrackContext> {
        self.remotes.values().flat_map(|e| e.tracks.values())
    }

    pub fn update_track_metadata(&mut self, track_id: &TrackId, raw: Value) -> Option<&TrackContext> {
        let parser = self.track_parser.clone();
        let track = self.remote_track_mut(track_id)?;
        track.update_metadata(raw, &parser);
        Some(&*track)
    }

    // -----------------------------------------------------------------
    // Local tracks
    // -----------------------------------------------------------------

    pub fn insert_local_track(&mut self, track: TrackContext) {
        self.local.tracks.insert(track.track_id.clone(), track);
    }

    pub fn remove_local_track(&mut self, track_id: &TrackId) -> Option<TrackContext> {
        self.mid_to_track.retain(|_, t| t != track_id);
        self.local.tracks.shift_remove(track_id)
    }

    pub fn local_track(&self, track_id: &TrackId) -> Option<&TrackContext> {
        self.local.tracks.get(track_id)
    }

    pub fn local_track_mut(&mut self, track_id: &TrackId) -> Option<&mut TrackContext> {
        self.local.tracks.get_mut(track_id)
    }

    pub fn local_tracks(&self) -> impl Iterator<Item = &TrackContext> {
        self.local.tracks.values()
    }

    pub fn local_tracks_mut(&mut self) -> impl Iterator<Item = &mut TrackContext> {
        self.local.tracks.values_mut()
    }

    /// Find a local track by the id of its media handle.
    pub fn local_track_by_handle_id(&self, handle_id: &str) -> Option<&TrackContext> {
        self.local
            .tracks
            .values()
            .find(|t| t.track.as_ref().map(|h| h.id()) == Some(handle_id))
    }

    pub fn update_local_track_metadata(&mut self, track_id: &TrackId, raw: Value) -> Option<&TrackContext> {
        let parser = self.track_parser.clone();
        let track = self.local.tracks.get_mut(track_id)?;
        track.update_metadata(raw, &parser);
        Some(&*track)
    }

    // -----------------------------------------------------------------
    // Mids
    // -----------------------------------------------------------------

    pub fn set_mid_map(&mut self, mids: impl IntoIterator<Item = (String, TrackId)>) {
        self.mid_to_track = mids.into_iter().collect();
        debug!("Mid map now holds {} entries", self.mid_to_track.len());
    }

    pub fn track_id_by_mid(&self, mid: &str) -> Option<&TrackId> {
        self.mid_to_track.get(mid)
    }

    pub fn find_track_by_mid(&self, mid: &str) -> Option<&TrackContext> {
        self.track_id_by_mid(mid).and_then(|id| self.track(id))
    }

    /// Drop everything learned from the server. Local metadata survives so a
    /// later connect can reuse it.
    pub fn reset(&mut self) {
        self.local.id.clear();
        self.local.tracks.clear();
        self.remotes.clear();
        self.track_index.clear();
        self.mid_to_track.clear();
    }
}
