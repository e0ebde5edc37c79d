use indexmap::IndexMap;

use crate::model::metadata::Metadata;
use crate::model::tracks::{TrackContext, TrackId};

/// Endpoint type tag used by media-producing participants.
pub const WEBRTC_ENDPOINT: &str = "webrtc";

/// A participant in the session, local or remote.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// Empty for the local endpoint until the server assigns it.
    pub id: String,
    pub endpoint_type: String,
    pub metadata: Metadata,
    pub tracks: IndexMap<TrackId, TrackContext>,
}

impl Endpoint {
    pub fn new(id: impl Into<String>, endpoint_type: impl Into<String>, metadata: Metadata) -> Endpoint {
        Endpoint {
            id: id.into(),
            endpoint_type: endpoint_type.into(),
            metadata,
            tracks: IndexMap::new(),
        }
    }

    pub fn local() -> Endpoint {
        Endpoint::new("", WEBRTC_ENDPOINT, Metadata::default())
    }
}
