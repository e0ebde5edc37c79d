//! Data models for a media session
//!
//! This module contains the endpoint and track structures that make up the
//! session state, and the registry that owns them.

pub mod endpoint;
pub mod metadata;
pub mod registry;
pub mod tracks;

pub use endpoint::Endpoint;
pub use metadata::{Metadata, MetadataParser};
pub use registry::TrackRegistry;
pub use tracks::{
    BandwidthLimit, EncodingReason, MediaTrack, NegotiationStatus, SimulcastConfig, TrackContext,
    TrackEncoding, TrackId, VadStatus,
};
