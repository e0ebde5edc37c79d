//! Session configuration.

use std::fmt;
use std::time::Duration;

use crate::model::metadata::{passthrough, MetadataParser};

/// Bounded-backoff settings for automatic reconnection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    /// Added once per previous attempt.
    pub delay: Duration,
    /// Re-publish the local tracks that were live when the connection broke.
    pub add_tracks_on_reconnect: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        ReconnectConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            delay: Duration::from_millis(500),
            add_tracks_on_reconnect: true,
        }
    }
}

#[derive(Clone)]
pub struct SessionConfig {
    pub endpoint_metadata_parser: MetadataParser,
    pub track_metadata_parser: MetadataParser,
    /// `None` disables automatic reconnection.
    pub reconnect: Option<ReconnectConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            endpoint_metadata_parser: passthrough(),
            track_metadata_parser: passthrough(),
            reconnect: Some(ReconnectConfig::default()),
        }
    }
}

impl SessionConfig {
    pub fn with_endpoint_metadata_parser(mut self, parser: MetadataParser) -> Self {
        self.endpoint_metadata_parser = parser;
        self
    }

    pub fn with_track_metadata_parser(mut self, parser: MetadataParser) -> Self {
        self.track_metadata_parser = parser;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = Some(reconnect);
        self
    }

    pub fn without_reconnect(mut self) -> Self {
        self.reconnect = None;
        self
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("reconnect", &self.reconnect)
            .finish_non_exhaustive()
    }
}
