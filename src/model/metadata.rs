//! Endpoint and track metadata with fallible parsing.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

/// Validates or transforms raw metadata received from, or sent to, the server.
pub type MetadataParser = Arc<dyn Fn(&Value) -> Result<Value, String> + Send + Sync>;

/// Parser that accepts any value unchanged.
pub fn passthrough() -> MetadataParser {
    Arc::new(|raw: &Value| Ok(raw.clone()))
}

/// Raw metadata together with the outcome of the configured parser.
///
/// A parse failure never discards the raw value: `parsed` is cleared and the
/// error is kept so the owner can still see what the server sent.
#[derive(Clone, PartialEq, Default)]
pub struct Metadata {
    pub raw: Value,
    pub parsed: Option<Value>,
    pub parsing_error: Option<String>,
}

impl Metadata {
    pub fn parse(raw: Value, parser: &MetadataParser) -> Metadata {
        let mut metadata = Metadata::default();
        metadata.update(raw, parser);
        metadata
    }

    pub fn update(&mut self, raw: Value, parser: &MetadataParser) {
        match parser(&raw) {
            Ok(parsed) => {
                self.parsed = Some(parsed);
                self.parsing_error = None;
            }
            Err(e) => {
                warn!("Metadata parsing failed: {}", e);
                self.parsed = None;
                self.parsing_error = Some(e);
            }
        }
        self.raw = raw;
    }

    pub fn is_valid(&self) -> bool {
        self.parsing_error.is_none()
    }
}

impl fmt::Debug for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metadata")
            .field("raw", &self.raw)
            .field("parsing_error", &self.parsing_error)
            .finish()
    }
}
