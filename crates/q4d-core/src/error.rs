//! Error types for event decoding and category resolution.

use thiserror::Error;

/// Inbound message that cannot be turned into an event.
#[derive(Debug, Error)]
pub enum MalformedEvent {
    /// Payload bytes were not UTF-8.
    #[error("event payload is not valid utf-8")]
    NotUtf8,
    /// JSON payload could not be decoded.
    #[error("event payload is not a valid json event")]
    Json {
        /// Underlying serde error.
        source: serde_json::Error,
    },
    /// Tab-separated payload had too few fields.
    #[error("event payload has too few fields")]
    MissingFields {
        /// Number of fields present.
        found: usize,
    },
    /// A required field was empty.
    #[error("event field is empty")]
    EmptyField {
        /// Name of the empty field.
        field: &'static str,
    },
}

/// Category code with no mapping and no default destination.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown category code")]
pub struct UnknownCategory {
    /// Code carried by the event.
    pub code: String,
}
