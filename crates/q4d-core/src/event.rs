//! Inbound "payload finished" notifications.
//!
//! # Design
//! - Two wire shapes are accepted: a JSON object, and the tab-separated
//!   `path<TAB>hash<TAB>category` line emitted by the seedbox scripts.
//! - An `Event` can only be built through validating constructors, so a
//!   held value always has a non-empty path and hash.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MalformedEvent;

/// Hash value sent by seedbox scripts that cannot supply a real info-hash.
pub const NO_HASH_SENTINEL: &str = "NotUsed";

/// A decoded, validated notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    payload_name: String,
    payload_path: String,
    payload_hash: String,
    category_code: String,
    received_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct WireEvent {
    #[serde(default, alias = "payload_name")]
    name: Option<String>,
    #[serde(alias = "payload_path")]
    path: String,
    #[serde(alias = "payload_hash")]
    hash: String,
    #[serde(alias = "category_code", alias = "type")]
    category: String,
}

impl Event {
    /// Build an event from its parts.
    ///
    /// An empty `payload_name` is derived from the last segment of the path.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedEvent::EmptyField`] when the path, hash or category
    /// is empty.
    pub fn new(
        payload_name: impl Into<String>,
        payload_path: impl Into<String>,
        payload_hash: impl Into<String>,
        category_code: impl Into<String>,
        received_at: DateTime<Utc>,
    ) -> Result<Self, MalformedEvent> {
        let payload_path = payload_path.into().trim().to_string();
        let payload_hash = payload_hash.into().trim().to_string();
        if payload_path.is_empty() {
            return Err(MalformedEvent::EmptyField {
                field: "payload_path",
            });
        }
        if payload_hash.is_empty() {
            return Err(MalformedEvent::EmptyField {
                field: "payload_hash",
            });
        }
        let category_code = category_code.into().trim().to_string();
        if category_code.is_empty() {
            return Err(MalformedEvent::EmptyField {
                field: "category_code",
            });
        }
        let mut payload_name = payload_name.into().trim().to_string();
        if payload_name.is_empty() {
            payload_name = last_segment(&payload_path).to_string();
        }
        Ok(Self {
            payload_name,
            payload_path,
            payload_hash,
            category_code,
            received_at,
        })
    }

    /// Decode a raw bus payload.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedEvent`] when the payload is not UTF-8, does not
    /// parse, or lacks a path, hash or category.
    pub fn decode(payload: &[u8], received_at: DateTime<Utc>) -> Result<Self, MalformedEvent> {
        let text = std::str::from_utf8(payload).map_err(|_| MalformedEvent::NotUtf8)?;
        let text = text.trim_matches(|c: char| c == '\n' || c == '\r' || c == ' ');

        if text.starts_with('{') {
            let wire: WireEvent =
                serde_json::from_str(text).map_err(|source| MalformedEvent::Json { source })?;
            return Self::new(
                wire.name.unwrap_or_default(),
                wire.path,
                wire.hash,
                wire.category,
                received_at,
            );
        }

        let fields: Vec<&str> = text.split('\t').collect();
        let [path, hash, category, ..] = fields.as_slice() else {
            return Err(MalformedEvent::MissingFields {
                found: fields.len(),
            });
        };
        Self::new("", *path, *hash, *category, received_at)
    }

    /// Display name of the payload.
    #[must_use]
    pub fn payload_name(&self) -> &str {
        &self.payload_name
    }

    /// Location of the payload on the seedbox.
    #[must_use]
    pub fn payload_path(&self) -> &str {
        &self.payload_path
    }

    /// Torrent info-hash, or [`NO_HASH_SENTINEL`].
    #[must_use]
    pub fn payload_hash(&self) -> &str {
        &self.payload_hash
    }

    /// Category code used to pick a destination.
    #[must_use]
    pub fn category_code(&self) -> &str {
        &self.category_code
    }

    /// When the client received the notification.
    #[must_use]
    pub const fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Whether a label update can be addressed to the originating torrent.
    #[must_use]
    pub fn has_hash(&self) -> bool {
        self.payload_hash != NO_HASH_SENTINEL
    }
}

fn last_segment(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .unwrap_or(path)
}
