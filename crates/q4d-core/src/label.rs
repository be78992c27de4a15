//! Label-update messages published back to the torrent client.
//!
//! Wire format: `<hash>\t<DONE|NOPE>`.

use std::fmt;
use std::str::FromStr;

/// Label applied to the originating torrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    /// Transfer completed.
    Done,
    /// Transfer failed terminally.
    Nope,
}

impl Label {
    /// Wire token for the label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Done => "DONE",
            Self::Nope => "NOPE",
        }
    }
}

/// A label-update notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMessage {
    /// Torrent info-hash the label applies to.
    pub hash: String,
    /// Label to apply.
    pub label: Label,
}

impl LabelMessage {
    /// Build a message for `hash`.
    #[must_use]
    pub fn new(hash: impl Into<String>, label: Label) -> Self {
        Self {
            hash: hash.into(),
            label,
        }
    }

    /// Encode to the bus payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for LabelMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}", self.hash, self.label.as_str())
    }
}

impl FromStr for LabelMessage {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (hash, label) = value
            .split_once('\t')
            .ok_or_else(|| format!("label message without separator: {value}"))?;
        let label = match label.trim() {
            "DONE" => Label::Done,
            "NOPE" => Label::Nope,
            other => return Err(format!("unknown label `{other}`")),
        };
        Ok(Self::new(hash, label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_hash_and_label_with_tab() {
        let message = LabelMessage::new("abc123", Label::Done);
        assert_eq!(message.encode(), b"abc123\tDONE".to_vec());
        assert_eq!(
            LabelMessage::new("abc123", Label::Nope).to_string(),
            "abc123\tNOPE"
        );
    }

    #[test]
    fn parses_wire_format() {
        assert_eq!(
            "abc\tNOPE".parse::<LabelMessage>(),
            Ok(LabelMessage::new("abc", Label::Nope))
        );
        assert!("abc DONE".parse::<LabelMessage>().is_err());
        assert!("abc\tMAYBE".parse::<LabelMessage>().is_err());
    }
}
