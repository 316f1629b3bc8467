//! Notification payload decoding.
//!
//! Two payload shapes are accepted:
//! - a bare image reference (`registry/repository:tag`), the legacy contract
//! - a versioned JSON envelope:
//!
//! ```json
//! {"version": 1, "kind": "launch", "image": "nginx:1.27", "pull_if_missing": true}
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::NotificationError;

/// Envelope version understood by this build.
pub const ENVELOPE_VERSION: u32 = 1;

/// Kind of action an envelope requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationKind {
    /// Create and start a container from the image.
    Launch,
}

/// Versioned notification envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    pub version: u32,

    /// Kept as a string so unknown kinds produce a precise error.
    pub kind: String,

    pub image: String,

    /// Overrides the configured pull-if-missing behavior.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_if_missing: Option<bool>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// A decoded notification.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageNotification {
    pub kind: NotificationKind,
    pub image: String,
    pub pull_if_missing: Option<bool>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ImageNotification {
    /// Decode a raw payload.
    pub fn parse(payload: &str) -> Result<Self, NotificationError> {
        let trimmed = payload.trim();
        if trimmed.is_empty() {
            return Err(NotificationError::Empty);
        }

        if !trimmed.starts_with('{') {
            return Ok(Self {
                kind: NotificationKind::Launch,
                image: trimmed.to_string(),
                pull_if_missing: None,
                metadata: HashMap::new(),
            });
        }

        let envelope: NotificationEnvelope = serde_json::from_str(trimmed)?;
        if envelope.version != ENVELOPE_VERSION {
            return Err(NotificationError::UnsupportedVersion(envelope.version));
        }
        let kind = match envelope.kind.as_str() {
            "launch" => NotificationKind::Launch,
            other => return Err(NotificationError::UnsupportedKind(other.to_string())),
        };
        let image = envelope.image.trim();
        if image.is_empty() {
            return Err(NotificationError::Empty);
        }

        Ok(Self {
            kind,
            image: image.to_string(),
            pull_if_missing: envelope.pull_if_missing,
            metadata: envelope.metadata,
        })
    }
}
