//! The single versioned payload schema attached to every vector point.
//!
//! Earlier ingest tools wrote snake_case keys; the serde aliases below are
//! the one compatibility shim, applied where payloads re-enter the process.
//! Nothing else in the codebase looks payload keys up by name.

use serde::{Deserialize, Serialize};

pub const PAYLOAD_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointPayload {
    #[serde(default = "current_version")]
    pub payload_version: u32,

    #[serde(alias = "image_id")]
    pub image_id: String,

    #[serde(alias = "album_id")]
    pub album_id: String,

    #[serde(default, alias = "subject_id")]
    pub subject_id: Option<String>,

    #[serde(default, alias = "absolute_path", alias = "path")]
    pub absolute_path: String,

    #[serde(default, alias = "taken_at")]
    pub taken_at: Option<String>,

    #[serde(default = "default_media_type", alias = "media_type")]
    pub media_type: String,
}

fn current_version() -> u32 {
    PAYLOAD_VERSION
}

fn default_media_type() -> String {
    "image".to_string()
}

impl PointPayload {
    /// Best-effort parse of a raw payload value. Returns `None` when the
    /// required identifiers are absent, which callers treat as a point
    /// without usable metadata.
    pub fn from_value(value: serde_json::Value) -> Option<Self> {
        serde_json::from_value(value).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_current_camel_case_shape() {
        let payload = PointPayload::from_value(json!({
            "payloadVersion": 1,
            "imageId": "hash1",
            "albumId": "album_a",
            "subjectId": null,
            "absolutePath": "/photos/a.jpg",
            "takenAt": "2024-06-01T10:00:00+00:00",
            "mediaType": "image"
        }))
        .unwrap();

        assert_eq!(payload.image_id, "hash1");
        assert_eq!(payload.album_id, "album_a");
        assert_eq!(payload.media_type, "image");
        assert_eq!(payload.payload_version, 1);
    }

    #[test]
    fn parses_legacy_snake_case_shape() {
        let payload = PointPayload::from_value(json!({
            "image_id": "hash2",
            "album_id": "album_b",
            "path": "/photos/b.jpg",
            "taken_at": null
        }))
        .unwrap();

        assert_eq!(payload.image_id, "hash2");
        assert_eq!(payload.album_id, "album_b");
        assert_eq!(payload.absolute_path, "/photos/b.jpg");
        // missing fields fall back to schema defaults
        assert_eq!(payload.media_type, "image");
        assert_eq!(payload.payload_version, PAYLOAD_VERSION);
    }

    #[test]
    fn rejects_payload_without_identifiers() {
        assert!(PointPayload::from_value(json!({"absolutePath": "/x.jpg"})).is_none());
    }

    #[test]
    fn serializes_camel_case() {
        let payload = PointPayload {
            payload_version: PAYLOAD_VERSION,
            image_id: "h".into(),
            album_id: "a".into(),
            subject_id: None,
            absolute_path: "/p".into(),
            taken_at: None,
            media_type: "image".into(),
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert!(value.get("imageId").is_some());
        assert!(value.get("albumId").is_some());
        assert!(value.get("image_id").is_none());
    }
}
