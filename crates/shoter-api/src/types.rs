use serde::{Deserialize, Serialize};
use shoter_core::{Angle, PhotoPayload};

/// Body of `POST create-player-profile`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerProfileRequest {
    pub player_id: String,
    /// Legacy single-image field: one base64 image per angle.
    pub images: Vec<String>,
    pub angles: Vec<Angle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photos: Option<Vec<PhotoPayload>>,
}

/// Generic acknowledgement returned by profile creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
}

/// Body of `POST identify-player`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceImageRequest {
    /// Base64 JPEG.
    pub image: String,
}

/// Successful identification: either an existing player or a freshly created one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyResponse {
    pub player_id: String,
    pub is_new: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_request_wire_shape() {
        let request = PlayerProfileRequest {
            player_id: "p-1".into(),
            images: vec!["AAA".into(), "BBB".into()],
            angles: vec![Angle::Front, Angle::Left],
            photos: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["playerId"], "p-1");
        assert_eq!(json["angles"], serde_json::json!(["front", "left"]));
        assert!(json.get("photos").is_none());
    }

    #[test]
    fn test_profile_request_with_photos() {
        let photo = PhotoPayload {
            angle: Angle::Back,
            original: "ORIG".into(),
            face: Some("FACE".into()),
            body: None,
            captured_at: 42,
            width: 10,
            height: 20,
        };
        let request = PlayerProfileRequest {
            player_id: "p-2".into(),
            images: vec!["FACE".into()],
            angles: vec![Angle::Back],
            photos: Some(vec![photo]),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["photos"][0]["face"], "FACE");
        assert_eq!(json["photos"][0]["capturedAt"], 42);
    }

    #[test]
    fn test_identify_response_parse() {
        let parsed: IdentifyResponse = serde_json::from_str(r#"{"playerId":"p1","isNew":true}"#).unwrap();
        assert_eq!(
            parsed,
            IdentifyResponse {
                player_id: "p1".into(),
                is_new: true
            }
        );
    }
}
