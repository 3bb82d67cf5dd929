use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Camera angle a photo was taken from, relative to the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Angle {
    Front,
    Left,
    Right,
    Back,
}

impl Angle {
    /// Order in which registration asks for photos.
    pub const REGISTRATION_ORDER: [Angle; 4] = [Angle::Front, Angle::Left, Angle::Right, Angle::Back];

    pub fn as_str(&self) -> &'static str {
        match self {
            Angle::Front => "front",
            Angle::Left => "left",
            Angle::Right => "right",
            Angle::Back => "back",
        }
    }
}

impl fmt::Display for Angle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Angle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "front" => Ok(Angle::Front),
            "left" => Ok(Angle::Left),
            "right" => Ok(Angle::Right),
            "back" => Ok(Angle::Back),
            other => Err(format!("unknown angle '{other}' (expected front, left, right or back)")),
        }
    }
}

/// Bounding box for a detected face, in floating pixel coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Integer pixel rectangle with exclusive right/bottom edges.
///
/// Coordinates are signed so a detector box that pokes outside the frame can be
/// represented before it is clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceRegion {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl FaceRegion {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self { left, top, right, bottom }
    }

    /// Round a detector box to the nearest pixel edges.
    pub fn from_bbox(bbox: &BoundingBox) -> Self {
        Self {
            left: bbox.x.round() as i32,
            top: bbox.y.round() as i32,
            right: (bbox.x + bbox.width).round() as i32,
            bottom: (bbox.y + bbox.height).round() as i32,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub fn area(&self) -> i64 {
        self.width().max(0) as i64 * self.height().max(0) as i64
    }

    pub fn is_degenerate(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }
}

/// One processed photo as sent to the backend.
///
/// `width` and `height` describe the normalized full frame, not the face crop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoPayload {
    pub angle: Angle,
    pub original: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Capture time, epoch milliseconds.
    pub captured_at: i64,
    pub width: u32,
    pub height: u32,
}

/// Pipeline output: the payload plus the single image used by the legacy wire field.
#[derive(Debug, Clone)]
pub struct PhotoProcessingResult {
    pub payload: PhotoPayload,
    /// The face crop when one was found, otherwise the full frame.
    pub legacy_image: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_angle_parse() {
        assert_eq!("front".parse::<Angle>().unwrap(), Angle::Front);
        assert_eq!(" Back ".parse::<Angle>().unwrap(), Angle::Back);
        assert!("top".parse::<Angle>().is_err());
    }

    #[test]
    fn test_angle_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Angle::Right).unwrap(), "\"right\"");
    }

    #[test]
    fn test_region_from_bbox_rounds() {
        let bbox = BoundingBox {
            x: 10.4,
            y: 19.6,
            width: 30.2,
            height: 40.0,
            confidence: 0.9,
            landmarks: None,
        };
        let region = FaceRegion::from_bbox(&bbox);
        assert_eq!(region, FaceRegion::new(10, 20, 41, 60));
        assert_eq!(region.area(), 31 * 40);
    }

    #[test]
    fn test_region_degenerate() {
        assert!(FaceRegion::new(5, 5, 5, 10).is_degenerate());
        assert!(FaceRegion::new(5, 10, 8, 2).is_degenerate());
        assert!(!FaceRegion::new(0, 0, 1, 1).is_degenerate());
    }

    #[test]
    fn test_payload_omits_absent_images() {
        let payload = PhotoPayload {
            angle: Angle::Front,
            original: "AAAA".into(),
            face: None,
            body: None,
            captured_at: 1_700_000_000_000,
            width: 640,
            height: 480,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["angle"], "front");
        assert_eq!(json["capturedAt"], 1_700_000_000_000i64);
        assert!(json.get("face").is_none());
        assert!(json.get("body").is_none());
    }
}
