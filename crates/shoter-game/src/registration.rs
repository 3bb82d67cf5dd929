//! Four-angle player registration.

use shoter_api::PlayerProfileRequest;
use shoter_core::{Angle, CapturedFrame, FaceDetector, PhotoPipeline, PhotoProcessingResult, PipelineError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistrationError {
    #[error("all {} angles already captured", Angle::REGISTRATION_ORDER.len())]
    AlreadyComplete,
    #[error("registration incomplete: {captured} of {needed} angles captured")]
    Incomplete { captured: usize, needed: usize },
    #[error("photo for {angle} could not be processed: {source}")]
    Pipeline {
        angle: Angle,
        #[source]
        source: PipelineError,
    },
}

/// Collects one processed photo per angle in [`Angle::REGISTRATION_ORDER`].
#[derive(Debug, Default)]
pub struct Registration {
    captured: Vec<PhotoProcessingResult>,
}

impl Registration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Angle the next capture will be recorded under, if any remain.
    pub fn current_angle(&self) -> Option<Angle> {
        Angle::REGISTRATION_ORDER.get(self.captured.len()).copied()
    }

    pub fn captured(&self) -> usize {
        self.captured.len()
    }

    pub fn is_complete(&self) -> bool {
        self.current_angle().is_none()
    }

    /// Process `frame` as the current angle. The frame is deleted either way;
    /// on failure the same angle stays current so it can be retaken.
    pub fn capture<D: FaceDetector>(
        &mut self,
        frame: CapturedFrame,
        pipeline: &mut PhotoPipeline<D>,
    ) -> Result<Angle, RegistrationError> {
        let angle = self.current_angle().ok_or(RegistrationError::AlreadyComplete)?;
        let result = pipeline
            .process(frame.path(), angle)
            .map_err(|source| RegistrationError::Pipeline { angle, source })?;

        tracing::info!(
            %angle,
            face = result.payload.face.is_some(),
            remaining = Angle::REGISTRATION_ORDER.len() - self.captured.len() - 1,
            "registration photo captured"
        );
        self.captured.push(result);
        Ok(angle)
    }

    /// Build the profile request. A random UUID is used when `player_id` is `None`.
    pub fn into_request(self, player_id: Option<String>) -> Result<PlayerProfileRequest, RegistrationError> {
        if !self.is_complete() {
            return Err(RegistrationError::Incomplete {
                captured: self.captured.len(),
                needed: Angle::REGISTRATION_ORDER.len(),
            });
        }

        let player_id = player_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut images = Vec::with_capacity(self.captured.len());
        let mut angles = Vec::with_capacity(self.captured.len());
        let mut photos = Vec::with_capacity(self.captured.len());
        for result in self.captured {
            images.push(result.legacy_image);
            angles.push(result.payload.angle);
            photos.push(result.payload);
        }

        Ok(PlayerProfileRequest {
            player_id,
            images,
            angles,
            photos: Some(photos),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use shoter_core::{PipelineOptions, UnavailableDetector};

    fn pipeline() -> PhotoPipeline<UnavailableDetector> {
        PhotoPipeline::new(UnavailableDetector::new("test"), PipelineOptions::default())
    }

    fn frame(dir: &std::path::Path, name: &str) -> CapturedFrame {
        let path = dir.join(name);
        RgbImage::from_pixel(40, 30, Rgb([200, 100, 50])).save(&path).unwrap();
        CapturedFrame::adopt(path)
    }

    #[test]
    fn test_walks_angles_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = pipeline();
        let mut registration = Registration::new();

        let mut seen = Vec::new();
        for i in 0..4 {
            seen.push(registration.capture(frame(dir.path(), &format!("{i}.png")), &mut pipeline).unwrap());
        }

        assert_eq!(seen, Angle::REGISTRATION_ORDER.to_vec());
        assert!(registration.is_complete());
        let extra = registration.capture(frame(dir.path(), "extra.png"), &mut pipeline);
        assert!(matches!(extra, Err(RegistrationError::AlreadyComplete)));
    }

    #[test]
    fn test_request_carries_all_photos() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = pipeline();
        let mut registration = Registration::new();
        for i in 0..4 {
            registration.capture(frame(dir.path(), &format!("{i}.png")), &mut pipeline).unwrap();
        }

        let request = registration.into_request(Some("player-1".into())).unwrap();

        assert_eq!(request.player_id, "player-1");
        assert_eq!(request.angles, Angle::REGISTRATION_ORDER.to_vec());
        assert_eq!(request.images.len(), 4);
        let photos = request.photos.unwrap();
        assert_eq!(photos.len(), 4);
        // No detector, so the legacy image is the full frame.
        assert_eq!(request.images[2], photos[2].original);
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn test_generated_player_id_is_uuid() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = pipeline();
        let mut registration = Registration::new();
        for i in 0..4 {
            registration.capture(frame(dir.path(), &format!("{i}.png")), &mut pipeline).unwrap();
        }

        let request = registration.into_request(None).unwrap();

        assert!(uuid::Uuid::parse_str(&request.player_id).is_ok());
    }

    #[test]
    fn test_incomplete_registration() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = pipeline();
        let mut registration = Registration::new();
        registration.capture(frame(dir.path(), "front.png"), &mut pipeline).unwrap();

        let err = registration.into_request(None).unwrap_err();

        assert!(matches!(err, RegistrationError::Incomplete { captured: 1, needed: 4 }));
    }

    #[test]
    fn test_failed_capture_keeps_angle() {
        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join("broken.png");
        std::fs::write(&broken, b"nope").unwrap();
        let mut pipeline = pipeline();
        let mut registration = Registration::new();

        let err = registration.capture(CapturedFrame::adopt(&broken), &mut pipeline).unwrap_err();

        assert!(matches!(err, RegistrationError::Pipeline { angle: Angle::Front, .. }));
        assert_eq!(registration.current_angle(), Some(Angle::Front));
        assert!(!broken.exists());
    }
}
