//! Captured photo → normalized frame → face crop → wire payload.
//!
//! Steps: decode, reorient (EXIF), downscale, detect, crop, encode, assemble.
//! Only decoding (and the I/O and encoding it depends on) can fail the call;
//! unreadable orientation metadata and detector problems degrade to "upright"
//! and "no face". Every raster goes through [`Raster`] so all of them are
//! released on every exit path.

use crate::detector::{detect_largest_face, FaceDetector};
use crate::raster::{Raster, RasterLedger};
use crate::types::{Angle, FaceRegion, PhotoPayload, PhotoProcessingResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageReader, RgbImage};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_MAX_DIMENSION: u32 = 1280;
pub const DEFAULT_FACE_MARGIN: f32 = 0.2;
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error("JPEG encoding failed: {0}")]
    Encode(#[source] image::ImageError),
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Longest side of the normalized frame.
    pub max_dimension: u32,
    /// Crop margin on each side, as a fraction of the full frame's width/height.
    pub face_margin: f32,
    pub jpeg_quality: u8,
    /// Detection results arriving later than this are discarded. Checked after
    /// the detector returns; a detector that never returns is not interrupted.
    pub detect_soft_budget: Option<Duration>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_dimension: DEFAULT_MAX_DIMENSION,
            face_margin: DEFAULT_FACE_MARGIN,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            detect_soft_budget: None,
        }
    }
}

/// Photo pipeline bound to one face detector.
pub struct PhotoPipeline<D> {
    detector: D,
    options: PipelineOptions,
    ledger: Arc<RasterLedger>,
}

impl<D: FaceDetector> PhotoPipeline<D> {
    pub fn new(detector: D, options: PipelineOptions) -> Self {
        Self {
            detector,
            options,
            ledger: RasterLedger::new(),
        }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Ledger of every raster this pipeline has allocated.
    pub fn ledger(&self) -> &Arc<RasterLedger> {
        &self.ledger
    }

    /// Process the photo at `source`. Deleting `source` is the caller's job.
    pub fn process(&mut self, source: &Path, angle: Angle) -> Result<PhotoProcessingResult, PipelineError> {
        let opts = &self.options;

        let (raw, orientation) = decode(source, &self.ledger)?;
        tracing::debug!(
            path = %source.display(),
            width = raw.width(),
            height = raw.height(),
            ?orientation,
            "decoded capture"
        );

        let oriented = reorient(raw, orientation);
        let scaled = scale_down(oriented, opts.max_dimension);
        let (width, height) = (scaled.width(), scaled.height());

        let detection = detect_largest_face(&mut self.detector, scaled.image(), opts.detect_soft_budget);
        let face = detection
            .region()
            .and_then(|region| with_margin(region, opts.face_margin, width, height))
            .and_then(|region| crop_safe(&scaled, region));

        let original = encode_base64(&scaled, opts.jpeg_quality)?;
        let face_base64 = match face {
            Some(crop) => {
                let encoded = encode_base64(&crop, opts.jpeg_quality)?;
                tracing::debug!(width = crop.width(), height = crop.height(), "face crop encoded");
                Some(encoded)
            }
            None => None,
        };

        let payload = PhotoPayload {
            angle,
            original,
            face: face_base64,
            body: None,
            captured_at: chrono::Utc::now().timestamp_millis(),
            width,
            height,
        };
        drop(scaled);

        tracing::info!(
            %angle,
            width,
            height,
            face = payload.face.is_some(),
            detection = ?detection,
            live_rasters = self.ledger.live(),
            "photo processed"
        );

        let legacy_image = payload.face.clone().unwrap_or_else(|| payload.original.clone());
        Ok(PhotoProcessingResult { payload, legacy_image })
    }
}

/// Decode the file into a raster and read its EXIF orientation.
///
/// Missing or unreadable orientation metadata yields `NoTransforms`.
pub fn decode(path: &Path, ledger: &Arc<RasterLedger>) -> Result<(Raster, Orientation), PipelineError> {
    let io_err = |source| PipelineError::Io {
        path: path.display().to_string(),
        source,
    };
    let decode_err = |source| PipelineError::Decode {
        path: path.display().to_string(),
        source,
    };

    let reader = ImageReader::open(path)
        .map_err(io_err)?
        .with_guessed_format()
        .map_err(io_err)?;
    let mut decoder = reader.into_decoder().map_err(decode_err)?;

    let orientation = decoder.orientation().unwrap_or_else(|e| {
        tracing::warn!(path = %path.display(), error = %e, "unreadable orientation metadata; assuming upright");
        Orientation::NoTransforms
    });

    let image = DynamicImage::from_decoder(decoder).map_err(decode_err)?;
    Ok((Raster::new(image.into_rgb8(), ledger), orientation))
}

/// Bake `orientation` into the pixel data.
pub fn reorient(raster: Raster, orientation: Orientation) -> Raster {
    raster.transform(|img| match orientation {
        Orientation::Rotate90 => Some(imageops::rotate90(img)),
        Orientation::Rotate180 => Some(imageops::rotate180(img)),
        Orientation::Rotate270 => Some(imageops::rotate270(img)),
        Orientation::FlipHorizontal => Some(imageops::flip_horizontal(img)),
        Orientation::FlipVertical => Some(imageops::flip_vertical(img)),
        Orientation::Rotate90FlipH => Some(imageops::flip_horizontal(&imageops::rotate90(img))),
        Orientation::Rotate270FlipH => Some(imageops::flip_horizontal(&imageops::rotate270(img))),
        _ => None,
    })
}

/// Target size bringing the longest side down to `max_dimension`, or `None`
/// when the image already fits.
pub fn scaled_dimensions(width: u32, height: u32, max_dimension: u32) -> Option<(u32, u32)> {
    let max_dimension = max_dimension.max(1);
    let longest = width.max(height);
    if longest <= max_dimension {
        return None;
    }
    let scale = max_dimension as f64 / longest as f64;
    let shorter = |side: u32| ((side as f64 * scale).round() as u32).clamp(1, max_dimension);
    if width >= height {
        Some((max_dimension, shorter(height)))
    } else {
        Some((shorter(width), max_dimension))
    }
}

/// Uniformly downscale to fit `max_dimension`; identity when it already fits.
pub fn scale_down(raster: Raster, max_dimension: u32) -> Raster {
    raster.transform(|img| {
        scaled_dimensions(img.width(), img.height(), max_dimension)
            .map(|(w, h)| imageops::resize(img, w, h, FilterType::Triangle))
    })
}

/// Grow `region` by `ratio` of the frame size on every side and clamp it to the frame.
///
/// Returns `None` when nothing of the region remains inside the frame.
pub fn with_margin(region: FaceRegion, ratio: f32, width: u32, height: u32) -> Option<FaceRegion> {
    let margin_x = (width as f32 * ratio).round() as i32;
    let margin_y = (height as f32 * ratio).round() as i32;
    clamp_region(
        FaceRegion::new(
            region.left.saturating_sub(margin_x),
            region.top.saturating_sub(margin_y),
            region.right.saturating_add(margin_x),
            region.bottom.saturating_add(margin_y),
        ),
        width,
        height,
    )
}

fn clamp_region(region: FaceRegion, width: u32, height: u32) -> Option<FaceRegion> {
    let w = i32::try_from(width).unwrap_or(i32::MAX);
    let h = i32::try_from(height).unwrap_or(i32::MAX);
    let clamped = FaceRegion::new(
        region.left.clamp(0, w),
        region.top.clamp(0, h),
        region.right.clamp(0, w),
        region.bottom.clamp(0, h),
    );
    (!clamped.is_degenerate()).then_some(clamped)
}

/// Crop `region` out of `raster`, clamping to its bounds first.
pub fn crop_safe(raster: &Raster, region: FaceRegion) -> Option<Raster> {
    let safe = clamp_region(region, raster.width(), raster.height())?;
    raster.derive(|img| {
        Some(
            imageops::crop_imm(
                img,
                safe.left as u32,
                safe.top as u32,
                safe.width() as u32,
                safe.height() as u32,
            )
            .to_image(),
        )
    })
}

/// JPEG-encode and base64 the image (standard alphabet, no line wrapping).
pub fn encode_base64(image: &RgbImage, quality: u8) -> Result<String, PipelineError> {
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100))
        .encode_image(image)
        .map_err(PipelineError::Encode)?;
    Ok(STANDARD.encode(jpeg))
}
