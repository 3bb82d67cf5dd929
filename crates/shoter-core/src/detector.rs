//! One-shot face detection.
//!
//! [`FaceDetector`] is the seam the pipeline calls through. [`ScrfdDetector`]
//! runs the SCRFD model (3-stride anchor decoding + NMS) on ONNX Runtime;
//! [`UnavailableDetector`] stands in when no model is installed.
//! [`detect_largest_face`] turns whatever the detector does into a
//! [`Detection`] and never fails.

use crate::types::{BoundingBox, FaceRegion};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — download det_10g.onnx from insightface")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("detector unavailable: {0}")]
    Unavailable(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A detector that can be run once over a still image.
pub trait FaceDetector: Send {
    /// Return every face found in `image`, in detector order.
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError>;
}

impl<D: FaceDetector + ?Sized> FaceDetector for Box<D> {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        (**self).detect(image)
    }
}

/// Outcome of a single detection pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    /// Largest face found, unclamped.
    Detected(FaceRegion),
    NotDetected,
    /// The detector errored or blew its time budget.
    DetectorUnavailable(String),
}

impl Detection {
    pub fn region(&self) -> Option<FaceRegion> {
        match self {
            Detection::Detected(region) => Some(*region),
            _ => None,
        }
    }
}

/// Run `detector` once and keep the face with the largest box area.
///
/// Equal areas keep the first one in detector order. Errors, and results that
/// arrive after `budget` has elapsed, become [`Detection::DetectorUnavailable`].
/// The budget is soft: it is checked once `detect` returns, so a hung detector
/// still blocks the caller.
pub fn detect_largest_face<D: FaceDetector + ?Sized>(
    detector: &mut D,
    image: &RgbImage,
    budget: Option<Duration>,
) -> Detection {
    let started = Instant::now();
    let result = detector.detect(image);
    let elapsed = started.elapsed();

    let faces = match result {
        Ok(faces) => faces,
        Err(e) => {
            tracing::warn!(error = %e, "face detection failed; continuing without a face");
            return Detection::DetectorUnavailable(e.to_string());
        }
    };

    if let Some(budget) = budget {
        if elapsed > budget {
            tracing::warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                budget_ms = budget.as_millis() as u64,
                "face detection timed out; continuing without a face"
            );
            return Detection::DetectorUnavailable(format!(
                "detection took {}ms, budget {}ms",
                elapsed.as_millis(),
                budget.as_millis()
            ));
        }
    }

    tracing::debug!(faces = faces.len(), elapsed_ms = elapsed.as_millis() as u64, "detection done");

    match largest(&faces) {
        Some(face) => Detection::Detected(FaceRegion::from_bbox(face)),
        None => Detection::NotDetected,
    }
}

fn largest(faces: &[BoundingBox]) -> Option<&BoundingBox> {
    faces.iter().fold(None, |best, face| match best {
        Some(b) if b.area() >= face.area() => Some(b),
        _ => Some(face),
    })
}

/// Detector used when no model is configured: every call reports unavailable.
#[derive(Debug, Clone)]
pub struct UnavailableDetector {
    reason: String,
}

impl UnavailableDetector {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

impl FaceDetector for UnavailableDetector {
    fn detect(&mut self, _image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        Err(DetectorError::Unavailable(self.reason.clone()))
    }
}

/// Letterbox placement of the source image inside the square model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: u32,
    pad_y: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32, target: u32) -> (Self, u32, u32) {
        let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as u32).clamp(1, target);
        let new_h = ((height as f32 * scale).round() as u32).clamp(1, target);
        let letterbox = Letterbox {
            scale,
            pad_x: (target - new_w) / 2,
            pad_y: (target - new_h) / 2,
        };
        (letterbox, new_w, new_h)
    }

    /// Map a point in model-input space back to source-image space.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }
}

/// Positions of one stride's score, bbox and keypoint tensors in the model outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StrideOutputs {
    score: usize,
    bbox: usize,
    kps: usize,
}

/// SCRFD face detector on ONNX Runtime.
pub struct ScrfdDetector {
    session: Session,
    strides: [StrideOutputs; 3],
}

impl ScrfdDetector {
    /// Load the SCRFD ONNX model from `model_path`.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD needs 9 outputs (score/bbox/kps for 3 strides), model has {}",
                output_names.len()
            )));
        }

        let strides = discover_outputs(&output_names);
        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            ?strides,
            "SCRFD model loaded"
        );

        Ok(Self { session, strides })
    }

    /// Letterbox an RGB image into a normalized NCHW tensor.
    fn preprocess(image: &RgbImage) -> (Array4<f32>, Letterbox) {
        let (letterbox, new_w, new_h) = Letterbox::fit(image.width(), image.height(), SCRFD_INPUT_SIZE);

        let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);
        let pad = SCRFD_MEAN.round() as u8;
        let mut canvas = RgbImage::from_pixel(SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE, Rgb([pad, pad, pad]));
        imageops::replace(&mut canvas, &resized, letterbox.pad_x as i64, letterbox.pad_y as i64);

        let side = SCRFD_INPUT_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
        for (x, y, pixel) in canvas.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
            }
        }

        (tensor, letterbox)
    }
}

impl FaceDetector for ScrfdDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }

        let (input, letterbox) = Self::preprocess(image);
        let strides = self.strides;
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (slot, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let StrideOutputs { score, bbox, kps } = strides[slot];
            let (_, scores) = outputs[score]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;
            let (_, kps) = outputs[kps]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("kps stride {stride}: {e}")))?;

            candidates.extend(decode_stride(scores, bboxes, kps, stride, &letterbox));
        }

        Ok(nms(candidates, SCRFD_NMS_THRESHOLD))
    }
}

/// Map SCRFD outputs to stride slots.
///
/// Exports that name their tensors `score_8`, `bbox_16`, `kps_32`, ... are
/// matched by name; anything else gets the standard positional layout
/// `[scores 8/16/32, bboxes 8/16/32, kps 8/16/32]`.
fn discover_outputs(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let named: Option<Vec<StrideOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| {
            Some(StrideOutputs {
                score: find("score", stride)?,
                bbox: find("bbox", stride)?,
                kps: find("kps", stride)?,
            })
        })
        .collect();

    match named {
        Some(found) => [found[0], found[1], found[2]],
        None => {
            tracing::debug!(?names, "SCRFD output names not recognized, using positional layout");
            std::array::from_fn(|i| StrideOutputs {
                score: i,
                bbox: i + 3,
                kps: i + 6,
            })
        }
    }
}

/// Decode the detections above threshold for one stride level.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    letterbox: &Letterbox,
) -> Vec<BoundingBox> {
    let grid = SCRFD_INPUT_SIZE as usize / stride;
    let step = stride as f32;
    let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;

    (0..anchors)
        .filter_map(|idx| {
            let score = *scores.get(idx)?;
            if score <= SCRFD_CONFIDENCE_THRESHOLD {
                return None;
            }
            let offsets = bboxes.get(idx * 4..idx * 4 + 4)?;

            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let ax = (cell % grid) as f32 * step;
            let ay = (cell / grid) as f32 * step;

            let (x1, y1) = letterbox.unmap(ax - offsets[0] * step, ay - offsets[1] * step);
            let (x2, y2) = letterbox.unmap(ax + offsets[2] * step, ay + offsets[3] * step);

            let landmarks = kps.get(idx * 10..idx * 10 + 10).map(|points| {
                std::array::from_fn(|i| {
                    letterbox.unmap(ax + points[i * 2] * step, ay + points[i * 2 + 1] * step)
                })
            });

            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
                landmarks,
            })
        })
        .collect()
}

/// Non-maximum suppression; output is sorted by descending confidence.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<BoundingBox> = Vec::with_capacity(detections.len());
    for candidate in detections {
        if keep.iter().all(|kept| iou(kept, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

/// Intersection-over-union of two boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.area() + b.area() - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32, conf: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
            confidence: conf,
            landmarks: None,
        }
    }

    struct Scripted(Result<Vec<BoundingBox>, String>);

    impl FaceDetector for Scripted {
        fn detect(&mut self, _image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
            self.0.clone().map_err(DetectorError::InferenceFailed)
        }
    }

    struct Slow(Duration);

    impl FaceDetector for Slow {
        fn detect(&mut self, _image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
            std::thread::sleep(self.0);
            Ok(vec![bbox(0.0, 0.0, 10.0, 10.0, 0.9)])
        }
    }

    fn frame() -> RgbImage {
        RgbImage::new(64, 64)
    }

    #[test]
    fn test_largest_face_selected() {
        let mut det = Scripted(Ok(vec![
            bbox(0.0, 0.0, 10.0, 10.0, 0.99),
            bbox(20.0, 20.0, 30.0, 20.0, 0.6),
            bbox(5.0, 5.0, 20.0, 20.0, 0.8),
        ]));
        let detection = detect_largest_face(&mut det, &frame(), None);
        assert_eq!(detection, Detection::Detected(FaceRegion::new(20, 20, 50, 40)));
    }

    #[test]
    fn test_equal_areas_keep_detector_order() {
        let mut det = Scripted(Ok(vec![
            bbox(1.0, 1.0, 10.0, 10.0, 0.7),
            bbox(30.0, 30.0, 10.0, 10.0, 0.9),
        ]));
        let detection = detect_largest_face(&mut det, &frame(), None);
        assert_eq!(detection.region(), Some(FaceRegion::new(1, 1, 11, 11)));
    }

    #[test]
    fn test_no_faces() {
        let mut det = Scripted(Ok(vec![]));
        assert_eq!(detect_largest_face(&mut det, &frame(), None), Detection::NotDetected);
    }

    #[test]
    fn test_detector_error_is_unavailable() {
        let mut det = Scripted(Err("boom".into()));
        let detection = detect_largest_face(&mut det, &frame(), None);
        assert!(matches!(detection, Detection::DetectorUnavailable(ref m) if m.contains("boom")));
        assert_eq!(detection.region(), None);
    }

    #[test]
    fn test_over_budget_is_unavailable() {
        let mut det = Slow(Duration::from_millis(30));
        let detection = detect_largest_face(&mut det, &frame(), Some(Duration::from_millis(1)));
        assert!(matches!(detection, Detection::DetectorUnavailable(_)));
    }

    #[test]
    fn test_within_budget_is_detected() {
        let mut det = Slow(Duration::from_millis(0));
        let detection = detect_largest_face(&mut det, &frame(), Some(Duration::from_secs(5)));
        assert!(matches!(detection, Detection::Detected(_)));
    }

    #[test]
    fn test_unavailable_detector() {
        let mut det = UnavailableDetector::new("no model");
        let detection = detect_largest_face(&mut det, &frame(), None);
        assert_eq!(
            detection,
            Detection::DetectorUnavailable("detector unavailable: no model".into())
        );
    }

    #[test]
    fn test_scrfd_missing_model() {
        let err = ScrfdDetector::load(Path::new("/nonexistent/det_10g.onnx")).err().unwrap();
        assert!(matches!(err, DetectorError::ModelNotFound(_)));
    }

    #[test]
    fn test_iou_identical() {
        let a = bbox(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = bbox(5.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = bbox(20.0, 20.0, 10.0, 10.0, 1.0);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let kept = nms(
            vec![
                bbox(5.0, 5.0, 100.0, 100.0, 0.8),
                bbox(200.0, 200.0, 50.0, 50.0, 0.7),
                bbox(0.0, 0.0, 100.0, 100.0, 0.9),
            ],
            0.4,
        );
        let confidences: Vec<f32> = kept.iter().map(|b| b.confidence).collect();
        assert_eq!(confidences, vec![0.9, 0.7]);
    }

    #[test]
    fn test_letterbox_unmap_roundtrip() {
        let (letterbox, new_w, new_h) = Letterbox::fit(1280, 720, SCRFD_INPUT_SIZE);
        assert_eq!((new_w, new_h), (640, 360));
        assert_eq!((letterbox.pad_x, letterbox.pad_y), (0, 140));

        let (x, y) = letterbox.unmap(100.0 * letterbox.scale, 50.0 * letterbox.scale + 140.0);
        assert!((x - 100.0).abs() < 0.01 && (y - 50.0).abs() < 0.01, "({x}, {y})");
    }

    #[test]
    fn test_discover_outputs_named_shuffled() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32",
            "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let strides = discover_outputs(&names);
        assert_eq!(strides[0], StrideOutputs { score: 2, bbox: 0, kps: 1 });
        assert_eq!(strides[2], StrideOutputs { score: 8, bbox: 6, kps: 7 });
    }

    #[test]
    fn test_discover_outputs_positional_fallback() {
        let names: Vec<String> = (400..409).map(|i: usize| i.to_string()).collect();
        let strides = discover_outputs(&names);
        assert_eq!(strides[1], StrideOutputs { score: 1, bbox: 4, kps: 7 });
    }

    #[test]
    fn test_decode_stride_single_anchor() {
        let (letterbox, _, _) = Letterbox::fit(640, 640, SCRFD_INPUT_SIZE);
        let grid = SCRFD_INPUT_SIZE as usize / 32;
        let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; anchors];
        let mut bboxes = vec![0.0f32; anchors * 4];
        // Cell (1, 1) first anchor: centre (32, 32), one stride each way.
        let idx = (grid + 1) * SCRFD_ANCHORS_PER_CELL;
        scores[idx] = 0.9;
        bboxes[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);

        let dets = decode_stride(&scores, &bboxes, &[], 32, &letterbox);
        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        assert!((d.x - 0.0).abs() < 1e-4 && (d.y - 0.0).abs() < 1e-4);
        assert!((d.width - 64.0).abs() < 1e-4 && (d.height - 64.0).abs() < 1e-4);
        assert!(d.landmarks.is_none());
    }
}
