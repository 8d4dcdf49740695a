//! ONNX-backed descriptor extractor.
//!
//! Runs an UltraFace-style detection model (normalized corner boxes plus
//! per-anchor background/face scores) and a 128-dimensional face
//! embedding model, both on CPU via ONNX Runtime. Inference happens on
//! the blocking pool so the tick body stays suspendable.

use crate::extractor::{DescriptorExtractor, ExtractorError};
use crate::types::{BoundingBox, Descriptor, DetectionResult};
use async_trait::async_trait;
use image::{imageops::FilterType, DynamicImage, GenericImageView};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::{Arc, Mutex};

// --- Detection model constants ---
const DETECT_INPUT_WIDTH: usize = 320;
const DETECT_INPUT_HEIGHT: usize = 240;
const DETECT_MEAN: f32 = 127.0;
const DETECT_STD: f32 = 128.0;
const DETECT_CONFIDENCE_THRESHOLD: f32 = 0.7;
const DETECT_NMS_IOU_THRESHOLD: f32 = 0.3;

// --- Embedding model constants ---
const EMBED_INPUT_SIZE: usize = 112;
const EMBED_MEAN: f32 = 127.5;
const EMBED_STD: f32 = 128.0;
const EMBED_DESCRIPTOR_DIM: usize = 128;
/// Crop margin around a detected box before embedding, as a fraction of
/// the box size. The embedding model was trained on loose crops.
const EMBED_CROP_MARGIN: f32 = 0.2;

/// Two-stage ONNX face pipeline: detect boxes, then embed each crop.
pub struct OnnxExtractor {
    detector: Arc<Mutex<Session>>,
    embedder: Arc<Mutex<Session>>,
}

impl OnnxExtractor {
    /// Load both models from the given paths.
    pub fn load(detector_path: &str, embedder_path: &str) -> Result<Self, ExtractorError> {
        for path in [detector_path, embedder_path] {
            if !Path::new(path).exists() {
                return Err(ExtractorError::ModelNotFound(path.to_string()));
            }
        }

        let detector = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(detector_path)?;
        tracing::info!(path = detector_path, "loaded face detection model");

        let embedder = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(embedder_path)?;
        tracing::info!(path = embedder_path, "loaded face embedding model");

        Ok(Self {
            detector: Arc::new(Mutex::new(detector)),
            embedder: Arc::new(Mutex::new(embedder)),
        })
    }
}

#[async_trait]
impl DescriptorExtractor for OnnxExtractor {
    async fn extract(&self, image: DynamicImage) -> Result<Vec<DetectionResult>, ExtractorError> {
        let detector = Arc::clone(&self.detector);
        let embedder = Arc::clone(&self.embedder);

        tokio::task::spawn_blocking(move || {
            let faces = {
                let mut session = detector
                    .lock()
                    .map_err(|_| ExtractorError::InferenceFailed("detector session poisoned".into()))?;
                detect_faces(&mut session, &image)?
            };

            let mut results = Vec::with_capacity(faces.len());
            for bbox in faces {
                let crop = crop_face(&image, &bbox);
                let descriptor = {
                    let mut session = embedder
                        .lock()
                        .map_err(|_| ExtractorError::InferenceFailed("embedder session poisoned".into()))?;
                    embed_face(&mut session, &crop)?
                };
                results.push(DetectionResult { bbox, descriptor });
            }
            Ok(results)
        })
        .await
        .map_err(|_| ExtractorError::TaskAborted)?
    }
}

/// Run the detection model and decode its output into pixel-space boxes.
fn detect_faces(session: &mut Session, image: &DynamicImage) -> Result<Vec<BoundingBox>, ExtractorError> {
    let (img_w, img_h) = image.dimensions();
    let input = preprocess_detect(image);

    let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

    // Output 0: scores [1, N, 2] (background, face). Output 1: boxes
    // [1, N, 4] as normalized [x1, y1, x2, y2].
    let (_, scores) = outputs[0]
        .try_extract_tensor::<f32>()
        .map_err(|e| ExtractorError::InferenceFailed(format!("detection scores: {e}")))?;
    let (_, boxes) = outputs[1]
        .try_extract_tensor::<f32>()
        .map_err(|e| ExtractorError::InferenceFailed(format!("detection boxes: {e}")))?;

    let anchors = scores.len() / 2;
    let mut candidates = Vec::new();

    for i in 0..anchors {
        let confidence = scores[i * 2 + 1];
        if confidence < DETECT_CONFIDENCE_THRESHOLD {
            continue;
        }
        let x1 = boxes[i * 4] * img_w as f32;
        let y1 = boxes[i * 4 + 1] * img_h as f32;
        let x2 = boxes[i * 4 + 2] * img_w as f32;
        let y2 = boxes[i * 4 + 3] * img_h as f32;
        if x2 <= x1 || y2 <= y1 {
            continue;
        }
        candidates.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence,
        });
    }

    Ok(non_max_suppression(candidates, DETECT_NMS_IOU_THRESHOLD))
}

/// Run the embedding model on a face crop and L2-normalize the result.
fn embed_face(session: &mut Session, crop: &DynamicImage) -> Result<Descriptor, ExtractorError> {
    let input = preprocess_embed(crop);

    let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

    let (_, raw_data) = outputs[0]
        .try_extract_tensor::<f32>()
        .map_err(|e| ExtractorError::InferenceFailed(format!("descriptor extraction: {e}")))?;

    let raw: Vec<f32> = raw_data.to_vec();
    if raw.len() != EMBED_DESCRIPTOR_DIM {
        return Err(ExtractorError::InferenceFailed(format!(
            "expected {EMBED_DESCRIPTOR_DIM}-dim descriptor, got {}",
            raw.len()
        )));
    }

    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    let values = if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw
    };

    Ok(Descriptor::new(values))
}

/// Resize to the detector's input size and normalize into a NCHW tensor.
fn preprocess_detect(image: &DynamicImage) -> Array4<f32> {
    let resized = image
        .resize_exact(
            DETECT_INPUT_WIDTH as u32,
            DETECT_INPUT_HEIGHT as u32,
            FilterType::Triangle,
        )
        .to_rgb8();

    let mut tensor = Array4::<f32>::zeros((1, 3, DETECT_INPUT_HEIGHT, DETECT_INPUT_WIDTH));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel.0[c] as f32 - DETECT_MEAN) / DETECT_STD;
        }
    }
    tensor
}

/// Resize a face crop to the embedder's input size and normalize.
fn preprocess_embed(crop: &DynamicImage) -> Array4<f32> {
    let size = EMBED_INPUT_SIZE;
    let resized = crop
        .resize_exact(size as u32, size as u32, FilterType::Triangle)
        .to_rgb8();

    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel.0[c] as f32 - EMBED_MEAN) / EMBED_STD;
        }
    }
    tensor
}

/// Crop a detected face with margin, clamped to the image bounds.
fn crop_face(image: &DynamicImage, bbox: &BoundingBox) -> DynamicImage {
    let (img_w, img_h) = image.dimensions();
    let margin_x = bbox.width * EMBED_CROP_MARGIN;
    let margin_y = bbox.height * EMBED_CROP_MARGIN;

    let x0 = (bbox.x - margin_x).max(0.0) as u32;
    let y0 = (bbox.y - margin_y).max(0.0) as u32;
    let x1 = ((bbox.x + bbox.width + margin_x) as u32).min(img_w);
    let y1 = ((bbox.y + bbox.height + margin_y) as u32).min(img_h);

    image.crop_imm(x0, y0, (x1 - x0).max(1), (y1 - y0).max(1))
}

/// Greedy non-max suppression, highest confidence first.
fn non_max_suppression(mut candidates: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingBox> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| iou(k, &candidate) < iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

/// Intersection-over-union of two boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x0 = a.x.max(b.x);
    let y0 = a.y.max(b.y);
    let x1 = (a.x + a.width).min(b.x + b.width);
    let y1 = (a.y + a.height).min(b.y + b.height);

    let inter = (x1 - x0).max(0.0) * (y1 - y0).max(0.0);
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32, confidence: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence }
    }

    #[test]
    fn test_preprocess_detect_shape() {
        let img = DynamicImage::new_rgb8(640, 480);
        let tensor = preprocess_detect(&img);
        assert_eq!(tensor.shape(), &[1, 3, DETECT_INPUT_HEIGHT, DETECT_INPUT_WIDTH]);
    }

    #[test]
    fn test_preprocess_embed_shape() {
        let img = DynamicImage::new_rgb8(64, 80);
        let tensor = preprocess_embed(&img);
        assert_eq!(tensor.shape(), &[1, 3, EMBED_INPUT_SIZE, EMBED_INPUT_SIZE]);
    }

    #[test]
    fn test_preprocess_detect_normalization() {
        // A uniform mid-gray image should map close to zero.
        let img = DynamicImage::new_rgb8(320, 240);
        let mut rgb = img.to_rgb8();
        for p in rgb.pixels_mut() {
            p.0 = [127, 127, 127];
        }
        let tensor = preprocess_detect(&DynamicImage::ImageRgb8(rgb));
        assert!(tensor[[0, 0, 0, 0]].abs() < 1e-6);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = bbox(20.0, 20.0, 10.0, 10.0, 1.0);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_iou_identical() {
        let a = bbox(5.0, 5.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlap() {
        let kept = non_max_suppression(
            vec![
                bbox(0.0, 0.0, 10.0, 10.0, 0.8),
                bbox(1.0, 1.0, 10.0, 10.0, 0.9),
                bbox(50.0, 50.0, 10.0, 10.0, 0.75),
            ],
            DETECT_NMS_IOU_THRESHOLD,
        );
        assert_eq!(kept.len(), 2);
        // Highest confidence survives
        assert!((kept[0].confidence - 0.9).abs() < 1e-6);
        assert!((kept[1].confidence - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_crop_face_clamps_to_image() {
        let img = DynamicImage::new_rgb8(100, 100);
        // Box hanging off the top-left corner
        let crop = crop_face(&img, &bbox(-5.0, -5.0, 30.0, 30.0, 0.9));
        assert!(crop.width() <= 100);
        assert!(crop.height() <= 100);
        assert!(crop.width() > 0 && crop.height() > 0);
    }
}
