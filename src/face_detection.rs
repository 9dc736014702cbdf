use crate::{
    constants::{IMAGE_NORMALIZATION_OFFSET, IMAGE_NORMALIZATION_SCALE},
    face::BoundingBox,
    Error, Result,
};
use ndarray::{Array2, Array4, CowArray};
use opencv::core::{Mat, Rect, Scalar, Size, Vec3b, CV_8UC3};
use opencv::imgproc::{self, InterpolationFlags};
use opencv::prelude::*;
use ort::{Environment, Session, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Default SCRFD input edge length
const DEFAULT_DETECTOR_INPUT_SIZE: i32 = 640;

/// One face box with its confidence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceDetection {
    pub bbox: BoundingBox,
    pub score: f32,
}

/// SCRFD face detector using `ONNX` Runtime
pub struct FaceDetector {
    session: Session,
    input_size: (i32, i32),
    conf_threshold: f32,
    nms_threshold: f32,
    max_faces: usize,
    num_anchors: usize,
    strides: Vec<i32>,
    offset: usize,
    center_cache: HashMap<(i32, i32, i32), Array2<f32>>,
}

impl FaceDetector {
    /// Create a new face detector from an `ONNX` model file
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The ONNX runtime environment cannot be created
    /// - The model file cannot be loaded
    /// - The model has no inputs
    pub fn new<P: AsRef<Path>>(model_path: P, conf_threshold: f32, nms_threshold: f32, max_faces: usize) -> Result<Self> {
        log::info!("Initializing FaceDetector with model: {}", model_path.as_ref().display());
        let environment = Arc::new(
            Environment::builder()
                .with_name("face_detector")
                .with_log_level(ort::LoggingLevel::Warning)
                .build()?,
        );

        let session = ort::SessionBuilder::new(&environment)?
            .with_optimization_level(ort::GraphOptimizationLevel::Level3)?
            .with_model_from_file(model_path)?;

        let input_meta = session
            .inputs
            .first()
            .ok_or_else(|| Error::ModelError("Model has no inputs".to_string()))?;

        // [batch, channels, height, width]; dynamic dimensions use the default size
        let dim = |i: usize| {
            input_meta
                .dimensions
                .get(i)
                .copied()
                .flatten()
                .and_then(|d| i32::try_from(d).ok())
                .filter(|&d| d > 0)
                .unwrap_or(DEFAULT_DETECTOR_INPUT_SIZE)
        };
        let input_size = (dim(3), dim(2));

        // SCRFD variants differ in stride count and anchors per location
        let (offset, strides, num_anchors) = match session.outputs.len() {
            6 | 9 => (3, vec![8, 16, 32], 2),
            10 | 15 => (5, vec![8, 16, 32, 64, 128], 1),
            n => {
                log::warn!("Unknown model configuration with {n} outputs, using defaults");
                (3, vec![8, 16, 32], 2)
            }
        };

        Ok(Self {
            session,
            input_size,
            conf_threshold,
            nms_threshold,
            max_faces,
            num_anchors,
            strides,
            offset,
            center_cache: HashMap::new(),
        })
    }

    /// Detect faces, highest score first
    ///
    /// # Errors
    ///
    /// Returns an error if preprocessing, inference or decoding fails
    pub fn detect(&mut self, image: &Mat) -> Result<Vec<FaceDetection>> {
        let (input_width, input_height) = self.input_size;
        let (new_width, new_height, det_scale) = letterbox_size(image.cols(), image.rows(), input_width, input_height)?;

        let mut resized = Mat::default();
        imgproc::resize(
            image,
            &mut resized,
            Size::new(new_width, new_height),
            0.0,
            0.0,
            InterpolationFlags::INTER_LINEAR as i32,
        )?;

        let mut det_img = Mat::new_rows_cols_with_default(input_height, input_width, CV_8UC3, Scalar::all(0.0))?;
        let mut roi = det_img.roi_mut(Rect::new(0, 0, new_width, new_height))?;
        resized.copy_to(&mut roi)?;

        let inputs = preprocess(&det_img)?;
        let (scores, boxes) = self.forward(inputs)?;

        let boxes: Vec<BoundingBox> = boxes
            .into_iter()
            .map(|b| {
                BoundingBox::new(
                    f64::from(b[0] / det_scale),
                    f64::from(b[1] / det_scale),
                    f64::from(b[2] / det_scale),
                    f64::from(b[3] / det_scale),
                )
            })
            .collect();

        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

        let keep = nms(&boxes, &order, self.nms_threshold);
        let detections: Vec<FaceDetection> = keep
            .into_iter()
            .take(self.max_faces)
            .map(|i| FaceDetection {
                bbox: boxes[i],
                score: scores[i],
            })
            .collect();
        log::debug!("Detected {} faces", detections.len());
        Ok(detections)
    }

    /// Scores and input-space boxes of every anchor above the confidence threshold
    #[allow(clippy::cast_precision_loss, clippy::cast_sign_loss, clippy::cast_possible_wrap)]
    fn forward(&mut self, inputs: Array4<f32>) -> Result<(Vec<f32>, Vec<[f32; 4]>)> {
        let input_height = inputs.shape()[2] as i32;
        let input_width = inputs.shape()[3] as i32;

        let cow_array = CowArray::from(inputs.into_dyn());
        let input_tensor = Value::from_array(self.session.allocator(), &cow_array)?;
        let outputs = self.session.run(vec![input_tensor])?;

        let mut scores = Vec::new();
        let mut boxes = Vec::new();

        for (idx, &stride) in self.strides.iter().enumerate() {
            let score_output = outputs
                .get(idx)
                .ok_or_else(|| Error::ModelOutputError(format!("Missing score output {idx}")))?
                .try_extract::<f32>()?;
            let score_view = score_output.view();
            let stride_scores = score_view
                .as_slice()
                .ok_or_else(|| Error::ModelOutputError("Score output is not contiguous".to_string()))?;

            let bbox_output = outputs
                .get(idx + self.offset)
                .ok_or_else(|| Error::ModelOutputError(format!("Missing bbox output {}", idx + self.offset)))?
                .try_extract::<f32>()?;
            let bbox_view = bbox_output.view();
            let distances = bbox_view
                .as_slice()
                .ok_or_else(|| Error::ModelOutputError("Bbox output is not contiguous".to_string()))?;

            let key = (input_height / stride, input_width / stride, stride);
            let centers = match self.center_cache.get(&key) {
                Some(centers) => centers.clone(),
                None => {
                    let centers = anchor_centers(key.0, key.1, stride, self.num_anchors);
                    self.center_cache.insert(key, centers.clone());
                    centers
                }
            };

            if distances.len() != stride_scores.len() * 4 || centers.nrows() != stride_scores.len() {
                return Err(Error::ModelOutputError(format!(
                    "Stride {stride}: {} scores, {} distances, {} anchors",
                    stride_scores.len(),
                    distances.len(),
                    centers.nrows()
                )));
            }

            for (i, &score) in stride_scores.iter().enumerate() {
                if score < self.conf_threshold {
                    continue;
                }
                let d = &distances[i * 4..i * 4 + 4];
                let stride = stride as f32;
                boxes.push(distance_to_bbox(
                    (centers[[i, 0]], centers[[i, 1]]),
                    [d[0] * stride, d[1] * stride, d[2] * stride, d[3] * stride],
                ));
                scores.push(score);
            }
        }

        Ok((scores, boxes))
    }
}

/// Size of the aspect-preserving resize into the model input, and its scale
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn letterbox_size(image_width: i32, image_height: i32, input_width: i32, input_height: i32) -> Result<(i32, i32, f32)> {
    if image_width <= 0 || image_height <= 0 {
        return Err(Error::InvalidInput(format!("Empty image {image_width}x{image_height}")));
    }
    let ratio_img = image_height as f32 / image_width as f32;
    let ratio_model = input_height as f32 / input_width as f32;
    let (new_width, new_height) = if ratio_img > ratio_model {
        ((input_height as f32 / ratio_img) as i32, input_height)
    } else {
        (input_width, (input_width as f32 * ratio_img) as i32)
    };
    let new_width = new_width.max(1);
    let new_height = new_height.max(1);
    Ok((new_width, new_height, new_height as f32 / image_height as f32))
}

/// BGR image to normalized RGB NCHW
#[allow(clippy::cast_sign_loss)] // OpenCV dimensions are positive
fn preprocess(image: &Mat) -> Result<Array4<f32>> {
    let height = image.rows() as usize;
    let width = image.cols() as usize;
    let mut array = Array4::<f32>::zeros((1, 3, height, width));
    for row in 0..height {
        for col in 0..width {
            let pixel = image.at_2d::<Vec3b>(row as i32, col as i32)?;
            // BGR in, RGB out
            for ch in 0..3 {
                array[[0, ch, row, col]] =
                    (f32::from(pixel[2 - ch]) - IMAGE_NORMALIZATION_OFFSET) / IMAGE_NORMALIZATION_SCALE;
            }
        }
    }
    Ok(array)
}

/// Anchor centres for a `height × width` grid, `num_anchors` per location
#[allow(clippy::cast_precision_loss, clippy::cast_sign_loss)]
fn anchor_centers(height: i32, width: i32, stride: i32, num_anchors: usize) -> Array2<f32> {
    let num_anchors = num_anchors.max(1);
    let n_points = (height.max(0) * width.max(0)) as usize * num_anchors;
    let mut centers = Array2::zeros((n_points, 2));
    let mut i = 0;
    for y in 0..height {
        for x in 0..width {
            for _ in 0..num_anchors {
                centers[[i, 0]] = (x * stride) as f32;
                centers[[i, 1]] = (y * stride) as f32;
                i += 1;
            }
        }
    }
    centers
}

/// Left/top/right/bottom distances from an anchor centre to a box
fn distance_to_bbox((cx, cy): (f32, f32), distances: [f32; 4]) -> [f32; 4] {
    [cx - distances[0], cy - distances[1], cx + distances[2], cy + distances[3]]
}

/// Greedy non-maximum suppression over `order` (highest score first)
fn nms(boxes: &[BoundingBox], order: &[usize], threshold: f32) -> Vec<usize> {
    let mut keep = Vec::new();
    let mut remaining = order.to_vec();
    while let Some((&best, rest)) = remaining.split_first() {
        keep.push(best);
        remaining = rest
            .iter()
            .copied()
            .filter(|&j| boxes[best].iou(&boxes[j]) <= f64::from(threshold))
            .collect();
    }
    keep
}
