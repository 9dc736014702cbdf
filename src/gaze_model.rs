use crate::{
    constants::{NORMALIZED_EYE_HEIGHT, NORMALIZED_EYE_WIDTH},
    Error, Result,
};
use nalgebra::Vector2;
use ndarray::{Array2, Array4, CowArray};
use opencv::core::{Mat, Size, CV_8U};
use opencv::imgproc::{self, InterpolationFlags};
use opencv::prelude::*;
use ort::{Environment, Session, Value};
use std::path::Path;
use std::sync::Arc;

/// Maps a normalized eye image and the normalized head angles to gaze
/// (pitch, yaw) in the normalized camera, radians.
pub trait GazeModel: Send {
    /// # Errors
    ///
    /// Returns an error if inference fails
    fn estimate(&mut self, image: &Mat, head_pose: &Vector2<f64>) -> Result<Vector2<f64>> {
        self.estimate_batch(&[image], &[*head_pose])?
            .into_iter()
            .next()
            .ok_or_else(|| Error::ModelOutputError("Empty gaze batch".to_string()))
    }

    /// One (pitch, yaw) per input, in order
    ///
    /// # Errors
    ///
    /// Returns an error if the inputs disagree in length or inference fails
    fn estimate_batch(&mut self, images: &[&Mat], head_poses: &[Vector2<f64>]) -> Result<Vec<Vector2<f64>>>;
}

/// Gaze network run through `ONNX` Runtime.
///
/// Inputs are the eye image `(B, 1, H, W)` scaled to `[0, 1]` and the head
/// angles `(B, 2)`; the output is `(B, 2)` pitch/yaw.
pub struct OnnxGazeModel {
    session: Session,
    input_size: (i32, i32),
}

impl OnnxGazeModel {
    /// Load a gaze model from an `ONNX` file
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The ONNX runtime environment cannot be created
    /// - The model file cannot be loaded
    /// - The model does not take two inputs
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        log::info!("Initializing OnnxGazeModel with model: {}", model_path.as_ref().display());
        let environment = Arc::new(
            Environment::builder()
                .with_name("gaze_model")
                .with_log_level(ort::LoggingLevel::Warning)
                .build()?,
        );

        let session = ort::SessionBuilder::new(&environment)?
            .with_optimization_level(ort::GraphOptimizationLevel::Level3)?
            .with_model_from_file(model_path)?;

        if session.inputs.len() != 2 {
            return Err(Error::ModelError(format!(
                "Gaze model must take an image and a head pose, found {} inputs",
                session.inputs.len()
            )));
        }

        // (batch, channels, height, width); dynamic dimensions fall back to the eye crop size
        let dims = &session.inputs[0].dimensions;
        let dim = |i: usize, default: u32| {
            dims.get(i)
                .copied()
                .flatten()
                .and_then(|d| i32::try_from(d).ok())
                .filter(|&d| d > 0)
                .unwrap_or(default as i32)
        };
        let input_size = (dim(3, NORMALIZED_EYE_WIDTH), dim(2, NORMALIZED_EYE_HEIGHT));

        Ok(Self { session, input_size })
    }

    fn forward(&self, images: Array4<f32>, head_poses: Array2<f32>) -> Result<Vec<f32>> {
        let images = CowArray::from(images.into_dyn());
        let head_poses = CowArray::from(head_poses.into_dyn());
        let image_tensor = Value::from_array(self.session.allocator(), &images)?;
        let pose_tensor = Value::from_array(self.session.allocator(), &head_poses)?;

        let outputs = self.session.run(vec![image_tensor, pose_tensor])?;
        let gaze_output = outputs
            .into_iter()
            .next()
            .ok_or_else(|| Error::ModelOutputError("No output from gaze model".to_string()))?;

        let gaze_tensor = gaze_output.try_extract::<f32>()?;
        let gaze_view = gaze_tensor.view();
        let gaze_data = gaze_view
            .as_slice()
            .ok_or_else(|| Error::ModelOutputError("Failed to get gaze output data".to_string()))?;
        Ok(gaze_data.to_vec())
    }
}

impl GazeModel for OnnxGazeModel {
    fn estimate_batch(&mut self, images: &[&Mat], head_poses: &[Vector2<f64>]) -> Result<Vec<Vector2<f64>>> {
        if images.len() != head_poses.len() {
            return Err(Error::InvalidInput(format!(
                "{} images but {} head poses",
                images.len(),
                head_poses.len()
            )));
        }
        if images.is_empty() {
            return Ok(Vec::new());
        }

        let image_batch = preprocess_images(images, self.input_size)?;
        let pose_batch = preprocess_head_poses(head_poses)?;
        let output = self.forward(image_batch, pose_batch)?;
        postprocess(&output, images.len())
    }
}

/// Stack single-channel eye crops into `(B, 1, H, W)` in `[0, 1]`
///
/// # Errors
///
/// Returns an error if an image is not 8-bit single channel or cannot be resized
#[allow(clippy::cast_sign_loss)] // OpenCV dimensions are positive
pub fn preprocess_images(images: &[&Mat], (width, height): (i32, i32)) -> Result<Array4<f32>> {
    let mut batch = Array4::<f32>::zeros((images.len(), 1, height as usize, width as usize));
    for (idx, &image) in images.iter().enumerate() {
        if image.typ() != CV_8U {
            return Err(Error::InvalidInput(format!(
                "Gaze model expects 8-bit single-channel images, got type {}",
                image.typ()
            )));
        }
        let resized;
        let image = if image.cols() == width && image.rows() == height {
            image
        } else {
            let mut out = Mat::default();
            imgproc::resize(
                image,
                &mut out,
                Size::new(width, height),
                0.0,
                0.0,
                InterpolationFlags::INTER_LINEAR as i32,
            )?;
            resized = out;
            &resized
        };

        for row in 0..height {
            for col in 0..width {
                let pixel = *image.at_2d::<u8>(row, col)?;
                batch[[idx, 0, row as usize, col as usize]] = f32::from(pixel) / 255.0;
            }
        }
    }
    Ok(batch)
}

/// `(B, 2)` head angles
///
/// # Errors
///
/// Returns an error if the array cannot be shaped
#[allow(clippy::cast_possible_truncation)] // Model runs in f32
pub fn preprocess_head_poses(head_poses: &[Vector2<f64>]) -> Result<Array2<f32>> {
    let data: Vec<f32> = head_poses.iter().flat_map(|p| [p.x as f32, p.y as f32]).collect();
    Array2::from_shape_vec((head_poses.len(), 2), data)
        .map_err(|e| Error::InvalidInput(format!("Failed to create head pose array: {e}")))
}

/// Split a flat `(B, 2)` output into per-sample (pitch, yaw)
///
/// # Errors
///
/// Returns `ModelOutputError` if the output size is not `2 · batch`
pub fn postprocess(output: &[f32], batch_size: usize) -> Result<Vec<Vector2<f64>>> {
    if output.len() != batch_size * 2 {
        return Err(Error::ModelOutputError(format!(
            "Expected {} gaze values, got {}",
            batch_size * 2,
            output.len()
        )));
    }
    Ok(output
        .chunks_exact(2)
        .map(|c| Vector2::new(f64::from(c[0]), f64::from(c[1])))
        .collect())
}
