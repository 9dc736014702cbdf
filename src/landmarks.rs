//! Face and landmark acquisition.
//!
//! A [`LandmarkProvider`] turns a frame into [`Face`] records. The only
//! backing implementation chains the SCRFD box detector with a 468-point
//! face-mesh model; other detector modes are recognized but rejected.

use crate::{
    config::{DetectorConfig, ModelConfig},
    constants::{MESH_INPUT_SIZE, NUM_MESH_LANDMARKS},
    face::{BoundingBox, Face},
    face_detection::FaceDetector,
    pose_estimation::FaceLayout,
    utils::square_crop,
    Error, Result,
};
use nalgebra::{Point2, Point3};
use ndarray::{Array4, CowArray};
use opencv::core::{Mat, Rect, Size, Vec3f, CV_32F};
use opencv::imgproc::{self, InterpolationFlags};
use opencv::prelude::*;
use ort::{Environment, Session, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// Pluggable face + landmark detection
pub trait LandmarkProvider: Send {
    /// Faces with their 2D landmarks, in pixels
    ///
    /// # Errors
    ///
    /// Returns an error if detection or inference fails
    fn detect_faces(&mut self, image: &Mat) -> Result<Vec<Face>>;

    /// Landmarks as (pixel x, pixel y, relative depth in pixel scale)
    ///
    /// # Errors
    ///
    /// Returns an error if detection or inference fails
    fn detect_faces_raw(&mut self, image: &Mat) -> Result<Vec<Vec<Point3<f64>>>>;

    fn num_landmarks(&self) -> usize;

    /// Meaning of the landmark indices
    fn layout(&self) -> FaceLayout;
}

/// Detector backend tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorMode {
    Mediapipe,
    Dlib,
    FaceAlignmentDlib,
    FaceAlignmentSfd,
}

impl FromStr for DetectorMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "mediapipe" => Ok(Self::Mediapipe),
            "dlib" => Ok(Self::Dlib),
            "face_alignment_dlib" => Ok(Self::FaceAlignmentDlib),
            "face_alignment_sfd" => Ok(Self::FaceAlignmentSfd),
            _ => Err(Error::UnsupportedDetector(format!("Unknown detector mode: {s}"))),
        }
    }
}

impl fmt::Display for DetectorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Mediapipe => "mediapipe",
            Self::Dlib => "dlib",
            Self::FaceAlignmentDlib => "face_alignment_dlib",
            Self::FaceAlignmentSfd => "face_alignment_sfd",
        };
        f.write_str(name)
    }
}

/// Build the provider selected by `detector.mode`
///
/// # Errors
///
/// Returns `UnsupportedDetector` for modes without an implementation, or the
/// model loading error for the mesh backend
pub fn create_provider(models: &ModelConfig, detector: &DetectorConfig) -> Result<Box<dyn LandmarkProvider>> {
    match detector.mode {
        DetectorMode::Mediapipe => {
            let face_detector = FaceDetector::new(
                &models.face_detector,
                detector.confidence_threshold,
                detector.nms_threshold,
                detector.max_faces,
            )?;
            let mesh = MeshLandmarkDetector::new(
                face_detector,
                &models.face_mesh,
                detector.bbox_expansion,
                detector.presence_threshold,
            )?;
            Ok(Box::new(mesh))
        }
        mode => Err(Error::UnsupportedDetector(format!(
            "Detector mode '{mode}' is not available in this build"
        ))),
    }
}

/// SCRFD boxes followed by the 468-point face-mesh model
pub struct MeshLandmarkDetector {
    face_detector: FaceDetector,
    session: Session,
    input_size: i32,
    bbox_expansion: f64,
    presence_threshold: f32,
}

impl MeshLandmarkDetector {
    /// # Errors
    ///
    /// Returns an error if the mesh model cannot be loaded or has no outputs
    pub fn new<P: AsRef<Path>>(
        face_detector: FaceDetector,
        mesh_model_path: P,
        bbox_expansion: f64,
        presence_threshold: f32,
    ) -> Result<Self> {
        log::info!(
            "Initializing MeshLandmarkDetector with model: {}",
            mesh_model_path.as_ref().display()
        );
        let environment = Arc::new(
            Environment::builder()
                .with_name("face_mesh")
                .with_log_level(ort::LoggingLevel::Warning)
                .build()?,
        );

        let session = ort::SessionBuilder::new(&environment)?
            .with_optimization_level(ort::GraphOptimizationLevel::Level3)?
            .with_model_from_file(mesh_model_path)?;

        if session.outputs.is_empty() {
            return Err(Error::ModelError("Face mesh model has no outputs".to_string()));
        }

        // NHWC: [batch, height, width, channels]
        let input_size = session
            .inputs
            .first()
            .and_then(|input| input.dimensions.get(1).copied().flatten())
            .and_then(|d| i32::try_from(d).ok())
            .filter(|&d| d > 0)
            .unwrap_or(MESH_INPUT_SIZE);

        Ok(Self {
            face_detector,
            session,
            input_size,
            bbox_expansion,
            presence_threshold,
        })
    }

    /// Boxes with the raw mesh of each face that passes the presence check
    fn detect_meshes(&mut self, image: &Mat) -> Result<Vec<(BoundingBox, Vec<Point3<f64>>)>> {
        let detections = self.face_detector.detect(image)?;
        let mut meshes = Vec::with_capacity(detections.len());

        for detection in detections {
            let b = detection.bbox;
            let Some(crop) = square_crop(b.x1, b.y1, b.x2, b.y2, image.cols(), image.rows(), self.bbox_expansion)
            else {
                log::debug!("Skipping face box {b:?} outside the frame");
                continue;
            };

            let roi = Mat::roi(image, crop)?.try_clone()?;
            let input = preprocess_crop(&roi, self.input_size)?;
            let (values, presence) = self.forward(input)?;

            if let Some(presence) = presence {
                if presence < self.presence_threshold {
                    log::debug!("Mesh presence {presence:.2} below threshold, dropping face");
                    continue;
                }
            }

            meshes.push((b, landmarks_from_output(&values, crop, self.input_size)?));
        }

        Ok(meshes)
    }

    /// Landmark values and, when the model reports one, the face presence
    /// probability
    fn forward(&self, input: Array4<f32>) -> Result<(Vec<f32>, Option<f32>)> {
        let cow_array = CowArray::from(input.into_dyn());
        let input_tensor = Value::from_array(self.session.allocator(), &cow_array)?;
        let outputs = self.session.run(vec![input_tensor])?;

        let mut outputs = outputs.into_iter();
        let marks = outputs
            .next()
            .ok_or_else(|| Error::ModelOutputError("No output from face mesh model".to_string()))?
            .try_extract::<f32>()?;
        let marks_view = marks.view();
        let values = marks_view
            .as_slice()
            .ok_or_else(|| Error::ModelOutputError("Failed to get mesh output data".to_string()))?
            .to_vec();

        let presence = match outputs.next() {
            Some(flag) => {
                let flag = flag.try_extract::<f32>()?;
                let flag_view = flag.view();
                flag_view.iter().next().map(|&logit| sigmoid(logit))
            }
            None => None,
        };

        Ok((values, presence))
    }
}

impl LandmarkProvider for MeshLandmarkDetector {
    fn detect_faces(&mut self, image: &Mat) -> Result<Vec<Face>> {
        Ok(self
            .detect_meshes(image)?
            .into_iter()
            .map(|(bbox, mesh)| Face::new(bbox, mesh.iter().map(|p| Point2::new(p.x, p.y)).collect()))
            .collect())
    }

    fn detect_faces_raw(&mut self, image: &Mat) -> Result<Vec<Vec<Point3<f64>>>> {
        Ok(self.detect_meshes(image)?.into_iter().map(|(_, mesh)| mesh).collect())
    }

    fn num_landmarks(&self) -> usize {
        NUM_MESH_LANDMARKS
    }

    fn layout(&self) -> FaceLayout {
        FaceLayout::mesh()
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// BGR crop to RGB NHWC in [0, 1]
#[allow(clippy::cast_sign_loss)] // OpenCV dimensions are positive
fn preprocess_crop(crop: &Mat, input_size: i32) -> Result<Array4<f32>> {
    let mut resized = Mat::default();
    imgproc::resize(
        crop,
        &mut resized,
        Size::new(input_size, input_size),
        0.0,
        0.0,
        InterpolationFlags::INTER_LINEAR as i32,
    )?;

    let mut rgb_image = Mat::default();
    imgproc::cvt_color(&resized, &mut rgb_image, imgproc::COLOR_BGR2RGB, 0)?;

    let mut float_image = Mat::default();
    rgb_image.convert_to(&mut float_image, CV_32F, 1.0 / 255.0, 0.0)?;

    let size = input_size as usize;
    let mut array = Array4::<f32>::zeros((1, size, size, 3));
    for row in 0..input_size {
        for col in 0..input_size {
            let pixel = float_image.at_2d::<Vec3f>(row, col)?;
            for ch in 0..3 {
                array[[0, row as usize, col as usize, ch]] = pixel[ch];
            }
        }
    }
    Ok(array)
}

/// Map mesh output from model input space back to the frame. Depth keeps
/// the same pixel scale as x and y.
fn landmarks_from_output(values: &[f32], crop: Rect, input_size: i32) -> Result<Vec<Point3<f64>>> {
    if values.len() < NUM_MESH_LANDMARKS * 3 {
        return Err(Error::ModelOutputError(format!(
            "Expected {} mesh values, got {}",
            NUM_MESH_LANDMARKS * 3,
            values.len()
        )));
    }

    let scale_x = f64::from(crop.width) / f64::from(input_size);
    let scale_y = f64::from(crop.height) / f64::from(input_size);
    Ok(values
        .chunks_exact(3)
        .take(NUM_MESH_LANDMARKS)
        .map(|p| {
            Point3::new(
                f64::from(crop.x) + f64::from(p[0]) * scale_x,
                f64::from(crop.y) + f64::from(p[1]) * scale_y,
                f64::from(p[2]) * scale_x,
            )
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Scalar, CV_8UC3};

    #[test]
    fn test_detector_mode_parsing() {
        assert_eq!("mediapipe".parse::<DetectorMode>().unwrap(), DetectorMode::Mediapipe);
        assert_eq!("MediaPipe".parse::<DetectorMode>().unwrap(), DetectorMode::Mediapipe);
        assert_eq!(
            "face_alignment_sfd".parse::<DetectorMode>().unwrap(),
            DetectorMode::FaceAlignmentSfd
        );
        assert!(matches!(
            "haar".parse::<DetectorMode>(),
            Err(Error::UnsupportedDetector(_))
        ));
        for mode in [
            DetectorMode::Mediapipe,
            DetectorMode::Dlib,
            DetectorMode::FaceAlignmentDlib,
            DetectorMode::FaceAlignmentSfd,
        ] {
            assert_eq!(mode.to_string().parse::<DetectorMode>().unwrap(), mode);
        }
    }

    #[test]
    fn test_unimplemented_modes_are_rejected() {
        let models = ModelConfig::default();
        for mode in [DetectorMode::Dlib, DetectorMode::FaceAlignmentDlib, DetectorMode::FaceAlignmentSfd] {
            let detector = DetectorConfig {
                mode,
                ..DetectorConfig::default()
            };
            assert!(matches!(
                create_provider(&models, &detector),
                Err(Error::UnsupportedDetector(_))
            ));
        }
    }

    #[test]
    fn test_landmarks_map_back_to_frame() {
        let mut values = vec![0.0f32; NUM_MESH_LANDMARKS * 3];
        values[0] = 96.0;
        values[1] = 48.0;
        values[2] = -10.0;
        let crop = Rect::new(100, 50, 384, 384);
        let marks = landmarks_from_output(&values, crop, 192).unwrap();
        assert_eq!(marks.len(), NUM_MESH_LANDMARKS);
        assert_eq!(marks[0], Point3::new(292.0, 146.0, -20.0));
        assert_eq!(marks[1], Point3::new(100.0, 50.0, 0.0));
    }

    #[test]
    fn test_short_output_is_rejected() {
        let crop = Rect::new(0, 0, 10, 10);
        assert!(landmarks_from_output(&[0.0; 30], crop, 192).is_err());
    }

    #[test]
    fn test_preprocess_crop_is_rgb_nhwc() {
        let crop = Mat::new_rows_cols_with_default(50, 50, CV_8UC3, Scalar::new(255.0, 0.0, 0.0, 0.0)).unwrap();
        let array = preprocess_crop(&crop, 8).unwrap();
        assert_eq!(array.shape(), &[1, 8, 8, 3]);
        // Blue input ends up in the last channel
        assert!(array[[0, 3, 3, 0]].abs() < 1e-6);
        assert!((array[[0, 3, 3, 2]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_sigmoid() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-6);
        assert!(sigmoid(10.0) > 0.99);
        assert!(sigmoid(-10.0) < 0.01);
    }
}
