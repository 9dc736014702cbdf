//! Gaze estimation on a posed face and the mapping of the fused gaze onto
//! the output frame.

use crate::{
    camera::Camera,
    face::{Face, FacePart},
    gaze_model::GazeModel,
    normalizer::HeadPoseNormalizer,
    pose_estimation::FaceModel,
    smoothing::SmoothingBuffer,
    Error, Result,
};
use nalgebra::{Point2, Point3, Rotation3, Vector2, Vector3};
use opencv::core::{self, Mat};

/// Unit gaze direction for (pitch, yaw), pointing back towards the camera
#[must_use]
pub fn angle_to_vector(angles: &Vector2<f64>) -> Vector3<f64> {
    let (pitch, yaw) = (angles[0], angles[1]);
    -Vector3::new(pitch.cos() * yaw.sin(), pitch.sin(), pitch.cos() * yaw.cos())
}

/// Bring a normalized-camera vector back to camera coordinates (`Nᵀ · v`)
#[must_use]
pub fn denormalize(vector: &Vector3<f64>, normalizing_rot: &Rotation3<f64>) -> Vector3<f64> {
    normalizing_rot.inverse() * vector
}

/// Flip an image around its vertical axis
///
/// # Errors
///
/// Returns an error if the `OpenCV` flip fails
pub fn mirror_image(image: &Mat) -> Result<Mat> {
    let mut mirrored = Mat::default();
    core::flip(image, &mut mirrored, 1)?;
    Ok(mirrored)
}

/// Mean eye centre and mean gaze vector of both eyes
#[must_use]
pub fn fuse_eyes(face: &Face) -> Option<(Vector3<f64>, Vector3<f64>)> {
    let [left, right] = face.eyes();
    let center = (left.center? + right.center?) / 2.0;
    let gaze = (left.gaze_vector? + right.gaze_vector?) / 2.0;
    Some((center, gaze))
}

/// `c + (|c| · depth_multiplier) · g`, with the vertical displacement scaled
#[must_use]
pub fn screen_point(center: &Vector3<f64>, gaze: &Vector3<f64>, depth_multiplier: f64, vertical_scale: f64) -> Point3<f64> {
    let mut displacement = gaze * (center.norm() * depth_multiplier);
    displacement.y *= vertical_scale;
    Point3::from(center + displacement)
}

/// Head pose, normalization and gaze inference for detected faces
pub struct GazeEstimator {
    camera: Camera,
    face_model: FaceModel,
    normalizer: HeadPoseNormalizer,
    model: Box<dyn GazeModel>,
}

impl GazeEstimator {
    /// `camera` must describe the (already undistorted) images passed to
    /// [`GazeEstimator::estimate`]
    #[must_use]
    pub fn new(camera: Camera, face_model: FaceModel, normalizer: HeadPoseNormalizer, model: Box<dyn GazeModel>) -> Self {
        Self {
            camera,
            face_model,
            normalizer,
            model,
        }
    }

    #[must_use]
    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    #[must_use]
    pub fn face_model(&self) -> &FaceModel {
        &self.face_model
    }

    pub fn face_model_mut(&mut self) -> &mut FaceModel {
        &mut self.face_model
    }

    /// Solve head pose and place the template, face centre and eye centres
    ///
    /// # Errors
    ///
    /// Returns `NotCalibrated` without a template and `PoseEstimationError`
    /// when the solver fails
    pub fn estimate_pose(&self, face: &mut Face) -> Result<()> {
        self.face_model.estimate_head_pose(face, &self.camera)?;
        self.face_model.compute_3d_pose(face)?;
        self.face_model.compute_face_eye_centers(face)
    }

    /// Full per-face estimate: pose, both eyes normalized, gaze inferred and
    /// brought back to camera coordinates.
    ///
    /// # Errors
    ///
    /// Propagates pose, normalization and inference errors
    pub fn estimate(&mut self, image: &Mat, face: &mut Face) -> Result<()> {
        self.estimate_pose(face)?;
        for eye in face.eyes_mut() {
            self.normalizer.normalize(image, eye)?;
        }
        self.estimate_eye_gaze(face)
    }

    fn estimate_eye_gaze(&mut self, face: &mut Face) -> Result<()> {
        let mut images = Vec::with_capacity(2);
        let mut head_poses = Vec::with_capacity(2);
        for eye in face.eyes() {
            let (image, head_pose) = model_inputs(eye)?;
            images.push(image);
            head_poses.push(head_pose);
        }

        let image_refs: Vec<&Mat> = images.iter().collect();
        let predictions = self.model.estimate_batch(&image_refs, &head_poses)?;
        if predictions.len() != 2 {
            return Err(Error::ModelOutputError(format!(
                "Expected 2 gaze predictions, got {}",
                predictions.len()
            )));
        }

        for (eye, mut angles) in face.eyes_mut().into_iter().zip(predictions) {
            if eye.name.is_mirrored() {
                angles[1] = -angles[1];
            }
            let normalizing_rot = eye
                .normalizing_rot
                .ok_or_else(|| Error::InvalidInput(format!("{:?} was not normalized", eye.name)))?;
            let normalized_vector = angle_to_vector(&angles);
            eye.normalized_gaze_angles = Some(angles);
            eye.normalized_gaze_vector = Some(normalized_vector);
            eye.gaze_vector = Some(denormalize(&normalized_vector, &normalizing_rot).normalize());
        }
        Ok(())
    }
}

/// The gaze model only sees left eyes: the right eye is mirrored and its
/// head yaw negated
fn model_inputs(eye: &FacePart) -> Result<(Mat, Vector2<f64>)> {
    let image = eye
        .normalized_image
        .as_ref()
        .ok_or_else(|| Error::InvalidInput(format!("{:?} has no normalized image", eye.name)))?;
    let mut head_pose = eye
        .normalized_head_rot2d
        .ok_or_else(|| Error::InvalidInput(format!("{:?} has no normalized head pose", eye.name)))?;
    if eye.name.is_mirrored() {
        head_pose[1] = -head_pose[1];
        Ok((mirror_image(image)?, head_pose))
    } else {
        Ok((image.try_clone()?, head_pose))
    }
}

/// Screen mapping parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenMapping {
    pub depth_multiplier: f64,
    pub vertical_scale: f64,
    /// Mirror x so that "left" is the user's left
    pub mirror: bool,
}

/// Fused gaze → smoothed 3D point → output-frame pixel
#[derive(Debug, Clone)]
pub struct ScreenMapper {
    camera: Camera,
    mapping: ScreenMapping,
    smoothing: SmoothingBuffer<3>,
}

impl ScreenMapper {
    #[must_use]
    pub fn new(camera: Camera, mapping: ScreenMapping, window: usize) -> Self {
        Self {
            camera,
            mapping,
            smoothing: SmoothingBuffer::new(window),
        }
    }

    /// Smoothed screen point for a face with gaze on both eyes. `None` when
    /// the face has no fused gaze or the point is not in front of the camera.
    pub fn map(&mut self, face: &Face) -> Option<Point2<f64>> {
        let (center, gaze) = fuse_eyes(face)?;
        let point = screen_point(&center, &gaze, self.mapping.depth_multiplier, self.mapping.vertical_scale);
        let smoothed = Point3::from(self.smoothing.push(point.coords));
        let pixel = self.camera.project(&smoothed)?;
        Some(if self.mapping.mirror {
            Point2::new(f64::from(self.camera.width()) - pixel.x, pixel.y)
        } else {
            pixel
        })
    }

    pub fn reset(&mut self) {
        self.smoothing.reset();
    }
}
