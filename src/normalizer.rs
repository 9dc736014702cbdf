//! Head-pose normalization: rectify an eye (or the whole face) into a
//! virtual camera looking straight at it from a fixed distance.

use crate::{
    camera::Camera,
    constants::{DEFAULT_NORMALIZED_DISTANCE, EPSILON, NORMALIZED_EYE_FOCAL, NORMALIZED_EYE_HEIGHT, NORMALIZED_EYE_WIDTH},
    face::{FacePart, FacePartName},
    utils::{mat::matrix3_to_mat, rotation},
    Error, Result,
};
use nalgebra::{Matrix3, Rotation3, Vector2, Vector3};
use opencv::{
    core::{Mat, Scalar, Size},
    imgproc,
    prelude::*,
};

/// Rectifies face parts into the normalized camera
pub struct HeadPoseNormalizer {
    camera: Camera,
    normalized_camera: Camera,
    normalized_distance: f64,
}

impl HeadPoseNormalizer {
    /// # Errors
    ///
    /// Returns `InvalidInput` if the normalized distance is not positive
    pub fn new(camera: Camera, normalized_camera: Camera, normalized_distance: f64) -> Result<Self> {
        if !(normalized_distance.is_finite() && normalized_distance > 0.0) {
            return Err(Error::InvalidInput(format!(
                "Normalized distance must be positive, got {normalized_distance}"
            )));
        }
        log::info!(
            "Initializing HeadPoseNormalizer: {}x{} crop at {:.2} m",
            normalized_camera.width(),
            normalized_camera.height(),
            normalized_distance
        );
        Ok(Self {
            camera,
            normalized_camera,
            normalized_distance,
        })
    }

    /// 60×36 eye camera with f=960 at 0.6 m
    ///
    /// # Errors
    ///
    /// See [`HeadPoseNormalizer::new`]
    pub fn for_eyes(camera: Camera) -> Result<Self> {
        Self::new(
            camera,
            Camera::ideal(NORMALIZED_EYE_WIDTH, NORMALIZED_EYE_HEIGHT, NORMALIZED_EYE_FOCAL),
            DEFAULT_NORMALIZED_DISTANCE,
        )
    }

    #[must_use]
    pub fn normalized_camera(&self) -> &Camera {
        &self.normalized_camera
    }

    /// Fill the normalizing rotation, normalized image and normalized head
    /// angles of `part`. Eye parts come out single channel and histogram
    /// equalized.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the part has no centre or head rotation, and
    /// an `OpenCV` error if the warp fails
    pub fn normalize(&self, image: &Mat, part: &mut FacePart) -> Result<()> {
        let center = part
            .center
            .ok_or_else(|| Error::InvalidInput(format!("{:?} has no centre", part.name)))?;
        let head_rot = part
            .head_pose_rot
            .ok_or_else(|| Error::InvalidInput(format!("{:?} has no head rotation", part.name)))?;

        let normalizing_rot = compute_normalizing_rotation(&center, &head_rot)?;
        let scale = self.normalized_distance / center.norm();
        let warp = self.warp_matrix(&normalizing_rot, scale);

        let size = Size::new(
            i32::try_from(self.normalized_camera.width())
                .map_err(|_| Error::InvalidInput("Normalized width overflow".to_string()))?,
            i32::try_from(self.normalized_camera.height())
                .map_err(|_| Error::InvalidInput("Normalized height overflow".to_string()))?,
        );
        let mut warped = Mat::default();
        imgproc::warp_perspective(
            image,
            &mut warped,
            &matrix3_to_mat(&warp)?,
            size,
            imgproc::INTER_LINEAR,
            opencv::core::BORDER_CONSTANT,
            Scalar::default(),
        )?;

        let normalized = if part.name == FacePartName::Face {
            warped
        } else {
            equalize_gray(&warped)?
        };

        part.normalized_head_rot2d = Some(normalized_head_angles(&normalizing_rot, &head_rot));
        part.normalizing_rot = Some(normalizing_rot);
        part.normalized_image = Some(normalized);
        Ok(())
    }

    /// `Kn · diag(1, 1, scale) · N · K⁻¹`
    #[must_use]
    pub fn warp_matrix(&self, normalizing_rot: &Rotation3<f64>, scale: f64) -> Matrix3<f64> {
        let scaling = Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, scale));
        self.normalized_camera.matrix() * scaling * normalizing_rot.matrix() * self.camera.camera_matrix_inverse()
    }
}

/// Rotation whose rows are the normalized camera axes: z towards the part
/// centre, x kept as close as possible to the head's x axis.
///
/// # Errors
///
/// Returns `PoseEstimationError` for a zero-length centre or a head x axis parallel
/// to the line of sight
pub fn compute_normalizing_rotation(center: &Vector3<f64>, head_rot: &Rotation3<f64>) -> Result<Rotation3<f64>> {
    let distance = center.norm();
    if !(distance.is_finite() && distance > EPSILON) {
        return Err(Error::PoseEstimationError("Part centre is at the camera origin".to_string()));
    }
    let z_axis = center / distance;
    let head_x = head_rot.matrix().column(0).into_owned();
    let y_axis = z_axis.cross(&head_x);
    let y_norm = y_axis.norm();
    if y_norm < EPSILON {
        return Err(Error::PoseEstimationError("Head x axis is parallel to the line of sight".to_string()));
    }
    let y_axis = y_axis / y_norm;
    let x_axis = y_axis.cross(&z_axis).normalize();
    Ok(Rotation3::from_matrix_unchecked(Matrix3::from_rows(&[
        x_axis.transpose(),
        y_axis.transpose(),
        z_axis.transpose(),
    ])))
}

/// (pitch, yaw) of the head as seen by the normalized camera, yaw sign flipped
#[must_use]
pub fn normalized_head_angles(normalizing_rot: &Rotation3<f64>, head_rot: &Rotation3<f64>) -> Vector2<f64> {
    let angles = rotation::euler_xyz(&(normalizing_rot * head_rot));
    Vector2::new(angles[0], -angles[1])
}

fn equalize_gray(image: &Mat) -> Result<Mat> {
    let gray = match image.channels() {
        1 => image.try_clone()?,
        3 => {
            let mut gray = Mat::default();
            imgproc::cvt_color(image, &mut gray, imgproc::COLOR_BGR2GRAY, 0)?;
            gray
        }
        4 => {
            let mut gray = Mat::default();
            imgproc::cvt_color(image, &mut gray, imgproc::COLOR_BGRA2GRAY, 0)?;
            gray
        }
        n => return Err(Error::InvalidInput(format!("Unsupported channel count {n}"))),
    };
    let mut equalized = Mat::default();
    imgproc::equalize_hist(&gray, &mut equalized)?;
    Ok(equalized)
}
