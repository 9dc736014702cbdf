use crate::{
    camera::Camera,
    constants::{
        CANONICAL_FACE_DISTANCE, EPSILON, MESH_LEFT_EYE_INDICES, MESH_MOUTH_INDICES, MESH_NOSE_INDEX,
        MESH_RIGHT_EYE_INDICES, NUM_MESH_LANDMARKS,
    },
    face::Face,
    utils::{
        mat::{mat_to_vector3, points2_to_mat, points3_to_mat, vector3_to_mat},
        rotation,
    },
    Error, Result,
};
use nalgebra::{Point3, Rotation3, Vector3};
use opencv::calib3d;

/// Which landmark indices mean what for a given provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaceLayout {
    pub num_landmarks: usize,
    /// This point sits at the template origin
    pub nose_index: usize,
    pub right_eye: Vec<usize>,
    pub left_eye: Vec<usize>,
    pub mouth: Vec<usize>,
}

impl FaceLayout {
    /// 468-point face-mesh layout
    #[must_use]
    pub fn mesh() -> Self {
        Self {
            num_landmarks: NUM_MESH_LANDMARKS,
            nose_index: MESH_NOSE_INDEX,
            right_eye: MESH_RIGHT_EYE_INDICES.to_vec(),
            left_eye: MESH_LEFT_EYE_INDICES.to_vec(),
            mouth: MESH_MOUTH_INDICES.to_vec(),
        }
    }

    /// Check every index refers to an existing landmark
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for an out-of-range or empty index set
    pub fn validate(&self) -> Result<()> {
        let sets = [&self.right_eye, &self.left_eye, &self.mouth];
        if sets.iter().any(|s| s.is_empty()) {
            return Err(Error::InvalidInput("Face layout has an empty index set".to_string()));
        }
        let out_of_range = std::iter::once(&self.nose_index)
            .chain(sets.iter().flat_map(|s| s.iter()))
            .find(|&&i| i >= self.num_landmarks);
        if let Some(index) = out_of_range {
            return Err(Error::InvalidInput(format!(
                "Landmark index {index} out of range for {} landmarks",
                self.num_landmarks
            )));
        }
        Ok(())
    }
}

/// Calibrated 3D landmark template and the `PnP` head-pose solver built on it.
///
/// Starts uncalibrated; [`FaceModel::set_landmark_calibration`] binds the
/// template to the current user.
#[derive(Debug, Clone)]
pub struct FaceModel {
    layout: FaceLayout,
    template: Option<Vec<Point3<f64>>>,
}

impl FaceModel {
    /// Create an uncalibrated model
    ///
    /// # Errors
    ///
    /// Returns an error if the layout indices are inconsistent
    pub fn new(layout: FaceLayout) -> Result<Self> {
        layout.validate()?;
        log::info!(
            "Initializing FaceModel with {} landmarks (nose index {})",
            layout.num_landmarks,
            layout.nose_index
        );
        Ok(Self { layout, template: None })
    }

    #[must_use]
    pub fn layout(&self) -> &FaceLayout {
        &self.layout
    }

    #[must_use]
    pub fn is_calibrated(&self) -> bool {
        self.template.is_some()
    }

    /// Nose-centred template, meters
    #[must_use]
    pub fn template(&self) -> Option<&[Point3<f64>]> {
        self.template.as_deref()
    }

    /// Replace the template with the given landmarks, shifted so the nose is
    /// at the origin. The previous template is untouched on error.
    ///
    /// # Errors
    ///
    /// Returns `CalibrationError` if the landmark count does not match the
    /// layout, any value is non-finite, or the points have no extent
    pub fn set_landmark_calibration(&mut self, landmarks: &[Point3<f64>]) -> Result<()> {
        if landmarks.len() != self.layout.num_landmarks {
            return Err(Error::CalibrationError(format!(
                "Expected {} landmarks, got {}",
                self.layout.num_landmarks,
                landmarks.len()
            )));
        }
        if landmarks.iter().any(|p| !p.coords.iter().all(|v| v.is_finite())) {
            return Err(Error::CalibrationError("Landmarks contain non-finite values".to_string()));
        }

        let (min, max) = landmarks.iter().fold(
            (Vector3::repeat(f64::INFINITY), Vector3::repeat(f64::NEG_INFINITY)),
            |(lo, hi), p| (lo.inf(&p.coords), hi.sup(&p.coords)),
        );
        let extent = max - min;
        if extent.x < EPSILON || extent.y < EPSILON {
            return Err(Error::CalibrationError(format!(
                "Degenerate landmarks with extent {:.3e} x {:.3e}",
                extent.x, extent.y
            )));
        }

        let nose = landmarks[self.layout.nose_index].coords;
        let mut template: Vec<Point3<f64>> = landmarks.iter().map(|p| Point3::from(p.coords - nose)).collect();
        template[self.layout.nose_index] = Point3::origin();

        log::info!(
            "Face model calibrated: extent {:.3} x {:.3} x {:.3} m",
            extent.x,
            extent.y,
            extent.z
        );
        self.template = Some(template);
        Ok(())
    }

    /// Turn provider landmarks (pixel x, pixel y, relative depth in pixel
    /// units) into metric camera-space points.
    ///
    /// Each point is back-projected along its pixel ray to
    /// `capture_depth + z · capture_depth / fx`.
    ///
    /// # Errors
    ///
    /// Returns `CalibrationError` for a non-positive capture depth or a point
    /// that would land behind the camera
    pub fn lift_raw_landmarks(raw: &[Point3<f64>], camera: &Camera, capture_depth: f64) -> Result<Vec<Point3<f64>>> {
        if !(capture_depth.is_finite() && capture_depth > 0.0) {
            return Err(Error::CalibrationError(format!(
                "Capture depth must be positive, got {capture_depth}"
            )));
        }
        let (fx, _) = camera.focal();
        raw.iter()
            .map(|p| {
                let depth = capture_depth + p.z * capture_depth / fx;
                if depth <= 0.0 || !depth.is_finite() {
                    return Err(Error::CalibrationError(format!("Landmark lifted to invalid depth {depth}")));
                }
                Ok(camera.back_project(&p.xy(), depth))
            })
            .collect()
    }

    /// Solve the head pose of `face` with iterative `PnP`, seeded as facing
    /// the camera one meter away.
    ///
    /// # Errors
    ///
    /// Returns `NotCalibrated` without a template, `InvalidInput` for a
    /// landmark count mismatch and `PoseEstimationError` when the solver fails
    pub fn estimate_head_pose(&self, face: &mut Face, camera: &Camera) -> Result<()> {
        let template = self.template.as_ref().ok_or(Error::NotCalibrated)?;
        if face.landmarks.len() != template.len() {
            return Err(Error::InvalidInput(format!(
                "Expected {} landmarks, got {}",
                template.len(),
                face.landmarks.len()
            )));
        }

        let object_points = points3_to_mat(template)?;
        let image_points = points2_to_mat(&face.landmarks)?;
        let mut rvec = vector3_to_mat(&Vector3::zeros())?;
        let mut tvec = vector3_to_mat(&Vector3::new(0.0, 0.0, CANONICAL_FACE_DISTANCE))?;

        let converged = calib3d::solve_pnp(
            &object_points,
            &image_points,
            &camera.matrix_mat()?,
            &camera.distortion_mat()?,
            &mut rvec,
            &mut tvec,
            true,
            calib3d::SOLVEPNP_ITERATIVE,
        )
        .map_err(|e| Error::PoseEstimationError(e.to_string()))?;
        if !converged {
            return Err(Error::PoseEstimationError("solvePnP did not converge".to_string()));
        }

        let rvec = mat_to_vector3(&rvec)?;
        let tvec = mat_to_vector3(&tvec)?;
        if !(rvec.iter().all(|v| v.is_finite()) && tvec.iter().all(|v| v.is_finite())) {
            return Err(Error::PoseEstimationError("solvePnP returned non-finite pose".to_string()));
        }

        let rot = rotation::from_rodrigues(&rvec);
        log::debug!(
            "Head pose: euler {:?} deg, distance {:.3} m",
            rotation::euler_xyz_degrees(&rot).as_slice(),
            tvec.norm()
        );
        face.head_rotation = Some(rot);
        face.head_translation = Some(tvec);
        Ok(())
    }

    /// Place the template in camera coordinates: `R · p + t`
    ///
    /// # Errors
    ///
    /// Returns `NotCalibrated` without a template and `InvalidInput` when the
    /// face has no head pose yet
    pub fn compute_3d_pose(&self, face: &mut Face) -> Result<()> {
        let template = self.template.as_ref().ok_or(Error::NotCalibrated)?;
        let (rot, t) = head_pose(face)?;
        face.model3d = Some(template.iter().map(|p| rot * p + t).collect());
        Ok(())
    }

    /// Face and eye centres from `model3d`. The face centre averages both eyes
    /// and the mouth corners. Each part also receives the head rotation.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when `model3d` or the head pose is missing
    pub fn compute_face_eye_centers(&self, face: &mut Face) -> Result<()> {
        let (rot, _) = head_pose(face)?;
        let model3d = face
            .model3d
            .as_ref()
            .ok_or_else(|| Error::InvalidInput("Face has no 3D model".to_string()))?;

        let layout = &self.layout;
        let face_indices: Vec<usize> = layout
            .right_eye
            .iter()
            .chain(&layout.left_eye)
            .chain(&layout.mouth)
            .copied()
            .collect();

        let face_center = mean_of(model3d, &face_indices);
        let right_center = mean_of(model3d, &layout.right_eye);
        let left_center = mean_of(model3d, &layout.left_eye);

        face.face.center = Some(face_center);
        face.right_eye.center = Some(right_center);
        face.left_eye.center = Some(left_center);
        for part in [&mut face.face, &mut face.left_eye, &mut face.right_eye] {
            part.head_pose_rot = Some(rot);
        }
        Ok(())
    }
}

fn head_pose(face: &Face) -> Result<(Rotation3<f64>, Vector3<f64>)> {
    match (face.head_rotation, face.head_translation) {
        (Some(rot), Some(t)) => Ok((rot, t)),
        _ => Err(Error::InvalidInput("Face has no head pose".to_string())),
    }
}

#[allow(clippy::cast_precision_loss)]
fn mean_of(points: &[Point3<f64>], indices: &[usize]) -> Vector3<f64> {
    let sum: Vector3<f64> = indices.iter().map(|&i| points[i].coords).sum();
    sum / indices.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::BoundingBox;
    use nalgebra::Point2;
    use proptest::prelude::*;

    fn synthetic_layout(num_landmarks: usize) -> FaceLayout {
        FaceLayout {
            num_landmarks,
            nose_index: 0,
            right_eye: vec![1, 2],
            left_eye: vec![3, 4],
            mouth: vec![5, 6],
        }
    }

    fn synthetic_template() -> Vec<Point3<f64>> {
        vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(-0.045, -0.035, 0.03),
            Point3::new(-0.015, -0.035, 0.025),
            Point3::new(0.015, -0.035, 0.025),
            Point3::new(0.045, -0.035, 0.03),
            Point3::new(-0.025, 0.04, 0.02),
            Point3::new(0.025, 0.04, 0.02),
            Point3::new(0.0, 0.09, 0.025),
            Point3::new(-0.07, 0.0, 0.08),
            Point3::new(0.07, 0.0, 0.08),
        ]
    }

    fn calibrated_model() -> FaceModel {
        let template = synthetic_template();
        let mut model = FaceModel::new(synthetic_layout(template.len())).unwrap();
        model.set_landmark_calibration(&template).unwrap();
        model
    }

    #[test]
    fn test_mesh_layout_is_valid() {
        assert!(FaceLayout::mesh().validate().is_ok());
        let mut layout = FaceLayout::mesh();
        layout.nose_index = NUM_MESH_LANDMARKS;
        assert!(layout.validate().is_err());
    }

    #[test]
    fn test_uncalibrated_pose_is_rejected() {
        let model = FaceModel::new(synthetic_layout(10)).unwrap();
        assert!(!model.is_calibrated());
        let camera = Camera::ideal(640, 480, 600.0);
        let mut face = Face::new(BoundingBox::new(0.0, 0.0, 1.0, 1.0), vec![Point2::origin(); 10]);
        assert!(matches!(model.estimate_head_pose(&mut face, &camera), Err(Error::NotCalibrated)));
        assert!(matches!(model.compute_3d_pose(&mut face), Err(Error::NotCalibrated)));
    }

    #[test]
    fn test_calibration_rejects_bad_input() {
        let mut model = FaceModel::new(synthetic_layout(10)).unwrap();
        assert!(matches!(
            model.set_landmark_calibration(&synthetic_template()[..5]),
            Err(Error::CalibrationError(_))
        ));

        let mut template = synthetic_template();
        template[3].y = f64::NAN;
        assert!(matches!(model.set_landmark_calibration(&template), Err(Error::CalibrationError(_))));

        let flat = vec![Point3::new(1.0, 1.0, 1.0); 10];
        assert!(matches!(model.set_landmark_calibration(&flat), Err(Error::CalibrationError(_))));
        assert!(!model.is_calibrated());
    }

    #[test]
    fn test_failed_recalibration_keeps_template() {
        let mut model = calibrated_model();
        let before = model.template().unwrap().to_vec();
        assert!(model.set_landmark_calibration(&[Point3::origin(); 3]).is_err());
        assert_eq!(model.template().unwrap(), before.as_slice());
    }

    #[test]
    fn test_estimate_head_pose_recovers_synthetic_pose() {
        let model = calibrated_model();
        let camera = Camera::ideal(640, 480, 600.0);
        let rot = rotation::from_euler_xyz(0.1, -0.2, 0.05);
        let t = Vector3::new(0.02, -0.01, 0.6);
        let projected = camera.project_points(model.template().unwrap(), &rotation::to_rodrigues(&rot), &t);

        let mut face = Face::new(BoundingBox::new(0.0, 0.0, 1.0, 1.0), projected);
        model.estimate_head_pose(&mut face, &camera).unwrap();

        let est_rot = face.head_rotation.unwrap();
        let est_t = face.head_translation.unwrap();
        assert!(est_rot.angle_to(&rot) < 1e-4);
        assert!((est_t - t).norm() < 1e-4);

        model.compute_3d_pose(&mut face).unwrap();
        let model3d = face.model3d.as_ref().unwrap();
        assert!((model3d[0].coords - t).norm() < 1e-4);

        model.compute_face_eye_centers(&mut face).unwrap();
        let left = face.left_eye.center.unwrap();
        let right = face.right_eye.center.unwrap();
        assert!(left.x > right.x);
        assert!(face.face.distance().unwrap() > 0.5);
        assert!(face.left_eye.head_pose_rot.is_some());
    }

    #[test]
    fn test_lift_raw_landmarks_scales_to_capture_depth() {
        let camera = Camera::ideal(640, 480, 600.0);
        let raw = vec![Point3::new(320.0, 240.0, 0.0), Point3::new(380.0, 240.0, 60.0)];
        let lifted = FaceModel::lift_raw_landmarks(&raw, &camera, 0.6).unwrap();
        assert!((lifted[0].coords - Vector3::new(0.0, 0.0, 0.6)).norm() < 1e-12);
        // 60 px of relative depth at fx=600 adds 10% of the capture depth
        assert!((lifted[1].z - 0.66).abs() < 1e-12);
        assert!((lifted[1].x - 0.1 * 0.66).abs() < 1e-12);

        assert!(FaceModel::lift_raw_landmarks(&raw, &camera, 0.0).is_err());
        assert!(FaceModel::lift_raw_landmarks(&[Point3::new(0.0, 0.0, -1000.0)], &camera, 0.6).is_err());
    }

    proptest! {
        #[test]
        fn prop_nose_is_exactly_origin_after_calibration(
            offset in prop::array::uniform3(-2.0f64..2.0),
            jitter in prop::collection::vec(prop::array::uniform3(-0.01f64..0.01), 10),
        ) {
            let landmarks: Vec<Point3<f64>> = synthetic_template()
                .iter()
                .zip(&jitter)
                .map(|(p, j)| Point3::new(p.x + offset[0] + j[0], p.y + offset[1] + j[1], p.z + offset[2] + j[2]))
                .collect();
            let mut model = FaceModel::new(synthetic_layout(10)).unwrap();
            model.set_landmark_calibration(&landmarks).unwrap();
            let template = model.template().unwrap();
            prop_assert_eq!(template[0], Point3::origin());
            prop_assert_eq!(template.len(), 10);
        }
    }
}
