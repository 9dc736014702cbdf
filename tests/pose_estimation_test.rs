//! Head pose recovery and gaze estimation on synthetic heads


use gaze_region_tracker::{
    gaze::GazeEstimator,
    normalizer::HeadPoseNormalizer,
    pose_estimation::FaceModel,
    utils::rotation,
    Error, Result,
};
use nalgebra::{Rotation3, Vector3};
use opencv::prelude::*;
use test_helpers::{
    assert_point3_near, create_test_frame, synthetic_layout, synthetic_template, test_camera, ConstantGaze, HeadPose,
    CAPTURE_DEPTH,
};

fn calibrated_model() -> Result<FaceModel> {
    let mut model = FaceModel::new(synthetic_layout())?;
    model.set_landmark_calibration(&synthetic_template())?;
    Ok(model)
}

#[test]
fn test_head_pose_requires_calibration() -> Result<()> {
    let model = FaceModel::new(synthetic_layout())?;
    let camera = test_camera();
    let mut face = HeadPose::facing(0.0, 0.0, 0.6).face(&camera);

    assert!(matches!(model.estimate_head_pose(&mut face, &camera), Err(Error::NotCalibrated)));
    assert!(face.head_rotation.is_none());
    Ok(())
}

#[test]
fn test_head_pose_recovers_rotation_and_translation() -> Result<()> {
    let model = calibrated_model()?;
    let camera = test_camera();
    let poses = [
        HeadPose::facing(0.0, 0.0, 0.6),
        HeadPose {
            rotation: rotation::from_euler_xyz(0.1, 0.2, 0.0),
            translation: Vector3::new(0.05, -0.02, 0.7),
        },
        HeadPose {
            rotation: rotation::from_euler_xyz(-0.15, -0.25, 0.05),
            translation: Vector3::new(-0.1, 0.05, 0.9),
        },
    ];

    for pose in poses {
        let mut face = pose.face(&camera);
        model.estimate_head_pose(&mut face, &camera)?;

        let translation = face.head_translation.unwrap();
        assert!(
            (translation - pose.translation).norm() < 1e-4,
            "translation {translation:?} vs {:?}",
            pose.translation
        );
        let rotation: Rotation3<f64> = face.head_rotation.unwrap();
        assert!(rotation.angle_to(&pose.rotation) < 1e-3);
    }
    Ok(())
}

#[test]
fn test_3d_pose_places_template_in_camera_space() -> Result<()> {
    let model = calibrated_model()?;
    let camera = test_camera();
    let pose = HeadPose {
        rotation: rotation::from_euler_xyz(0.0, 0.3, 0.0),
        translation: Vector3::new(0.0, 0.0, 0.8),
    };
    let mut face = pose.face(&camera);

    model.estimate_head_pose(&mut face, &camera)?;
    model.compute_3d_pose(&mut face)?;
    model.compute_face_eye_centers(&mut face)?;

    let model3d = face.model3d.as_ref().unwrap();
    for (actual, expected) in model3d.iter().zip(pose.camera_points()) {
        assert_point3_near(actual, &expected, 1e-3);
    }

    let right = face.right_eye.center.unwrap();
    let left = face.left_eye.center.unwrap();
    // The user's right eye sits at negative template x
    assert!(right.x < left.x);
    assert!(face.face.distance().unwrap() > 0.7);
    Ok(())
}

#[test]
fn test_lifted_raw_landmarks_reproduce_camera_points() -> Result<()> {
    let camera = test_camera();
    let pose = HeadPose::facing(0.1, -0.05, CAPTURE_DEPTH);

    let lifted = FaceModel::lift_raw_landmarks(&pose.raw_landmarks(&camera), &camera, CAPTURE_DEPTH)?;
    for (actual, expected) in lifted.iter().zip(pose.camera_points()) {
        assert_point3_near(actual, &expected, 1e-9);
    }
    Ok(())
}

#[test]
fn test_gaze_at_camera_points_back_at_each_eye() -> Result<()> {
    let camera = test_camera();
    let normalizer = HeadPoseNormalizer::for_eyes(camera.clone())?;
    let mut estimator = GazeEstimator::new(
        camera.clone(),
        calibrated_model()?,
        normalizer,
        Box::new(ConstantGaze::at_camera()),
    );

    let pose = HeadPose {
        rotation: rotation::from_euler_xyz(0.05, -0.2, 0.0),
        translation: Vector3::new(0.1, 0.0, 0.65),
    };
    let mut face = pose.face(&camera);
    estimator.estimate(&create_test_frame()?, &mut face)?;

    for eye in face.eyes() {
        let center = eye.center.unwrap();
        let gaze = eye.gaze_vector.unwrap();
        assert!((gaze.norm() - 1.0).abs() < 1e-9);
        assert!((gaze + center.normalize()).norm() < 1e-6, "gaze {gaze:?} should point at the camera");

        let image = eye.normalized_image.as_ref().unwrap();
        assert_eq!((image.cols(), image.rows()), (60, 36));
    }
    Ok(())
}
