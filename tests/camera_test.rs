//! Camera parameter files, projection and undistortion


use gaze_region_tracker::{camera::Camera, config::CameraConfig, Error, Result};
use nalgebra::{Point2, Point3, Vector3};
use opencv::{
    core::{Mat, Point, Scalar, CV_8UC1},
    imgproc,
    prelude::*,
};
use std::fs;
use std::path::PathBuf;
use test_helpers::create_test_image;

/// Write `content` to a per-test file in the system temp directory
fn write_temp(name: &str, content: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("gaze-region-tracker-{}-{name}", std::process::id()));
    fs::write(&path, content).unwrap();
    path
}

const CAMERA_1280: &str = r"
width: 1280
height: 720
matrix: [1280.0, 0.0, 640.0, 0.0, 1280.0, 360.0, 0.0, 0.0, 1.0]
distortion: [0.0, 0.0, 0.0, 0.0, 0.0]
";

#[test]
fn test_optical_axis_projects_to_image_centre() -> Result<()> {
    let path = write_temp("camera-1280.yaml", CAMERA_1280);
    let camera = Camera::load(&path)?;
    fs::remove_file(&path)?;

    let projected = camera.project_points(&[Point3::new(0.0, 0.0, 1000.0)], &Vector3::zeros(), &Vector3::zeros());
    assert_eq!(projected, vec![Point2::new(640.0, 360.0)]);
    Ok(())
}

#[test]
fn test_loads_opencv_style_matrices() -> Result<()> {
    let path = write_temp(
        "camera-stored.yaml",
        r"
image_width: 640
image_height: 480
camera_matrix:
  rows: 3
  cols: 3
  data: [600.0, 0.0, 319.5, 0.0, 610.0, 239.5, 0.0, 0.0, 1.0]
distortion_coefficients:
  rows: 1
  cols: 5
  data: [-0.1, 0.01, 0.001, 0.0, 0.0]
",
    );
    let camera = Camera::load(&path)?;
    fs::remove_file(&path)?;

    assert_eq!((camera.width(), camera.height()), (640, 480));
    assert_eq!(camera.focal(), (600.0, 610.0));
    assert_eq!(camera.principal_point(), (319.5, 239.5));
    assert_eq!(camera.distortion(), &[-0.1, 0.01, 0.001, 0.0, 0.0]);
    assert_eq!(camera.without_distortion().distortion(), &[0.0; 5]);
    Ok(())
}

#[test]
fn test_missing_file_is_io_error() {
    let result = Camera::load("/nonexistent/camera.yaml");
    assert!(matches!(result, Err(Error::Io(_))));
}

#[test]
fn test_malformed_files_are_config_errors() {
    let cases = [
        ("not-yaml.yaml", "width: [1280"),
        ("missing-matrix.yaml", "width: 1280\nheight: 720\ndistortion: [0, 0, 0, 0, 0]\n"),
        (
            "short-distortion.yaml",
            "width: 1280\nheight: 720\nmatrix: [1280, 0, 640, 0, 1280, 360, 0, 0, 1]\ndistortion: [0, 0]\n",
        ),
        (
            "zero-focal.yaml",
            "width: 1280\nheight: 720\nmatrix: [0, 0, 640, 0, 1280, 360, 0, 0, 1]\ndistortion: [0, 0, 0, 0, 0]\n",
        ),
    ];

    for (name, content) in cases {
        let path = write_temp(name, content);
        let result = Camera::load(&path);
        fs::remove_file(&path).unwrap();
        assert!(
            matches!(result, Err(Error::ConfigError(_))),
            "{name} should be rejected, got {result:?}"
        );
    }
}

#[test]
fn test_camera_config_falls_back_to_ideal_camera() -> Result<()> {
    let config = CameraConfig {
        params: None,
        width: 1280,
        height: 720,
    };
    // Built from what the source delivers, not from the requested size
    let camera = config.camera_for(640, 480)?;
    assert_eq!((camera.width(), camera.height()), (640, 480));
    assert_eq!(camera.principal_point(), (320.0, 240.0));
    assert_eq!(camera.focal(), (640.0, 640.0));
    assert_eq!(camera.distortion(), &[0.0; 5]);
    Ok(())
}

#[test]
fn test_camera_config_reads_params_file() -> Result<()> {
    let path = write_temp("camera-config.yaml", CAMERA_1280);
    let config = CameraConfig {
        params: Some(path.clone()),
        width: 640,
        height: 480,
    };
    let camera = config.camera_for(1280, 720);
    let mismatch = config.camera_for(640, 480);
    fs::remove_file(&path)?;

    let camera = camera?;
    assert_eq!((camera.width(), camera.height()), (1280, 720));
    match mismatch {
        Err(Error::ConfigError(msg)) => assert!(msg.contains("640x480"), "unexpected message: {msg}"),
        other => panic!("expected ConfigError, got {other:?}"),
    }
    Ok(())
}

#[test]
fn test_undistort_keeps_frame_size() -> Result<()> {
    let path = write_temp(
        "camera-distorted.yaml",
        "width: 320\nheight: 240\nmatrix: [300, 0, 160, 0, 300, 120, 0, 0, 1]\ndistortion: [0.2, -0.1, 0, 0, 0]\n",
    );
    let camera = Camera::load(&path)?;
    fs::remove_file(&path)?;

    let image = create_test_image(240, 320)?;
    let undistorted = camera.undistort(&image)?;
    assert_eq!((undistorted.cols(), undistorted.rows()), (320, 240));
    assert_eq!(undistorted.typ(), image.typ());
    Ok(())
}

#[test]
fn test_undistort_moves_features_to_ideal_projection() -> Result<()> {
    const SHIFT: i32 = 4;
    let path = write_temp(
        "camera-barrel.yaml",
        "width: 320\nheight: 240\nmatrix: [300, 0, 160, 0, 300, 120, 0, 0, 1]\ndistortion: [0.4, 0, 0, 0, 0]\n",
    );
    let camera = Camera::load(&path)?;
    fs::remove_file(&path)?;

    let point = Point3::new(0.4, 0.25, 1.0);
    let distorted = camera.project(&point).unwrap();
    let ideal = camera.without_distortion().project(&point).unwrap();
    assert!((distorted - ideal).norm() > 10.0, "distortion too weak to tell apart");

    // Sub-pixel centre with SHIFT fractional bits
    let scale = f64::from(1 << SHIFT);
    let mut image = Mat::new_rows_cols_with_default(240, 320, CV_8UC1, Scalar::all(0.0))?;
    imgproc::circle(
        &mut image,
        Point::new((distorted.x * scale).round() as i32, (distorted.y * scale).round() as i32),
        3 << SHIFT,
        Scalar::all(255.0),
        -1,
        imgproc::LINE_8,
        SHIFT,
    )?;

    let undistorted = camera.undistort(&image)?;
    let moments = imgproc::moments(&undistorted, false)?;
    assert!(moments.m00 > 0.0, "dot vanished after undistortion");
    let centre = Point2::new(moments.m10 / moments.m00, moments.m01 / moments.m00);
    assert!(
        (centre - ideal).norm() < 1.0,
        "dot at {centre:?}, expected near {ideal:?}"
    );
    Ok(())
}
