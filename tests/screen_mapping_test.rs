//! Gaze to screen mapping: smoothing, projection, mirroring and regions

use gaze_region_tracker::{
    camera::Camera,
    face::{BoundingBox, Face},
    gaze::{angle_to_vector, denormalize, ScreenMapper, ScreenMapping},
    region::{Region, RegionClassifier},
    smoothing::SmoothingBuffer,
    utils::rotation,
};
use nalgebra::{Point2, Vector2, Vector3};
use proptest::prelude::*;

fn face_with_gaze(gaze: Vector3<f64>) -> Face {
    let mut face = Face::new(BoundingBox::new(500.0, 300.0, 700.0, 500.0), Vec::new());
    face.left_eye.center = Some(Vector3::new(0.03, 0.0, 0.6));
    face.right_eye.center = Some(Vector3::new(-0.03, 0.0, 0.6));
    let gaze = gaze.normalize();
    face.left_eye.gaze_vector = Some(gaze);
    face.right_eye.gaze_vector = Some(gaze);
    face
}

fn mapper(mirror: bool, window: usize) -> ScreenMapper {
    ScreenMapper::new(
        Camera::ideal(1280, 720, 1280.0),
        ScreenMapping {
            depth_multiplier: 0.5,
            vertical_scale: 1.0,
            mirror,
        },
        window,
    )
}

#[test]
fn test_smoothing_keeps_last_window() {
    let mut buffer = SmoothingBuffer::<2>::new(3);
    let mut last = Vector2::zeros();
    for x in [0.0, 10.0, 20.0, 30.0] {
        last = buffer.push(Vector2::new(x, 0.0));
    }
    assert_eq!(last, Vector2::new(20.0, 0.0));
    assert_eq!(buffer.len(), 3);
}

#[test]
fn test_regions_with_100_pixel_boxes() {
    let classifier = RegionClassifier::new(1280, 720, 100.0 / 1280.0).unwrap();
    assert_eq!(classifier.classify(&Point2::new(50.0, 360.0)), Some(Region::Left));
    assert_eq!(classifier.classify(&Point2::new(640.0, 360.0)), None);
    assert_eq!(classifier.classify(&Point2::new(1200.0, 360.0)), Some(Region::Right));
}

#[test]
fn test_gaze_at_camera_maps_to_frame_centre() {
    let mut mapper = mapper(true, 1);
    let point = mapper.map(&face_with_gaze(Vector3::new(0.0, 0.0, -1.0))).unwrap();
    assert!((point.x - 640.0).abs() < 1e-9);
    assert!((point.y - 360.0).abs() < 1e-9);
}

#[test]
fn test_mirroring_flips_the_region() {
    let classifier = RegionClassifier::new(1280, 720, 0.25).unwrap();
    // Looking towards the camera's +x side
    let face = face_with_gaze(Vector3::new(0.5, 0.0, -1.0));

    let mirrored = mapper(true, 1).map(&face).unwrap();
    let direct = mapper(false, 1).map(&face).unwrap();

    assert!((mirrored.x + direct.x - 1280.0).abs() < 1e-9);
    assert_eq!(classifier.classify(&direct), Some(Region::Right));
    assert_eq!(classifier.classify(&mirrored), Some(Region::Left));
}

#[test]
fn test_face_without_gaze_is_not_mapped() {
    let mut face = face_with_gaze(Vector3::new(0.0, 0.0, -1.0));
    face.right_eye.gaze_vector = None;
    assert!(mapper(true, 3).map(&face).is_none());
}

#[test]
fn test_mapper_smooths_and_resets() {
    let mut mapper = mapper(false, 4);
    let centre = face_with_gaze(Vector3::new(0.0, 0.0, -1.0));
    let right = face_with_gaze(Vector3::new(0.5, 0.0, -1.0));

    let at_centre = mapper.map(&centre).unwrap();
    let blended = mapper.map(&right).unwrap();
    mapper.reset();
    let fresh = mapper.map(&right).unwrap();

    assert!(blended.x > at_centre.x);
    assert!(fresh.x > blended.x);
}

proptest! {
    #[test]
    fn prop_denormalized_gaze_is_unit(
        pitch in -1.2f64..1.2,
        yaw in -1.2f64..1.2,
        a in -3.0f64..3.0,
        b in -1.5f64..1.5,
        c in -3.0f64..3.0,
    ) {
        let vector = denormalize(&angle_to_vector(&Vector2::new(pitch, yaw)), &rotation::from_euler_xyz(a, b, c));
        prop_assert!((vector.norm() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn prop_default_regions_are_exclusive(x in -100.0f64..1400.0, fraction in 0.01f64..0.49) {
        let classifier = RegionClassifier::new(1280, 720, fraction).unwrap();
        let hits = classifier
            .boxes()
            .iter()
            .filter(|b| b.contains_x(x))
            .count();
        prop_assert!(hits <= 1);
        prop_assert_eq!(classifier.classify(&Point2::new(x, 0.0)).is_some(), hits == 1);
    }

    #[test]
    fn prop_smoothing_is_mean_of_window(
        window in 1usize..8,
        values in prop::collection::vec(-1000.0f64..1000.0, 1..30),
    ) {
        let mut buffer = SmoothingBuffer::<1>::new(window);
        for (i, &v) in values.iter().enumerate() {
            let smoothed = buffer.push(nalgebra::Vector1::new(v));
            let start = (i + 1).saturating_sub(window);
            let tail = &values[start..=i];
            #[allow(clippy::cast_precision_loss)]
            let mean = tail.iter().sum::<f64>() / tail.len() as f64;
            prop_assert!(buffer.len() <= window);
            prop_assert!((smoothed[0] - mean).abs() < 1e-6);
        }
    }
}
