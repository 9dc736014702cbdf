//! Per-frame face records produced by the landmark provider and filled in by
//! the pose, normalization and gaze stages.

use nalgebra::{Point2, Point3, Rotation3, Vector2, Vector3};
use opencv::core::Mat;

/// Axis-aligned face box in pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    #[must_use]
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    #[must_use]
    pub fn width(&self) -> f64 {
        (self.x2 - self.x1).max(0.0)
    }

    #[must_use]
    pub fn height(&self) -> f64 {
        (self.y2 - self.y1).max(0.0)
    }

    #[must_use]
    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    #[must_use]
    pub fn center(&self) -> Point2<f64> {
        Point2::new((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Intersection over union with another box
    #[must_use]
    pub fn iou(&self, other: &Self) -> f64 {
        let inter = Self::new(
            self.x1.max(other.x1),
            self.y1.max(other.y1),
            self.x2.min(other.x2),
            self.y2.min(other.y2),
        )
        .area();
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FacePartName {
    Face,
    LeftEye,
    RightEye,
}

impl FacePartName {
    /// The right eye is mirrored so both eyes look like a left eye to the gaze model
    #[must_use]
    pub fn is_mirrored(self) -> bool {
        self == Self::RightEye
    }
}

/// One part of a face (whole face or a single eye) as it moves through
/// normalization and gaze estimation.
#[derive(Debug)]
pub struct FacePart {
    pub name: FacePartName,
    /// Centre in camera coordinates, meters
    pub center: Option<Vector3<f64>>,
    pub head_pose_rot: Option<Rotation3<f64>>,
    pub normalizing_rot: Option<Rotation3<f64>>,
    /// (pitch, yaw) of the head in the normalized camera
    pub normalized_head_rot2d: Option<Vector2<f64>>,
    pub normalized_image: Option<Mat>,
    /// (pitch, yaw) of the gaze in the normalized camera
    pub normalized_gaze_angles: Option<Vector2<f64>>,
    pub normalized_gaze_vector: Option<Vector3<f64>>,
    /// Unit gaze direction in camera coordinates
    pub gaze_vector: Option<Vector3<f64>>,
}

impl FacePart {
    #[must_use]
    pub fn new(name: FacePartName) -> Self {
        Self {
            name,
            center: None,
            head_pose_rot: None,
            normalizing_rot: None,
            normalized_head_rot2d: None,
            normalized_image: None,
            normalized_gaze_angles: None,
            normalized_gaze_vector: None,
            gaze_vector: None,
        }
    }

    /// Distance of the part centre from the camera, in meters
    #[must_use]
    pub fn distance(&self) -> Option<f64> {
        self.center.map(|c| c.norm())
    }
}

/// One detected face and everything estimated about it this frame
#[derive(Debug)]
pub struct Face {
    pub bbox: BoundingBox,
    /// Image landmarks, pixels
    pub landmarks: Vec<Point2<f64>>,
    /// Provider landmarks with relative depth, only filled for calibration
    pub raw_landmarks: Option<Vec<Point3<f64>>>,
    pub head_rotation: Option<Rotation3<f64>>,
    pub head_translation: Option<Vector3<f64>>,
    /// Calibrated template placed in camera coordinates
    pub model3d: Option<Vec<Point3<f64>>>,
    pub face: FacePart,
    pub left_eye: FacePart,
    pub right_eye: FacePart,
}

impl Face {
    #[must_use]
    pub fn new(bbox: BoundingBox, landmarks: Vec<Point2<f64>>) -> Self {
        Self {
            bbox,
            landmarks,
            raw_landmarks: None,
            head_rotation: None,
            head_translation: None,
            model3d: None,
            face: FacePart::new(FacePartName::Face),
            left_eye: FacePart::new(FacePartName::LeftEye),
            right_eye: FacePart::new(FacePartName::RightEye),
        }
    }

    /// Both eyes, in a fixed order
    pub fn eyes_mut(&mut self) -> [&mut FacePart; 2] {
        [&mut self.left_eye, &mut self.right_eye]
    }

    #[must_use]
    pub fn eyes(&self) -> [&FacePart; 2] {
        [&self.left_eye, &self.right_eye]
    }

    /// Index of the face with the largest box
    #[must_use]
    pub fn dominant(faces: &[Self]) -> Option<usize> {
        faces
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.bbox.area().total_cmp(&b.bbox.area()))
            .map(|(i, _)| i)
    }
}
