//! Camera intrinsics, Brown–Conrady distortion and image undistortion.

use crate::{
    constants::MIN_PROJECTION_DEPTH,
    utils::{mat::matrix3_to_mat, rotation},
    Error, Result,
};
use nalgebra::{Matrix3, Point2, Point3, Vector3};
use opencv::{calib3d, core::Mat, prelude::*};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Intrinsic matrix as it may appear in a parameter file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MatrixSource {
    /// Nine values, row-major
    Flat(Vec<f64>),
    /// Three rows of three values
    Rows(Vec<Vec<f64>>),
    /// `OpenCV` `FileStorage` style `{rows, cols, data}`
    Stored { rows: usize, cols: usize, data: Vec<f64> },
}

impl MatrixSource {
    fn values(&self) -> Vec<f64> {
        match self {
            Self::Flat(values) => values.clone(),
            Self::Rows(rows) => rows.iter().flatten().copied().collect(),
            Self::Stored { data, .. } => data.clone(),
        }
    }

    fn shape_matches(&self, rows: usize, cols: usize) -> bool {
        match self {
            Self::Flat(values) => values.len() == rows * cols,
            Self::Rows(r) => r.len() == rows && r.iter().all(|row| row.len() == cols),
            Self::Stored { rows: r, cols: c, data } => *r == rows && *c == cols && data.len() == rows * cols,
        }
    }
}

/// Camera parameter record, as loaded from YAML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraParams {
    #[serde(alias = "image_width")]
    pub width: u32,
    #[serde(alias = "image_height")]
    pub height: u32,
    #[serde(alias = "camera_matrix")]
    pub matrix: MatrixSource,
    /// k1, k2, p1, p2, k3
    #[serde(alias = "distortion_coefficients")]
    pub distortion: MatrixSource,
}

/// Pinhole camera with radial-tangential distortion.
///
/// Immutable once built; every projection is a pure function of the intrinsics.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    width: u32,
    height: u32,
    matrix: Matrix3<f64>,
    distortion: [f64; 5],
}

impl Camera {
    /// Build a camera from an in-memory parameter record
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - The image size is zero
    /// - The matrix is not 3×3, has non-finite entries or non-positive focal lengths
    /// - There are not exactly 5 finite distortion coefficients
    pub fn from_params(params: &CameraParams) -> Result<Self> {
        if params.width == 0 || params.height == 0 {
            return Err(Error::ConfigError(format!(
                "Invalid image size {}x{}",
                params.width, params.height
            )));
        }

        if !params.matrix.shape_matches(3, 3) {
            return Err(Error::ConfigError("Camera matrix must be 3x3".to_string()));
        }
        let values = params.matrix.values();
        if values.iter().any(|v| !v.is_finite()) {
            return Err(Error::ConfigError("Camera matrix has non-finite entries".to_string()));
        }
        let matrix = Matrix3::from_row_slice(&values);
        if matrix[(0, 0)] <= 0.0 || matrix[(1, 1)] <= 0.0 {
            return Err(Error::ConfigError(format!(
                "Focal lengths must be positive, got fx={} fy={}",
                matrix[(0, 0)],
                matrix[(1, 1)]
            )));
        }
        if matrix[(1, 0)] != 0.0 || matrix[(2, 0)] != 0.0 || matrix[(2, 1)] != 0.0 || matrix[(2, 2)] != 1.0 {
            return Err(Error::ConfigError(
                "Camera matrix must be upper triangular with a unit last row".to_string(),
            ));
        }

        let coefficients = params.distortion.values();
        if coefficients.len() != 5 {
            return Err(Error::ConfigError(format!(
                "Expected 5 distortion coefficients, got {}",
                coefficients.len()
            )));
        }
        if coefficients.iter().any(|v| !v.is_finite()) {
            return Err(Error::ConfigError("Distortion coefficients must be finite".to_string()));
        }
        let mut distortion = [0.0; 5];
        distortion.copy_from_slice(&coefficients);

        log::info!(
            "Camera {}x{} fx={:.1} fy={:.1} cx={:.1} cy={:.1}",
            params.width,
            params.height,
            matrix[(0, 0)],
            matrix[(1, 1)],
            matrix[(0, 2)],
            matrix[(1, 2)]
        );

        Ok(Self {
            width: params.width,
            height: params.height,
            matrix,
            distortion,
        })
    }

    /// Load camera parameters from a YAML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid YAML, or
    /// fails the checks of [`Camera::from_params`]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        log::info!("Loading camera parameters from {}", path.as_ref().display());
        let content = fs::read_to_string(path)?;
        let params: CameraParams = serde_yaml::from_str(&content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse camera parameters: {e}")))?;
        Self::from_params(&params)
    }

    /// Pinhole camera with no distortion and the principal point at the image centre
    #[must_use]
    pub fn ideal(width: u32, height: u32, focal: f64) -> Self {
        Self {
            width,
            height,
            matrix: Matrix3::new(
                focal,
                0.0,
                f64::from(width) / 2.0,
                0.0,
                focal,
                f64::from(height) / 2.0,
                0.0,
                0.0,
                1.0,
            ),
            distortion: [0.0; 5],
        }
    }

    /// Same intrinsics with distortion removed, for images that were already undistorted
    #[must_use]
    pub fn without_distortion(&self) -> Self {
        Self {
            distortion: [0.0; 5],
            ..self.clone()
        }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }

    /// Distortion coefficients (k1, k2, p1, p2, k3)
    #[must_use]
    pub fn distortion(&self) -> &[f64; 5] {
        &self.distortion
    }

    #[must_use]
    pub fn focal(&self) -> (f64, f64) {
        (self.matrix[(0, 0)], self.matrix[(1, 1)])
    }

    #[must_use]
    pub fn principal_point(&self) -> (f64, f64) {
        (self.matrix[(0, 2)], self.matrix[(1, 2)])
    }

    /// Closed-form inverse of the (upper triangular) intrinsic matrix
    #[must_use]
    pub fn camera_matrix_inverse(&self) -> Matrix3<f64> {
        let (fx, fy) = self.focal();
        let (cx, cy) = self.principal_point();
        let skew = self.matrix[(0, 1)];
        Matrix3::new(
            1.0 / fx,
            -skew / (fx * fy),
            (skew * cy - cx * fy) / (fx * fy),
            0.0,
            1.0 / fy,
            -cy / fy,
            0.0,
            0.0,
            1.0,
        )
    }

    /// Intrinsic matrix as a `CV_64F` Mat
    ///
    /// # Errors
    ///
    /// Returns an error if the Mat cannot be allocated
    pub fn matrix_mat(&self) -> Result<Mat> {
        matrix3_to_mat(&self.matrix)
    }

    /// Distortion coefficients as a 5×1 `CV_64F` Mat
    ///
    /// # Errors
    ///
    /// Returns an error if the Mat cannot be allocated
    pub fn distortion_mat(&self) -> Result<Mat> {
        let rows: Vec<[f64; 1]> = self.distortion.iter().map(|&d| [d]).collect();
        Ok(Mat::from_slice_2d(&rows)?)
    }

    fn distort_normalized(&self, x: f64, y: f64) -> (f64, f64) {
        let [k1, k2, p1, p2, k3] = self.distortion;
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let radial = 1.0 + k1 * r2 + k2 * r4 + k3 * r6;
        let x_tan = 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
        let y_tan = p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
        (x * radial + x_tan, y * radial + y_tan)
    }

    fn project_camera_point(&self, point: &Vector3<f64>) -> Point2<f64> {
        let (xd, yd) = self.distort_normalized(point.x / point.z, point.y / point.z);
        let m = &self.matrix;
        Point2::new(
            m[(0, 0)] * xd + m[(0, 1)] * yd + m[(0, 2)],
            m[(1, 1)] * yd + m[(1, 2)],
        )
    }

    /// Project object points through `R(rvec)·p + tvec` onto the image.
    ///
    /// Points on or behind the camera plane yield non-finite coordinates.
    #[must_use]
    pub fn project_points(&self, points: &[Point3<f64>], rvec: &Vector3<f64>, tvec: &Vector3<f64>) -> Vec<Point2<f64>> {
        let rotation = rotation::from_rodrigues(rvec);
        points
            .iter()
            .map(|p| self.project_camera_point(&(rotation * p.coords + tvec)))
            .collect()
    }

    /// Project a single camera-space point, `None` when it is not in front of the camera
    #[must_use]
    pub fn project(&self, point: &Point3<f64>) -> Option<Point2<f64>> {
        if point.z.is_nan() || point.z < MIN_PROJECTION_DEPTH {
            return None;
        }
        let pixel = self.project_camera_point(&point.coords);
        (pixel.x.is_finite() && pixel.y.is_finite()).then_some(pixel)
    }

    /// Camera-space point at `depth` along the undistorted ray through a pixel
    #[must_use]
    pub fn back_project(&self, pixel: &Point2<f64>, depth: f64) -> Point3<f64> {
        let ray = self.camera_matrix_inverse() * Vector3::new(pixel.x, pixel.y, 1.0);
        Point3::from(ray * depth)
    }

    /// Remove lens distortion, keeping the same intrinsic matrix
    ///
    /// # Errors
    ///
    /// Returns an error if the `OpenCV` remap fails
    pub fn undistort(&self, image: &Mat) -> Result<Mat> {
        let matrix = self.matrix_mat()?;
        let mut output = Mat::default();
        if self.distortion.iter().all(|&d| d == 0.0) {
            image.copy_to(&mut output)?;
            return Ok(output);
        }
        calib3d::undistort(image, &mut output, &matrix, &self.distortion_mat()?, &matrix)?;
        Ok(output)
    }
}
