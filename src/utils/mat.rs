//! Conversions between `nalgebra` geometry and `OpenCV` matrices.

use crate::{Error, Result};
use nalgebra::{Matrix3, Point2, Point3, Vector3};
use opencv::{
    core::{Mat, Point},
    prelude::*,
};

/// Copy a 3×3 matrix into a `CV_64F` Mat
///
/// # Errors
///
/// Returns an error if the Mat cannot be allocated
pub fn matrix3_to_mat(matrix: &Matrix3<f64>) -> Result<Mat> {
    let rows: [[f64; 3]; 3] = [
        [matrix[(0, 0)], matrix[(0, 1)], matrix[(0, 2)]],
        [matrix[(1, 0)], matrix[(1, 1)], matrix[(1, 2)]],
        [matrix[(2, 0)], matrix[(2, 1)], matrix[(2, 2)]],
    ];
    Ok(Mat::from_slice_2d(&rows)?)
}

/// Copy a vector into a 3×1 `CV_64F` Mat
///
/// # Errors
///
/// Returns an error if the Mat cannot be allocated
pub fn vector3_to_mat(vector: &Vector3<f64>) -> Result<Mat> {
    Ok(Mat::from_slice_2d(&[[vector.x], [vector.y], [vector.z]])?)
}

/// Read a 3×1 (or 1×3) `CV_64F` Mat into a vector
///
/// # Errors
///
/// Returns an error if the Mat does not hold three doubles
pub fn mat_to_vector3(mat: &Mat) -> Result<Vector3<f64>> {
    if mat.total() != 3 {
        return Err(Error::InvalidInput(format!(
            "Expected a 3-element matrix, got {}x{}",
            mat.rows(),
            mat.cols()
        )));
    }
    let mut values = [0.0; 3];
    for (i, value) in values.iter_mut().enumerate() {
        let (row, col) = if mat.rows() == 3 { (i as i32, 0) } else { (0, i as i32) };
        *value = *mat.at_2d::<f64>(row, col)?;
    }
    Ok(Vector3::new(values[0], values[1], values[2]))
}

/// Pack 3D points as an N×3 `CV_64F` Mat
///
/// # Errors
///
/// Returns an error if `points` is empty or the Mat cannot be allocated
pub fn points3_to_mat(points: &[Point3<f64>]) -> Result<Mat> {
    if points.is_empty() {
        return Err(Error::InvalidInput("Cannot build a Mat from zero points".to_string()));
    }
    let rows: Vec<[f64; 3]> = points.iter().map(|p| [p.x, p.y, p.z]).collect();
    Ok(Mat::from_slice_2d(&rows)?)
}

/// Pack 2D points as an N×2 `CV_64F` Mat
///
/// # Errors
///
/// Returns an error if `points` is empty or the Mat cannot be allocated
pub fn points2_to_mat(points: &[Point2<f64>]) -> Result<Mat> {
    if points.is_empty() {
        return Err(Error::InvalidInput("Cannot build a Mat from zero points".to_string()));
    }
    let rows: Vec<[f64; 2]> = points.iter().map(|p| [p.x, p.y]).collect();
    Ok(Mat::from_slice_2d(&rows)?)
}

/// Round a sub-pixel point to a drawable pixel, saturating at the i32 range
#[must_use]
#[allow(clippy::cast_possible_truncation)] // Saturating float-to-int casts
pub fn to_pixel(point: &Point2<f64>) -> Point {
    let x = if point.x.is_finite() { point.x.round() as i32 } else { 0 };
    let y = if point.y.is_finite() { point.y.round() as i32 } else { 0 };
    Point::new(x, y)
}
