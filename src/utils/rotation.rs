//! Rotation conversions at the `OpenCV` and logging boundaries.
//!
//! Internally every rotation is a `Rotation3<f64>`. Rodrigues vectors only
//! appear when talking to `solvePnP`, Euler angles only for display and for
//! the normalized head-pose angle pair.

use nalgebra::{Rotation3, Vector3};

/// Rotation from a Rodrigues (axis × angle) vector
#[must_use]
pub fn from_rodrigues(rvec: &Vector3<f64>) -> Rotation3<f64> {
    Rotation3::from_scaled_axis(*rvec)
}

/// Rodrigues (axis × angle) vector of a rotation
#[must_use]
pub fn to_rodrigues(rotation: &Rotation3<f64>) -> Vector3<f64> {
    rotation.scaled_axis()
}

/// Intrinsic X-Y-Z Euler angles `(a, b, c)` with `R = Rx(a) · Ry(b) · Rz(c)`, in radians
#[must_use]
pub fn euler_xyz(rotation: &Rotation3<f64>) -> Vector3<f64> {
    let m = rotation.matrix();
    let b = m[(0, 2)].clamp(-1.0, 1.0).asin();
    let a = (-m[(1, 2)]).atan2(m[(2, 2)]);
    let c = (-m[(0, 1)]).atan2(m[(0, 0)]);
    Vector3::new(a, b, c)
}

/// Build a rotation from intrinsic X-Y-Z Euler angles, in radians
#[must_use]
pub fn from_euler_xyz(a: f64, b: f64, c: f64) -> Rotation3<f64> {
    Rotation3::from_axis_angle(&Vector3::x_axis(), a)
        * Rotation3::from_axis_angle(&Vector3::y_axis(), b)
        * Rotation3::from_axis_angle(&Vector3::z_axis(), c)
}

/// Euler angles in degrees, for log lines and on-screen text
#[must_use]
pub fn euler_xyz_degrees(rotation: &Rotation3<f64>) -> Vector3<f64> {
    euler_xyz(rotation).map(f64::to_degrees)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Matrix3;
    use proptest::prelude::*;

    #[test]
    fn test_identity_has_zero_euler_angles() {
        let angles = euler_xyz(&Rotation3::identity());
        assert!(angles.norm() < 1e-12);
    }

    #[test]
    fn test_rodrigues_zero_is_identity() {
        let rotation = from_rodrigues(&Vector3::zeros());
        assert!((rotation.matrix() - Matrix3::identity()).norm() < 1e-12);
    }

    #[test]
    fn test_rodrigues_quarter_turn_about_y() {
        let rotation = from_rodrigues(&Vector3::new(0.0, std::f64::consts::FRAC_PI_2, 0.0));
        let rotated = rotation * Vector3::new(0.0, 0.0, 1.0);
        assert!((rotated - Vector3::new(1.0, 0.0, 0.0)).norm() < 1e-12);
    }

    #[test]
    fn test_degrees_conversion() {
        let rotation = from_euler_xyz(0.1, -0.2, 0.3);
        let degrees = euler_xyz_degrees(&rotation);
        assert!((degrees[0] - 0.1f64.to_degrees()).abs() < 1e-9);
        assert!((degrees[1] + 0.2f64.to_degrees()).abs() < 1e-9);
        assert!((degrees[2] - 0.3f64.to_degrees()).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn prop_euler_xyz_recovers_angles(
            a in -3.0f64..3.0,
            b in -1.5f64..1.5,
            c in -3.0f64..3.0,
        ) {
            let angles = euler_xyz(&from_euler_xyz(a, b, c));
            prop_assert!((angles[0] - a).abs() < 1e-9);
            prop_assert!((angles[1] - b).abs() < 1e-9);
            prop_assert!((angles[2] - c).abs() < 1e-9);
        }

        #[test]
        fn prop_rodrigues_round_trip(x in -1.5f64..1.5, y in -1.5f64..1.5, z in -1.5f64..1.5) {
            let rvec = Vector3::new(x, y, z);
            let back = to_rodrigues(&from_rodrigues(&rvec));
            prop_assert!((back - rvec).norm() < 1e-9);
        }
    }
}
