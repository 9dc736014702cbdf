//! Utility functions for crop geometry and OpenCV interoperability.

pub mod mat;
pub mod rotation;

use opencv::core::Rect;

/// Expand a detection box by `shift` of its size on every side, make it
/// square and keep it inside the image.
///
/// Returns `None` when the image is empty or the box has no area left.
#[must_use]
#[allow(clippy::cast_possible_truncation)] // Pixel coordinates fit in i32
pub fn square_crop(x1: f64, y1: f64, x2: f64, y2: f64, max_width: i32, max_height: i32, shift: f64) -> Option<Rect> {
    if max_width <= 0 || max_height <= 0 || !(x1.is_finite() && y1.is_finite() && x2.is_finite() && y2.is_finite()) {
        return None;
    }

    let width = (x2 - x1).max(0.0);
    let height = (y2 - y1).max(0.0);
    let side = (width.max(height) * (1.0 + 2.0 * shift)).round() as i32;
    let side = side.min(max_width).min(max_height);
    if side <= 0 {
        return None;
    }

    let cx = (x1 + x2) / 2.0;
    let cy = (y1 + y2) / 2.0;
    let x = ((cx - f64::from(side) / 2.0).round() as i32).clamp(0, max_width - side);
    let y = ((cy - f64::from(side) / 2.0).round() as i32).clamp(0, max_height - side);

    Some(Rect::new(x, y, side, side))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_square_crop_is_square_and_expanded() {
        let rect = square_crop(10.0, 10.0, 60.0, 40.0, 200, 200, 0.1).unwrap();
        assert_eq!(rect.width, rect.height);
        assert!(rect.width > 50);
    }

    #[test]
    fn test_square_crop_stays_inside_image() {
        let boxes = [(190.0, 190.0, 210.0, 210.0), (0.0, 0.0, 10.0, 10.0), (-30.0, 50.0, 40.0, 120.0)];
        for (x1, y1, x2, y2) in boxes {
            let rect = square_crop(x1, y1, x2, y2, 200, 200, 0.5).unwrap();
            assert!(rect.x >= 0);
            assert!(rect.y >= 0);
            assert!(rect.x + rect.width <= 200);
            assert!(rect.y + rect.height <= 200);
            assert_eq!(rect.width, rect.height);
        }
    }

    #[test]
    fn test_square_crop_rejects_degenerate_input() {
        assert!(square_crop(10.0, 10.0, 10.0, 10.0, 200, 200, 0.2).is_none());
        assert!(square_crop(0.0, 0.0, 10.0, 10.0, 0, 200, 0.2).is_none());
        assert!(square_crop(f64::NAN, 0.0, 10.0, 10.0, 200, 200, 0.2).is_none());
    }

    #[test]
    fn test_square_crop_clamps_oversized_box() {
        let rect = square_crop(0.0, 0.0, 500.0, 300.0, 320, 240, 0.2).unwrap();
        assert_eq!(rect.width, 240);
        assert_eq!(rect.height, 240);
        assert!(rect.x + rect.width <= 320);
    }
}
