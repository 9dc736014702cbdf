//! Left/right screen regions and the hit-box classifier.

use crate::{Error, Result};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    Left,
    Right,
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Left => write!(f, "left"),
            Self::Right => write!(f, "right"),
        }
    }
}

/// Screen-space rectangle, edges inclusive
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitBox {
    pub region: Region,
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl HitBox {
    /// Only the horizontal extent decides a hit; boxes span the full height
    #[must_use]
    pub fn contains_x(&self, x: f64) -> bool {
        self.left <= x && x <= self.right
    }
}

/// Classifies a screen point into the first hit-box containing it
#[derive(Debug, Clone)]
pub struct RegionClassifier {
    boxes: Vec<HitBox>,
}

impl RegionClassifier {
    /// Two full-height boxes `fraction × width` wide, anchored to each edge
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the fraction is outside (0, 0.5] or the size is zero
    pub fn new(width: u32, height: u32, fraction: f64) -> Result<Self> {
        if !(fraction > 0.0 && fraction <= 0.5) {
            return Err(Error::InvalidInput(format!(
                "Hit-box width fraction must be in (0, 0.5], got {fraction}"
            )));
        }
        if width == 0 || height == 0 {
            return Err(Error::InvalidInput(format!("Invalid output size {width}x{height}")));
        }
        let w = f64::from(width);
        let h = f64::from(height);
        let box_width = fraction * w;
        Ok(Self::with_boxes(vec![
            HitBox {
                region: Region::Left,
                left: 0.0,
                top: 0.0,
                right: box_width,
                bottom: h,
            },
            HitBox {
                region: Region::Right,
                left: w - box_width,
                top: 0.0,
                right: w,
                bottom: h,
            },
        ]))
    }

    /// Custom layout; earlier boxes win on overlap
    #[must_use]
    pub fn with_boxes(boxes: Vec<HitBox>) -> Self {
        Self { boxes }
    }

    #[must_use]
    pub fn boxes(&self) -> &[HitBox] {
        &self.boxes
    }

    #[must_use]
    pub fn classify(&self, point: &Point2<f64>) -> Option<Region> {
        self.boxes.iter().find(|b| b.contains_x(point.x)).map(|b| b.region)
    }
}
