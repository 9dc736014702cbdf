//! Frame annotation and the translucent region overlay.

use crate::{
    camera::Camera,
    constants::AXIS_LENGTH,
    face::{Face, FacePart},
    region::{Region, RegionClassifier},
    utils::{mat::to_pixel, rotation},
    Result,
};
use nalgebra::{Point2, Point3, Vector3};
use opencv::{
    core::{self, Mat, Point, Rect, Scalar, Size, CV_8UC4},
    imgproc::{self, FONT_HERSHEY_SIMPLEX, LINE_8, LINE_AA},
    prelude::*,
};

const BBOX_COLOR: (f64, f64, f64) = (0.0, 255.0, 0.0);
const LANDMARK_COLOR: (f64, f64, f64) = (0.0, 255.0, 255.0);
const TEMPLATE_COLOR: (f64, f64, f64) = (255.0, 128.0, 0.0);
const GAZE_COLOR: (f64, f64, f64) = (0.0, 0.0, 255.0);
const TEXT_COLOR: (f64, f64, f64) = (0.0, 255.0, 0.0);
const WARNING_COLOR: (f64, f64, f64) = (0.0, 165.0, 255.0);

/// Overlay alpha of an idle and an active hit-box
const HITBOX_ALPHA: f64 = 70.0;
const ACTIVE_HITBOX_ALPHA: f64 = 170.0;

/// Scale of the normalized eye insets
const INSET_SCALE: i32 = 2;

fn bgr((b, g, r): (f64, f64, f64)) -> Scalar {
    Scalar::new(b, g, r, 0.0)
}

/// Which annotations are drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayFlags {
    pub bbox: bool,
    pub landmarks: bool,
    pub head_pose: bool,
    pub normalized_image: bool,
    pub template_model: bool,
    pub gaze_vector: bool,
}

impl Default for DisplayFlags {
    fn default() -> Self {
        Self {
            bbox: true,
            landmarks: false,
            head_pose: true,
            normalized_image: false,
            template_model: false,
            gaze_vector: true,
        }
    }
}

/// Draws faces on camera frames and renders the region overlay
#[derive(Debug, Clone)]
pub struct Visualizer {
    camera: Camera,
    axis_length: f64,
}

impl Visualizer {
    /// `camera` must describe the undistorted frames being annotated
    #[must_use]
    pub fn new(camera: Camera) -> Self {
        Self {
            camera,
            axis_length: AXIS_LENGTH,
        }
    }

    /// Draw every enabled annotation for every face. Parts not estimated
    /// this frame are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if an `OpenCV` drawing call fails
    pub fn annotate(&self, frame: &mut Mat, faces: &[Face], flags: DisplayFlags) -> Result<()> {
        for face in faces {
            if flags.bbox {
                draw_bbox(frame, face)?;
            }
            if flags.landmarks {
                draw_landmarks(frame, &face.landmarks)?;
            }
            if flags.template_model {
                self.draw_model3d(frame, face)?;
            }
            if flags.head_pose {
                self.draw_head_pose_axes(frame, face)?;
            }
            if flags.gaze_vector {
                for eye in face.eyes() {
                    self.draw_gaze_vector(frame, eye)?;
                }
            }
        }
        if flags.normalized_image {
            if let Some(face) = Face::dominant(faces).and_then(|i| faces.get(i)) {
                draw_normalized_eyes(frame, face)?;
            }
        }
        Ok(())
    }

    /// Head axes at the face centre (x red, y green, z blue)
    ///
    /// # Errors
    ///
    /// Returns an error if an `OpenCV` drawing call fails
    pub fn draw_head_pose_axes(&self, frame: &mut Mat, face: &Face) -> Result<()> {
        let (Some(rot), Some(center)) = (face.head_rotation, face.face.center) else {
            return Ok(());
        };
        let length = self.axis_length;
        let axes = [
            Point3::from(center),
            Point3::from(center + rot * Vector3::new(length, 0.0, 0.0)),
            Point3::from(center + rot * Vector3::new(0.0, length, 0.0)),
            Point3::from(center + rot * Vector3::new(0.0, 0.0, length)),
        ];
        if axes.iter().any(|p| self.camera.project(p).is_none()) {
            return Ok(());
        }
        let pixels = self.camera.project_points(&axes, &Vector3::zeros(), &Vector3::zeros());
        let origin = to_pixel(&pixels[0]);
        let colors = [(0.0, 0.0, 255.0), (0.0, 255.0, 0.0), (255.0, 0.0, 0.0)];
        for (end, color) in pixels[1..].iter().zip(colors) {
            imgproc::arrowed_line(frame, origin, to_pixel(end), bgr(color), 2, LINE_AA, 0, 0.2)?;
        }

        let angles = rotation::euler_xyz_degrees(&rot);
        let text = format!("Pitch: {:.1} Yaw: {:.1} Roll: {:.1}", angles.x, angles.y, angles.z);
        let anchor = to_pixel(&Point2::new(face.bbox.x1, face.bbox.y1 - 10.0));
        put_text(frame, &text, anchor, 0.5, LANDMARK_COLOR)
    }

    /// Calibrated template placed by the head pose
    ///
    /// # Errors
    ///
    /// Returns an error if an `OpenCV` drawing call fails
    pub fn draw_model3d(&self, frame: &mut Mat, face: &Face) -> Result<()> {
        let Some(model3d) = &face.model3d else {
            return Ok(());
        };
        for point in model3d {
            if let Some(pixel) = self.camera.project(point) {
                imgproc::circle(frame, to_pixel(&pixel), 1, bgr(TEMPLATE_COLOR), -1, LINE_8, 0)?;
            }
        }
        Ok(())
    }

    /// Gaze ray from an eye centre
    ///
    /// # Errors
    ///
    /// Returns an error if an `OpenCV` drawing call fails
    pub fn draw_gaze_vector(&self, frame: &mut Mat, eye: &FacePart) -> Result<()> {
        let (Some(center), Some(gaze)) = (eye.center, eye.gaze_vector) else {
            return Ok(());
        };
        let start = self.camera.project(&Point3::from(center));
        let end = self.camera.project(&Point3::from(center + gaze * self.axis_length));
        if let (Some(start), Some(end)) = (start, end) {
            imgproc::line(frame, to_pixel(&start), to_pixel(&end), bgr(GAZE_COLOR), 2, LINE_AA, 0)?;
        }
        Ok(())
    }

    /// BGRA overlay at the frame size: translucent hit-boxes, the active one
    /// stronger, and the screen point if any
    ///
    /// # Errors
    ///
    /// Returns an error if the overlay cannot be allocated or drawn
    pub fn render_overlay(
        &self,
        classifier: &RegionClassifier,
        active: Option<Region>,
        screen_point: Option<&Point2<f64>>,
    ) -> Result<Mat> {
        let width = i32::try_from(self.camera.width()).unwrap_or(i32::MAX);
        let height = i32::try_from(self.camera.height()).unwrap_or(i32::MAX);
        render_overlay(Size::new(width, height), classifier, active, screen_point)
    }
}

/// See [`Visualizer::render_overlay`]
///
/// # Errors
///
/// Returns an error if the overlay cannot be allocated or drawn
pub fn render_overlay(
    size: Size,
    classifier: &RegionClassifier,
    active: Option<Region>,
    screen_point: Option<&Point2<f64>>,
) -> Result<Mat> {
    let mut overlay = Mat::new_rows_cols_with_default(size.height, size.width, CV_8UC4, Scalar::all(0.0))?;

    for hit_box in classifier.boxes() {
        let alpha = if active == Some(hit_box.region) {
            ACTIVE_HITBOX_ALPHA
        } else {
            HITBOX_ALPHA
        };
        let color = match hit_box.region {
            Region::Left => Scalar::new(255.0, 128.0, 0.0, alpha),
            Region::Right => Scalar::new(0.0, 128.0, 255.0, alpha),
        };
        let top_left = to_pixel(&Point2::new(hit_box.left, hit_box.top));
        let bottom_right = to_pixel(&Point2::new(hit_box.right, hit_box.bottom));
        imgproc::rectangle_points(&mut overlay, top_left, bottom_right, color, -1, LINE_8, 0)?;
    }

    if let Some(point) = screen_point {
        imgproc::circle(
            &mut overlay,
            to_pixel(point),
            12,
            Scalar::new(0.0, 0.0, 255.0, 255.0),
            -1,
            LINE_AA,
            0,
        )?;
    }

    Ok(overlay)
}

/// Tick rate, calibration state and the last warning in the top-left corner
///
/// # Errors
///
/// Returns an error if an `OpenCV` drawing call fails
pub fn draw_status(frame: &mut Mat, lines: &[String], warning: Option<&str>) -> Result<()> {
    let mut y = 30;
    for line in lines {
        put_text(frame, line, Point::new(10, y), 0.7, TEXT_COLOR)?;
        y += 28;
    }
    if let Some(warning) = warning {
        put_text(frame, warning, Point::new(10, y), 0.7, WARNING_COLOR)?;
    }
    Ok(())
}

fn put_text(frame: &mut Mat, text: &str, origin: Point, scale: f64, color: (f64, f64, f64)) -> Result<()> {
    imgproc::put_text(frame, text, origin, FONT_HERSHEY_SIMPLEX, scale, bgr(color), 1, LINE_AA, false)?;
    Ok(())
}

fn draw_bbox(frame: &mut Mat, face: &Face) -> Result<()> {
    let top_left = to_pixel(&Point2::new(face.bbox.x1, face.bbox.y1));
    let bottom_right = to_pixel(&Point2::new(face.bbox.x2, face.bbox.y2));
    imgproc::rectangle_points(frame, top_left, bottom_right, bgr(BBOX_COLOR), 2, LINE_8, 0)?;
    Ok(())
}

fn draw_landmarks(frame: &mut Mat, landmarks: &[Point2<f64>]) -> Result<()> {
    for landmark in landmarks {
        imgproc::circle(frame, to_pixel(landmark), 1, bgr(LANDMARK_COLOR), -1, LINE_8, 0)?;
    }
    Ok(())
}

/// Both normalized eye images, enlarged, along the bottom-left edge
fn draw_normalized_eyes(frame: &mut Mat, face: &Face) -> Result<()> {
    let mut x = 0;
    for eye in face.eyes() {
        let Some(image) = &eye.normalized_image else {
            continue;
        };
        let mut color = Mat::default();
        if image.channels() == 1 {
            imgproc::cvt_color(image, &mut color, imgproc::COLOR_GRAY2BGR, 0)?;
        } else {
            color = image.try_clone()?;
        }
        let mut inset = Mat::default();
        let size = Size::new(color.cols() * INSET_SCALE, color.rows() * INSET_SCALE);
        imgproc::resize(&color, &mut inset, size, 0.0, 0.0, imgproc::INTER_NEAREST)?;

        let y = frame.rows() - size.height;
        if y < 0 || x + size.width > frame.cols() || inset.typ() != frame.typ() {
            break;
        }
        let mut roi = frame.roi_mut(Rect::new(x, y, size.width, size.height))?;
        inset.copy_to(&mut roi)?;
        x += size.width;
    }
    Ok(())
}

/// Alpha-blend a BGRA overlay onto a BGR frame
///
/// # Errors
///
/// Returns an error if the sizes differ or an `OpenCV` call fails
pub fn blend_overlay(frame: &Mat, overlay: &Mat, strength: f64) -> Result<Mat> {
    if frame.size()? != overlay.size()? {
        return Err(crate::Error::InvalidInput(format!(
            "Overlay size {:?} does not match frame size {:?}",
            overlay.size()?,
            frame.size()?
        )));
    }

    let mut channels = core::Vector::<Mat>::new();
    core::split(overlay, &mut channels)?;
    let alpha_channel = channels.get(3)?;

    let mut colors = Mat::default();
    imgproc::cvt_color(overlay, &mut colors, imgproc::COLOR_BGRA2BGR, 0)?;

    let mut alpha = Mat::default();
    alpha_channel.convert_to(&mut alpha, core::CV_32F, strength / 255.0, 0.0)?;
    let mut alpha3 = Mat::default();
    imgproc::cvt_color(&alpha, &mut alpha3, imgproc::COLOR_GRAY2BGR, 0)?;

    let mut frame_f = Mat::default();
    frame.convert_to(&mut frame_f, core::CV_32FC3, 1.0, 0.0)?;
    let mut colors_f = Mat::default();
    colors.convert_to(&mut colors_f, core::CV_32FC3, 1.0, 0.0)?;

    // frame + alpha * (overlay - frame)
    let mut diff = Mat::default();
    core::subtract(&colors_f, &frame_f, &mut diff, &core::no_array(), -1)?;
    let mut weighted = Mat::default();
    core::multiply(&diff, &alpha3, &mut weighted, 1.0, -1)?;
    let mut blended_f = Mat::default();
    core::add(&frame_f, &weighted, &mut blended_f, &core::no_array(), -1)?;

    let mut blended = Mat::default();
    blended_f.convert_to(&mut blended, frame.typ(), 1.0, 0.0)?;
    Ok(blended)
}
