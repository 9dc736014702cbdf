//! Per-tick processing and the calibration state machine.
//!
//! A tick undistorts the frame, detects faces and, once calibrated, runs
//! pose, normalization and gaze estimation for every face. Only the dominant
//! face is mapped onto the screen and classified into a region.

use crate::{
    camera::Camera,
    commands::Command,
    config::Config,
    constants::CANONICAL_FACE_DISTANCE,
    face::Face,
    gaze::{GazeEstimator, ScreenMapper, ScreenMapping},
    gaze_model::GazeModel,
    landmarks::LandmarkProvider,
    normalizer::HeadPoseNormalizer,
    pose_estimation::FaceModel,
    region::{Region, RegionClassifier},
    visualizer::{self, DisplayFlags, Visualizer},
    Error, Result,
};
use nalgebra::Point2;
use opencv::{core::Mat, prelude::*};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationState {
    Uncalibrated,
    /// Calibration runs on the next processed frame
    Calibrating,
    Calibrated,
}

impl fmt::Display for CalibrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uncalibrated => write!(f, "uncalibrated"),
            Self::Calibrating => write!(f, "calibrating"),
            Self::Calibrated => write!(f, "calibrated"),
        }
    }
}

/// Everything one tick produces for publishing
#[derive(Debug)]
pub struct TickOutput {
    /// Undistorted frame with annotations
    pub annotated: Mat,
    /// BGRA region overlay; absent while the pipeline is disabled
    pub overlay: Option<Mat>,
    pub region: Option<Region>,
    pub screen_point: Option<Point2<f64>>,
    pub num_faces: usize,
}

/// Calibration capture and screen-mapping settings taken from [`Config`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineSettings {
    /// Added to the 1 m reference distance when lifting calibration landmarks
    pub depth_offset: f64,
    pub mapping: ScreenMapping,
    pub smoothing_window: usize,
    pub hitbox_width_fraction: f64,
    pub flags: DisplayFlags,
    pub enabled: bool,
}

impl PipelineSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let display = &config.display;
        Self {
            depth_offset: config.calibration.depth_offset,
            mapping: ScreenMapping {
                depth_multiplier: config.screen.depth_multiplier,
                vertical_scale: config.screen.vertical_scale,
                mirror: config.screen.mirror,
            },
            smoothing_window: config.screen.smoothing_window,
            hitbox_width_fraction: config.screen.hitbox_width_fraction,
            flags: DisplayFlags {
                bbox: display.show_bbox,
                landmarks: display.show_landmarks,
                head_pose: display.show_head_pose,
                normalized_image: display.show_normalized_image,
                template_model: display.show_template_model,
                gaze_vector: display.show_gaze_vector,
            },
            enabled: config.pipeline.enabled,
        }
    }
}

/// Owns every per-frame component and the calibration state
pub struct GazePipeline {
    /// Capture camera, with distortion
    camera: Camera,
    provider: Box<dyn LandmarkProvider>,
    estimator: GazeEstimator,
    mapper: ScreenMapper,
    classifier: RegionClassifier,
    visualizer: Visualizer,
    flags: DisplayFlags,
    enabled: bool,
    state: CalibrationState,
    depth_offset: f64,
    last_warning: Option<String>,
    tick_rate: f64,
}

impl GazePipeline {
    /// # Errors
    ///
    /// Returns an error if the provider layout is inconsistent or a setting
    /// is out of range
    pub fn new(
        camera: Camera,
        provider: Box<dyn LandmarkProvider>,
        gaze_model: Box<dyn GazeModel>,
        normalizer_camera: Camera,
        normalized_distance: f64,
        settings: &PipelineSettings,
    ) -> Result<Self> {
        let layout = provider.layout();
        if layout.num_landmarks != provider.num_landmarks() {
            return Err(Error::InvalidInput(format!(
                "Provider reports {} landmarks but its layout has {}",
                provider.num_landmarks(),
                layout.num_landmarks
            )));
        }

        // Frames are undistorted before anything downstream sees them
        let rectified = camera.without_distortion();
        let face_model = FaceModel::new(layout)?;
        let normalizer = HeadPoseNormalizer::new(rectified.clone(), normalizer_camera, normalized_distance)?;
        let estimator = GazeEstimator::new(rectified.clone(), face_model, normalizer, gaze_model);
        let mapper = ScreenMapper::new(rectified.clone(), settings.mapping, settings.smoothing_window);
        let classifier = RegionClassifier::new(camera.width(), camera.height(), settings.hitbox_width_fraction)?;

        log::info!(
            "Gaze pipeline ready: {}x{} frames, {} landmarks, pipeline {}",
            camera.width(),
            camera.height(),
            estimator.face_model().layout().num_landmarks,
            if settings.enabled { "enabled" } else { "disabled" }
        );

        Ok(Self {
            camera,
            provider,
            estimator,
            mapper,
            classifier,
            visualizer: Visualizer::new(rectified),
            flags: settings.flags,
            enabled: settings.enabled,
            state: CalibrationState::Uncalibrated,
            depth_offset: settings.depth_offset,
            last_warning: None,
            tick_rate: 0.0,
        })
    }

    /// Build from the loaded configuration
    ///
    /// # Errors
    ///
    /// See [`GazePipeline::new`]
    pub fn from_config(
        config: &Config,
        camera: Camera,
        provider: Box<dyn LandmarkProvider>,
        gaze_model: Box<dyn GazeModel>,
    ) -> Result<Self> {
        Self::new(
            camera,
            provider,
            gaze_model,
            config.normalizer.eye_camera(),
            config.normalizer.normalized_distance,
            &PipelineSettings::from_config(config),
        )
    }

    #[must_use]
    pub fn state(&self) -> CalibrationState {
        self.state
    }

    #[must_use]
    pub fn flags(&self) -> DisplayFlags {
        self.flags
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Most recent recoverable problem, cleared by a successful calibration
    #[must_use]
    pub fn last_warning(&self) -> Option<&str> {
        self.last_warning.as_deref()
    }

    #[must_use]
    pub fn face_model(&self) -> &FaceModel {
        self.estimator.face_model()
    }

    #[must_use]
    pub fn classifier(&self) -> &RegionClassifier {
        &self.classifier
    }

    #[must_use]
    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    /// Shown in the status lines of the next annotated frame
    pub fn set_tick_rate(&mut self, tick_rate: f64) {
        self.tick_rate = tick_rate;
    }

    /// Schedule calibration on the next processed frame
    pub fn request_calibration(&mut self) {
        log::info!("Calibration requested ({} -> calibrating)", self.state);
        self.state = CalibrationState::Calibrating;
    }

    /// Apply a keyboard command. `Quit` is handled by the run loop.
    pub fn apply_command(&mut self, command: Command) {
        let flags = &mut self.flags;
        match command {
            Command::ToggleBbox => flags.bbox = !flags.bbox,
            Command::ToggleLandmarks => flags.landmarks = !flags.landmarks,
            Command::ToggleHeadPose => flags.head_pose = !flags.head_pose,
            Command::ToggleNormalizedImage => flags.normalized_image = !flags.normalized_image,
            Command::ToggleTemplateModel => flags.template_model = !flags.template_model,
            Command::ToggleGazeVector => flags.gaze_vector = !flags.gaze_vector,
            Command::Calibrate => self.request_calibration(),
            Command::TogglePipeline => {
                self.enabled = !self.enabled;
                self.mapper.reset();
                log::info!("Pipeline {}", if self.enabled { "enabled" } else { "disabled" });
            }
            Command::Quit => {}
        }
        log::debug!("Applied {command:?}");
    }

    /// Run one tick on a raw camera frame
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a frame whose size differs from the
    /// camera model, and non-recoverable detection, inference or drawing
    /// errors; calibration problems and per-face pose failures are absorbed
    /// as warnings
    pub fn process(&mut self, frame: &Mat) -> Result<TickOutput> {
        let (width, height) = (self.camera.width(), self.camera.height());
        if u32::try_from(frame.cols()) != Ok(width) || u32::try_from(frame.rows()) != Ok(height) {
            return Err(Error::InvalidInput(format!(
                "Frame is {}x{} but the camera model is {width}x{height}",
                frame.cols(),
                frame.rows()
            )));
        }
        let mut annotated = self.camera.undistort(frame)?;

        if !self.enabled {
            self.draw_status(&mut annotated)?;
            return Ok(TickOutput {
                annotated,
                overlay: None,
                region: None,
                screen_point: None,
                num_faces: 0,
            });
        }

        if self.state == CalibrationState::Calibrating {
            self.calibrate(&annotated)?;
        }

        let mut faces = self.provider.detect_faces(&annotated)?;
        let (screen_point, region) = if self.state == CalibrationState::Calibrated {
            self.estimate(&annotated, &mut faces)?
        } else {
            (None, None)
        };

        self.visualizer.annotate(&mut annotated, &faces, self.flags)?;
        self.draw_status(&mut annotated)?;
        let overlay = self
            .visualizer
            .render_overlay(&self.classifier, region, screen_point.as_ref())?;

        Ok(TickOutput {
            annotated,
            overlay: Some(overlay),
            region,
            screen_point,
            num_faces: faces.len(),
        })
    }

    /// Gaze for every face; screen point and region from the dominant one
    fn estimate(&mut self, frame: &Mat, faces: &mut [Face]) -> Result<(Option<Point2<f64>>, Option<Region>)> {
        for face in faces.iter_mut() {
            match self.estimator.estimate(frame, face) {
                Ok(()) => {}
                Err(e) if e.is_recoverable() => log::warn!("Skipping face: {e}"),
                Err(e) => return Err(e),
            }
        }

        let Some(dominant) = Face::dominant(faces).and_then(|i| faces.get(i)) else {
            return Ok((None, None));
        };
        let screen_point = self.mapper.map(dominant);
        let region = screen_point.as_ref().and_then(|p| self.classifier.classify(p));
        log::debug!("Screen point {screen_point:?}, region {region:?}");
        Ok((screen_point, region))
    }

    /// Bind the face model to the single visible face, or fall back to the
    /// state held before the attempt
    fn calibrate(&mut self, frame: &Mat) -> Result<()> {
        let previous = if self.estimator.face_model().is_calibrated() {
            CalibrationState::Calibrated
        } else {
            CalibrationState::Uncalibrated
        };

        match self.try_calibrate(frame) {
            Ok(()) => {
                self.state = CalibrationState::Calibrated;
                self.last_warning = None;
                self.mapper.reset();
                log::info!("Calibration complete");
                Ok(())
            }
            Err(e) if e.is_recoverable() => {
                log::warn!("Calibration failed, staying {previous}: {e}");
                self.state = previous;
                self.last_warning = Some(e.to_string());
                Ok(())
            }
            Err(e) => {
                self.state = previous;
                Err(e)
            }
        }
    }

    fn try_calibrate(&mut self, frame: &Mat) -> Result<()> {
        let raw_faces = self.provider.detect_faces_raw(frame)?;
        let [raw] = raw_faces.as_slice() else {
            return Err(Error::CalibrationError(format!(
                "Calibration needs exactly one face, found {}",
                raw_faces.len()
            )));
        };

        let capture_depth = CANONICAL_FACE_DISTANCE + self.depth_offset;
        let lifted = FaceModel::lift_raw_landmarks(raw, self.estimator.camera(), capture_depth)?;
        self.estimator.face_model_mut().set_landmark_calibration(&lifted)
    }

    fn draw_status(&self, frame: &mut Mat) -> Result<()> {
        let mut lines = vec![format!("{:.1} ticks/s", self.tick_rate)];
        if self.enabled {
            lines.push(format!("State: {}", self.state));
        } else {
            lines.push("Pipeline paused".to_string());
        }
        visualizer::draw_status(frame, &lines, self.last_warning.as_deref())
    }
}
