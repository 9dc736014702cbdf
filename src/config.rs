//! Configuration management for the gaze region tracker

use crate::{
    camera::Camera,
    commands::KeyBindings,
    constants::{
        DEFAULT_CALIBRATION_DEPTH_OFFSET, DEFAULT_DEPTH_MULTIPLIER, DEFAULT_HITBOX_WIDTH_FRACTION,
        DEFAULT_MAX_TICK_RATE, DEFAULT_NORMALIZED_DISTANCE, DEFAULT_SMOOTHING_WINDOW, NORMALIZED_EYE_FOCAL,
        NORMALIZED_EYE_HEIGHT, NORMALIZED_EYE_WIDTH,
    },
    landmarks::DetectorMode,
    Error, Result,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Model file paths
    pub models: ModelConfig,

    /// Face and landmark detection
    pub detector: DetectorConfig,

    /// Camera intrinsics and capture resolution
    pub camera: CameraConfig,

    /// Eye image normalization
    pub normalizer: NormalizerConfig,

    /// Calibration capture
    pub calibration: CalibrationConfig,

    /// Gaze to screen mapping and regions
    pub screen: ScreenConfig,

    /// Initial annotation toggles
    pub display: DisplayConfig,

    /// Worker loop
    pub pipeline: PipelineConfig,

    /// Keyboard bindings
    pub keys: KeyBindings,

    /// Input and recording
    pub video: VideoConfig,
}

/// Model file paths configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// SCRFD face detection ONNX model
    pub face_detector: PathBuf,

    /// 468-point face mesh ONNX model
    pub face_mesh: PathBuf,

    /// Gaze estimation ONNX model
    pub gaze_estimator: PathBuf,
}

/// Face detection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Landmark backend
    pub mode: DetectorMode,

    /// Confidence threshold for face detection (0.0-1.0)
    pub confidence_threshold: f32,

    /// IOU threshold for non-maximum suppression (0.0-1.0)
    pub nms_threshold: f32,

    /// Maximum number of faces to detect
    pub max_faces: usize,

    /// Face box expansion on each side before the mesh crop
    pub bbox_expansion: f64,

    /// Minimum face presence reported by the mesh model (0.0-1.0)
    pub presence_threshold: f32,
}

/// Camera configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// YAML camera parameters; without it an ideal camera with focal length
    /// equal to the width is assumed
    pub params: Option<PathBuf>,

    /// Requested capture width
    pub width: u32,

    /// Requested capture height
    pub height: u32,
}

/// Normalized eye camera
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Virtual distance of the normalized camera, meters
    pub normalized_distance: f64,

    pub eye_width: u32,

    pub eye_height: u32,

    pub eye_focal: f64,
}

/// Calibration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Added to the 1 m reference distance when lifting landmarks, meters
    pub depth_offset: f64,
}

/// Screen mapping configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenConfig {
    /// Gaze ray length as a multiple of the eye distance
    pub depth_multiplier: f64,

    /// Scale applied to the vertical gaze displacement
    pub vertical_scale: f64,

    /// Smoothing buffer length
    pub smoothing_window: usize,

    /// Hit-box width as a fraction of the frame width (0.0-0.5]
    pub hitbox_width_fraction: f64,

    /// Mirror the screen point horizontally
    pub mirror: bool,
}

/// Display configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub show_bbox: bool,
    pub show_landmarks: bool,
    pub show_head_pose: bool,
    pub show_normalized_image: bool,
    pub show_template_model: bool,
    pub show_gaze_vector: bool,

    /// Presentation window title
    pub window_name: String,

    /// Weight of the overlay when blended onto the frame (0.0-1.0)
    pub overlay_alpha: f64,
}

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Upper bound on worker ticks per second
    pub max_tick_rate: f64,

    /// Start with gaze processing enabled
    pub enabled: bool,
}

/// Video input and recording
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Camera index when no file is given
    pub camera_index: i32,

    /// Read frames from this file instead of a camera
    pub file: Option<PathBuf>,

    /// Record annotated frames to this file
    pub output: Option<PathBuf>,

    /// Frame rate written into the recording
    pub output_fps: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            face_detector: PathBuf::from("assets/face_detector.onnx"),
            face_mesh: PathBuf::from("assets/face_mesh.onnx"),
            gaze_estimator: PathBuf::from("assets/gaze_estimator.onnx"),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            mode: DetectorMode::Mediapipe,
            confidence_threshold: 0.5,
            nms_threshold: 0.4,
            max_faces: 4,
            bbox_expansion: 0.25,
            presence_threshold: 0.5,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            params: None,
            width: 1280,
            height: 720,
        }
    }
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            normalized_distance: DEFAULT_NORMALIZED_DISTANCE,
            eye_width: NORMALIZED_EYE_WIDTH,
            eye_height: NORMALIZED_EYE_HEIGHT,
            eye_focal: NORMALIZED_EYE_FOCAL,
        }
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            depth_offset: DEFAULT_CALIBRATION_DEPTH_OFFSET,
        }
    }
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            depth_multiplier: DEFAULT_DEPTH_MULTIPLIER,
            vertical_scale: 1.0,
            smoothing_window: DEFAULT_SMOOTHING_WINDOW,
            hitbox_width_fraction: DEFAULT_HITBOX_WIDTH_FRACTION,
            mirror: true,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            show_bbox: true,
            show_landmarks: false,
            show_head_pose: true,
            show_normalized_image: false,
            show_template_model: false,
            show_gaze_vector: true,
            window_name: "Gaze Region Tracker".to_string(),
            overlay_alpha: 0.4,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_tick_rate: DEFAULT_MAX_TICK_RATE,
            enabled: true,
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            camera_index: 0,
            file: None,
            output: None,
            output_fps: DEFAULT_MAX_TICK_RATE,
        }
    }
}

impl CameraConfig {
    /// Camera for frames of the given size: the parameter file when one is
    /// configured, otherwise an ideal camera at that size
    ///
    /// `width`/`height` here only request a capture resolution; the frames
    /// that actually arrive decide.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the parameter file is malformed or was
    /// calibrated for a different image size, `Io` if it cannot be read
    pub fn camera_for(&self, frame_width: u32, frame_height: u32) -> Result<Camera> {
        match &self.params {
            Some(path) => {
                let camera = Camera::load(path)?;
                if (camera.width(), camera.height()) != (frame_width, frame_height) {
                    return Err(Error::ConfigError(format!(
                        "Camera parameters in {} are for {}x{} images but the source delivers {frame_width}x{frame_height}",
                        path.display(),
                        camera.width(),
                        camera.height()
                    )));
                }
                Ok(camera)
            }
            None => {
                if (frame_width, frame_height) != (self.width, self.height) {
                    log::warn!(
                        "Requested {}x{} but the source delivers {frame_width}x{frame_height}",
                        self.width,
                        self.height
                    );
                }
                log::warn!("No camera parameters configured, assuming focal length {frame_width} px");
                Ok(Camera::ideal(frame_width, frame_height, f64::from(frame_width)))
            }
        }
    }
}

impl NormalizerConfig {
    #[must_use]
    pub fn eye_camera(&self) -> Camera {
        Camera::ideal(self.eye_width, self.eye_height, self.eye_focal)
    }
}

impl Config {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the text is not a valid configuration
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))
    }

    /// Save configuration to a YAML file
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            serde_yaml::to_string(self).map_err(|e| Error::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)?;

        Ok(())
    }

    /// Validate value ranges
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` naming the first invalid setting
    pub fn validate(&self) -> Result<()> {
        // Detection thresholds
        let thresholds = [
            ("Confidence threshold", self.detector.confidence_threshold),
            ("NMS threshold", self.detector.nms_threshold),
            ("Presence threshold", self.detector.presence_threshold),
        ];
        for (name, value) in thresholds {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::ConfigError(format!("{name} must be between 0.0 and 1.0")));
            }
        }
        if self.detector.max_faces == 0 {
            return Err(Error::ConfigError("Maximum faces must be greater than 0".to_string()));
        }
        if !(self.detector.bbox_expansion.is_finite() && self.detector.bbox_expansion >= 0.0) {
            return Err(Error::ConfigError("Box expansion must not be negative".to_string()));
        }

        // Capture and eye cameras
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(Error::ConfigError("Camera size must be non-zero".to_string()));
        }
        if self.normalizer.eye_width == 0 || self.normalizer.eye_height == 0 {
            return Err(Error::ConfigError("Normalized eye size must be non-zero".to_string()));
        }
        if !is_positive(self.normalizer.eye_focal) || !is_positive(self.normalizer.normalized_distance) {
            return Err(Error::ConfigError(
                "Normalized focal length and distance must be positive".to_string(),
            ));
        }

        // Capture depth must stay in front of the camera
        if !is_positive(1.0 + self.calibration.depth_offset) {
            return Err(Error::ConfigError(
                "Calibration depth offset must be greater than -1.0".to_string(),
            ));
        }

        // Screen mapping
        if self.screen.smoothing_window == 0 {
            return Err(Error::ConfigError("Smoothing window must be greater than 0".to_string()));
        }
        if !(self.screen.hitbox_width_fraction > 0.0 && self.screen.hitbox_width_fraction <= 0.5) {
            return Err(Error::ConfigError(
                "Hit-box width fraction must be in (0.0, 0.5]".to_string(),
            ));
        }
        if !self.screen.depth_multiplier.is_finite() || !self.screen.vertical_scale.is_finite() {
            return Err(Error::ConfigError("Screen mapping factors must be finite".to_string()));
        }

        if !(0.0..=1.0).contains(&self.display.overlay_alpha) {
            return Err(Error::ConfigError("Overlay alpha must be between 0.0 and 1.0".to_string()));
        }
        if !is_positive(self.pipeline.max_tick_rate) {
            return Err(Error::ConfigError("Maximum tick rate must be greater than 0".to_string()));
        }
        if !is_positive(self.video.output_fps) {
            return Err(Error::ConfigError("Output frame rate must be greater than 0".to_string()));
        }

        if let Some((a, b)) = self.keys.find_conflict() {
            return Err(Error::ConfigError(format!("{a:?} and {b:?} are bound to the same key")));
        }

        Ok(())
    }

    /// Check that the model files for the selected detector exist
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` naming the first missing file
    pub fn check_model_files(&self) -> Result<()> {
        let models = [
            ("Face detector", &self.models.face_detector),
            ("Face mesh", &self.models.face_mesh),
            ("Gaze estimator", &self.models.gaze_estimator),
        ];
        for (name, path) in models {
            if !path.exists() {
                return Err(Error::ConfigError(format!("{name} model not found: {}", path.display())));
            }
        }
        Ok(())
    }
}

fn is_positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

/// Example configuration file content
pub const EXAMPLE_CONFIG: &str = r#"# Gaze Region Tracker Configuration

# Model paths
models:
  face_detector: "assets/face_detector.onnx"
  face_mesh: "assets/face_mesh.onnx"
  gaze_estimator: "assets/gaze_estimator.onnx"

# Face and landmark detection
detector:
  mode: mediapipe
  confidence_threshold: 0.5
  nms_threshold: 0.4
  max_faces: 4
  bbox_expansion: 0.25
  presence_threshold: 0.5

# Camera parameters (YAML with width, height, camera_matrix, distortion_coefficients)
camera:
  params: "assets/camera_params.yaml"
  width: 1280
  height: 720

# Normalized eye camera
normalizer:
  normalized_distance: 0.6
  eye_width: 60
  eye_height: 36
  eye_focal: 960.0

# Calibration capture depth is 1 m plus this offset
calibration:
  depth_offset: -0.4

# Gaze to screen mapping
screen:
  depth_multiplier: 0.5
  vertical_scale: 1.0
  smoothing_window: 5
  hitbox_width_fraction: 0.25
  mirror: true

# Initial annotation toggles
display:
  show_bbox: true
  show_landmarks: false
  show_head_pose: true
  show_normalized_image: false
  show_template_model: false
  show_gaze_vector: true
  window_name: "Gaze Region Tracker"
  overlay_alpha: 0.4

# Worker loop
pipeline:
  max_tick_rate: 30.0
  enabled: true

# Key bindings (a character or a key code)
keys:
  toggle_bbox: b
  toggle_landmarks: l
  toggle_head_pose: h
  toggle_normalized_image: n
  toggle_template_model: t
  toggle_gaze_vector: g
  calibrate: c
  toggle_pipeline: p
  quit: q

# Input and recording
video:
  camera_index: 0
  output_fps: 30.0
"#;
