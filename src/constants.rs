//! Constants used throughout the application

/// Number of points produced by the face-mesh landmark model
pub const NUM_MESH_LANDMARKS: usize = 468;

/// Mesh index of the nose tip; the calibrated template is centred on it
pub const MESH_NOSE_INDEX: usize = 1;

/// Mesh indices of the subject's right eye corners
pub const MESH_RIGHT_EYE_INDICES: [usize; 2] = [33, 133];

/// Mesh indices of the subject's left eye corners
pub const MESH_LEFT_EYE_INDICES: [usize; 2] = [362, 263];

/// Mesh indices of the mouth corners
pub const MESH_MOUTH_INDICES: [usize; 2] = [78, 308];

/// Face-mesh model input edge length in pixels
pub const MESH_INPUT_SIZE: i32 = 192;

/// Image normalization constants for the box detector
pub const IMAGE_NORMALIZATION_OFFSET: f32 = 127.5;
pub const IMAGE_NORMALIZATION_SCALE: f32 = 128.0;

/// Canonical head distance used to seed PnP, in meters
pub const CANONICAL_FACE_DISTANCE: f64 = 1.0;

/// Normalized eye camera (MPIIGaze layout)
pub const NORMALIZED_EYE_WIDTH: u32 = 60;
pub const NORMALIZED_EYE_HEIGHT: u32 = 36;
pub const NORMALIZED_EYE_FOCAL: f64 = 960.0;

/// Distance of the virtual normalized camera from the eye, in meters
pub const DEFAULT_NORMALIZED_DISTANCE: f64 = 0.6;

/// Default offset added to the canonical distance when lifting calibration landmarks
pub const DEFAULT_CALIBRATION_DEPTH_OFFSET: f64 = -0.4;

/// Default smoothing window, in ticks
pub const DEFAULT_SMOOTHING_WINDOW: usize = 5;

/// Default screen-point depth multiplier
pub const DEFAULT_DEPTH_MULTIPLIER: f64 = 0.5;

/// Default hit-box width as a fraction of the frame width
pub const DEFAULT_HITBOX_WIDTH_FRACTION: f64 = 0.25;

/// Points closer to the camera plane than this give no screen position, in meters
pub const MIN_PROJECTION_DEPTH: f64 = 1e-3;

/// Default upper bound on pipeline ticks per second
pub const DEFAULT_MAX_TICK_RATE: f64 = 30.0;

/// Length of drawn head-pose axes and gaze rays, in meters
pub const AXIS_LENGTH: f64 = 0.05;

/// Numeric precision epsilon
pub const EPSILON: f64 = 1e-10;
