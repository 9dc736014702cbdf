//! Gaze region tracking library for real-time, hands-free screen control.
//!
//! This library estimates where a user is looking from a camera feed and
//! classifies the gaze into a left or right screen region, using:
//! - ONNX Runtime for face detection, face-mesh landmarks and gaze inference
//! - `OpenCV` for undistortion, `PnP` and image warping
//! - `nalgebra` for all 3D geometry
//!
//! The estimation pipeline consists of:
//! 1. Face detection and 468-point landmark detection
//! 2. One-time calibration binding a 3D landmark template to the user
//! 3. Head pose estimation using `PnP` (Perspective-n-Point)
//! 4. Eye image normalization and gaze inference per eye
//! 5. Fusion of both eyes, projection onto the frame and smoothing
//! 6. Region classification against two hit-boxes
//!
//! # Examples
//!
//! ## Smoothing and Regions
//!
//! ```no_run
//! use gaze_region_tracker::{region::RegionClassifier, smoothing::SmoothingBuffer};
//! use nalgebra::{Point2, Vector2};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Hit-boxes a quarter of the frame wide on each side
//! let classifier = RegionClassifier::new(1280, 720, 0.25)?;
//! let mut smoothing = SmoothingBuffer::<2>::new(3);
//!
//! for x in [100.0, 120.0, 140.0] {
//!     let smoothed = smoothing.push(Vector2::new(x, 360.0));
//!     let region = classifier.classify(&Point2::from(smoothed));
//!     println!("{smoothed:?} -> {region:?}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Complete Pipeline Example
//!
//! ```no_run
//! use gaze_region_tracker::{
//!     app::GazeTracker,
//!     config::Config,
//!     gaze_model::OnnxGazeModel,
//!     landmarks::create_provider,
//!     pipeline::GazePipeline,
//!     shared::{SharedState, StopSignal},
//!     video::{CaptureSource, VideoSource},
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_file("config.yaml")?;
//! let mut source = CaptureSource::open(&VideoSource::Camera(0), config.camera.width, config.camera.height)?;
//! let (width, height) = source.frame_size()?;
//! let camera = config.camera.camera_for(width, height)?;
//! let provider = create_provider(&config.models, &config.detector)?;
//! let gaze_model = OnnxGazeModel::new(&config.models.gaze_estimator)?;
//! let pipeline = GazePipeline::from_config(&config, camera, provider, Box::new(gaze_model))?;
//!
//! let shared = SharedState::new();
//! let stop = StopSignal::new();
//! let tracker = GazeTracker::new(
//!     Box::new(source),
//!     pipeline,
//!     shared.clone(),
//!     stop.clone(),
//!     config.keys.clone(),
//!     config.pipeline.max_tick_rate,
//! );
//! let worker = std::thread::spawn(move || tracker.run());
//!
//! // Press 'c' to calibrate, then read the region
//! shared.push_key(i32::from(b'c'));
//! std::thread::sleep(std::time::Duration::from_secs(2));
//! println!("Region: {:?}", shared.region());
//!
//! stop.stop();
//! worker.join().expect("worker panicked")?;
//! # Ok(())
//! # }
//! ```

/// Camera intrinsics, distortion and projection
pub mod camera;

/// Per-frame face records
pub mod face;

/// SCRFD face box detection
pub mod face_detection;

/// Landmark provider trait and the face-mesh implementation
pub mod landmarks;

/// 3D face template, calibration and `PnP` head pose
pub mod pose_estimation;

/// Eye image normalization
pub mod normalizer;

/// Gaze inference capability
pub mod gaze_model;

/// Gaze vectors, eye fusion and screen mapping
pub mod gaze;

/// Temporal smoothing of screen points
pub mod smoothing;

/// Left/right region classification
pub mod region;

/// Keyboard commands and the key queue
pub mod commands;

/// State shared with the presentation loop
pub mod shared;

/// Frame sources and sinks
pub mod video;

/// Annotation and overlay rendering
pub mod visualizer;

/// Per-tick processing and calibration state machine
pub mod pipeline;

/// Utility functions for geometry and `OpenCV` interoperability
pub mod utils;

/// Error types and result handling
pub mod error;

/// Worker loop
pub mod app;

/// Constants used throughout the application
pub mod constants;

/// Configuration management
pub mod config;

pub use error::{Error, Result};
