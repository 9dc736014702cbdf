//! Gaze region tracker: tracks where the user looks and reports the active
//! left/right screen region.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use gaze_region_tracker::{
    app::GazeTracker,
    config::{Config, EXAMPLE_CONFIG},
    gaze_model::OnnxGazeModel,
    landmarks::create_provider,
    pipeline::GazePipeline,
    shared::{SharedState, StopSignal},
    video::{CaptureSource, VideoFileSink, VideoSource},
    visualizer::blend_overlay,
    Error,
};
use log::{info, warn};
use opencv::{
    highgui::{self, WINDOW_NORMAL},
    prelude::*,
};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

/// Presentation refresh interval
const PRESENT_INTERVAL_MS: i32 = 15;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML format)
    #[arg(short = 'C', long)]
    config: Option<PathBuf>,

    /// Camera index to use
    #[arg(long)]
    cam: Option<i32>,

    /// Video file to process instead of a camera
    #[arg(short, long)]
    video: Option<PathBuf>,

    /// Camera parameter file (YAML)
    #[arg(long)]
    camera_params: Option<PathBuf>,

    /// Record annotated frames to this file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Upper bound on processed frames per second
    #[arg(long)]
    max_tick_rate: Option<f64>,

    /// Run without a window
    #[arg(long)]
    headless: bool,

    /// Print an example configuration and exit
    #[arg(long)]
    example_config: bool,

    /// Enable debug output
    #[arg(short, long)]
    debug: bool,
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Config::from_file(path).with_context(|| format!("Failed to load {}", path.display()))?
        }
        None => Config::default(),
    };

    if let Some(cam) = args.cam {
        config.video.camera_index = cam;
    }
    if let Some(video) = &args.video {
        config.video.file = Some(video.clone());
    }
    if let Some(params) = &args.camera_params {
        config.camera.params = Some(params.clone());
    }
    if let Some(output) = &args.output {
        config.video.output = Some(output.clone());
    }
    if let Some(rate) = args.max_tick_rate {
        config.pipeline.max_tick_rate = rate;
    }

    config.validate()?;
    config.check_model_files()?;
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.example_config {
        print!("{EXAMPLE_CONFIG}");
        return Ok(());
    }

    if args.debug {
        env_logger::init_from_env(env_logger::Env::new().default_filter_or("debug"));
    } else {
        env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    }

    info!("Gaze Region Tracker {} ({})", env!("CARGO_PKG_VERSION"), env!("BUILD_TARGET"));
    let config = load_config(&args)?;

    let video_source = match &config.video.file {
        Some(path) => VideoSource::File(path.clone()),
        None => VideoSource::Camera(config.video.camera_index),
    };
    let from_file = matches!(video_source, VideoSource::File(_));
    let mut source = CaptureSource::open(&video_source, config.camera.width, config.camera.height)?;
    let (frame_width, frame_height) = source.frame_size()?;
    info!("Source delivers {frame_width}x{frame_height} frames");

    let camera = config.camera.camera_for(frame_width, frame_height)?;
    let provider = create_provider(&config.models, &config.detector)?;
    let gaze_model = OnnxGazeModel::new(&config.models.gaze_estimator)?;
    let pipeline = GazePipeline::from_config(&config, camera.clone(), provider, Box::new(gaze_model))?;

    let shared = SharedState::new();
    let stop = StopSignal::new();
    let mut tracker = GazeTracker::new(
        Box::new(source),
        pipeline,
        shared.clone(),
        stop.clone(),
        config.keys.clone(),
        config.pipeline.max_tick_rate,
    );
    if let Some(output) = &config.video.output {
        let width = i32::try_from(camera.width())?;
        let height = i32::try_from(camera.height())?;
        let sink = VideoFileSink::create(output, config.video.output_fps, width, height)?;
        tracker = tracker.with_sink(Box::new(sink));
    }

    let worker = thread::Builder::new()
        .name("gaze-worker".to_string())
        .spawn(move || tracker.run())?;

    let presented = if args.headless {
        while !worker.is_finished() {
            thread::sleep(Duration::from_millis(100));
        }
        Ok(())
    } else {
        present(&config, &shared, &stop, &worker)
    };

    finish(presented, &stop, worker, from_file)
}

/// Stop and join the worker, then report the presentation error first and
/// the worker's own error otherwise.
///
/// The worker owns the capture and the recorder; joining it on every path
/// releases both before the process exits.
fn finish(
    presented: Result<()>,
    stop: &StopSignal,
    worker: thread::JoinHandle<gaze_region_tracker::Result<()>>,
    from_file: bool,
) -> Result<()> {
    stop.stop();
    let result = worker.join().map_err(|_| anyhow!("Worker thread panicked"))?;
    let worker_result = match result {
        Ok(()) => {
            info!("Worker finished");
            Ok(())
        }
        Err(Error::CameraRead(msg)) if from_file => {
            info!("Input ended: {msg}");
            Ok(())
        }
        Err(e) => Err(e),
    };

    match presented {
        Err(e) => {
            if let Err(worker_error) = worker_result {
                warn!("Worker failed: {worker_error}");
            }
            Err(e.context("Presentation failed"))
        }
        Ok(()) => Ok(worker_result?),
    }
}

/// Show the latest published frame blended with its overlay and forward
/// key presses until the worker ends
fn present(
    config: &Config,
    shared: &SharedState,
    stop: &StopSignal,
    worker: &thread::JoinHandle<gaze_region_tracker::Result<()>>,
) -> Result<()> {
    let window = config.display.window_name.as_str();
    highgui::named_window(window, WINDOW_NORMAL)?;
    let mut last_tick = 0;

    while !worker.is_finished() {
        let record = shared.snapshot();
        if record.tick != last_tick {
            last_tick = record.tick;
            if let Some(frame) = &record.frame {
                match &record.overlay {
                    Some(overlay) => {
                        let shown = blend_overlay(frame, overlay, config.display.overlay_alpha)?;
                        highgui::imshow(window, &shown)?;
                    }
                    None => highgui::imshow(window, &**frame)?,
                }
            }
            if let Some(region) = record.region {
                log::debug!("Region: {region}");
            }
        }

        let key = highgui::wait_key(PRESENT_INTERVAL_MS)?;
        if key >= 0 {
            shared.push_key(key & 0xFF);
        }
        if last_tick > 0 && highgui::get_window_property(window, highgui::WND_PROP_VISIBLE)? < 1.0 {
            warn!("Window closed, stopping");
            stop.stop();
            break;
        }
    }

    highgui::destroy_all_windows()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    /// Worker that runs until stopped and records that it got to finish
    fn spawn_worker(
        stop: &StopSignal,
        outcome: gaze_region_tracker::Result<()>,
    ) -> (thread::JoinHandle<gaze_region_tracker::Result<()>>, Arc<AtomicBool>) {
        let finished = Arc::new(AtomicBool::new(false));
        let (stop, flag) = (stop.clone(), Arc::clone(&finished));
        let worker = thread::spawn(move || {
            while !stop.is_stopped() {
                thread::sleep(Duration::from_millis(5));
            }
            flag.store(true, Ordering::SeqCst);
            outcome
        });
        (worker, finished)
    }

    #[test]
    fn test_presentation_error_still_joins_worker() {
        let stop = StopSignal::new();
        let (worker, finished) = spawn_worker(&stop, Ok(()));

        let result = finish(Err(anyhow!("window lost")), &stop, worker, false);

        assert!(stop.is_stopped());
        assert!(finished.load(Ordering::SeqCst), "worker was not joined");
        let message = format!("{:#}", result.unwrap_err());
        assert!(message.contains("Presentation failed") && message.contains("window lost"));
    }

    #[test]
    fn test_worker_error_is_reported_after_clean_presentation() {
        let stop = StopSignal::new();
        let (worker, finished) = spawn_worker(&stop, Err(Error::ModelError("bad output".to_string())));

        let result = finish(Ok(()), &stop, worker, false);

        assert!(finished.load(Ordering::SeqCst));
        assert!(result.unwrap_err().to_string().contains("bad output"));
    }

    #[test]
    fn test_end_of_file_is_clean_exit() {
        let stop = StopSignal::new();
        let (worker, _finished) = spawn_worker(&stop, Err(Error::CameraRead("End of video file reached".to_string())));

        assert!(finish(Ok(()), &stop, worker, true).is_ok());
    }
}
