//! Worker loop that drives the pipeline at a bounded tick rate.

use crate::{
    commands::{Command, KeyBindings},
    error::Result,
    pipeline::GazePipeline,
    shared::{PublishRecord, SharedState, StopSignal},
    video::{FrameSink, FrameSource},
};
use log::{debug, info};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Ticks between tick-rate updates
const RATE_WINDOW: u64 = 10;

/// Main application struct: owns the frame source, the optional recorder and
/// the pipeline, and publishes every tick to [`SharedState`].
pub struct GazeTracker {
    source: Box<dyn FrameSource>,
    sink: Option<Box<dyn FrameSink>>,
    pipeline: GazePipeline,
    shared: SharedState,
    stop: StopSignal,
    bindings: KeyBindings,
    tick_budget: Duration,
}

impl GazeTracker {
    /// `max_tick_rate` bounds the loop; non-positive values disable the bound
    #[must_use]
    pub fn new(
        source: Box<dyn FrameSource>,
        pipeline: GazePipeline,
        shared: SharedState,
        stop: StopSignal,
        bindings: KeyBindings,
        max_tick_rate: f64,
    ) -> Self {
        let tick_budget = if max_tick_rate.is_finite() && max_tick_rate > 0.0 {
            Duration::from_secs_f64(1.0 / max_tick_rate)
        } else {
            Duration::ZERO
        };
        Self {
            source,
            sink: None,
            pipeline,
            shared,
            stop,
            bindings,
            tick_budget,
        }
    }

    /// Also write every annotated frame to `sink`
    #[must_use]
    pub fn with_sink(mut self, sink: Box<dyn FrameSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Run until stopped, asked to quit, or the source fails.
    ///
    /// The stop signal is checked at the top of every tick and the current
    /// tick always completes. Source and sink are released when `self`
    /// drops, on every exit path.
    ///
    /// # Errors
    ///
    /// Returns `CameraRead` when the source fails or ends before a stop was
    /// requested, and any non-recoverable pipeline or recording error
    pub fn run(mut self) -> Result<()> {
        info!("Starting gaze tracker loop");

        let mut tick: u64 = 0;
        let mut tick_rate = 0.0;
        let mut window_start = Instant::now();

        while !self.stop.is_stopped() {
            let tick_start = Instant::now();

            for command in self.shared.drain_commands(&self.bindings) {
                if command == Command::Quit {
                    info!("Quit requested");
                    self.stop.stop();
                } else {
                    self.pipeline.apply_command(command);
                }
            }

            let frame = match self.source.read() {
                Ok(frame) => frame,
                // Quit was requested in this tick; a dried-up source is not a failure then
                Err(e) if self.stop.is_stopped() => {
                    info!("Source ended after stop: {e}");
                    break;
                }
                Err(e) => return Err(e),
            };
            self.pipeline.set_tick_rate(tick_rate);
            let output = self.pipeline.process(&frame)?;

            if let Some(sink) = self.sink.as_mut() {
                sink.write(&output.annotated)?;
            }

            tick += 1;
            if tick % RATE_WINDOW == 0 {
                let elapsed = window_start.elapsed().as_secs_f64();
                if elapsed > 0.0 {
                    #[allow(clippy::cast_precision_loss)]
                    let rate = RATE_WINDOW as f64 / elapsed;
                    tick_rate = rate;
                }
                window_start = Instant::now();
                debug!("Tick {tick}: {tick_rate:.1} ticks/s, {} faces", output.num_faces);
            }

            self.shared.publish(PublishRecord {
                frame: Some(Arc::new(output.annotated)),
                overlay: output.overlay.map(Arc::new),
                region: output.region,
                tick_rate,
                tick,
            });

            if let Some(remaining) = self.tick_budget.checked_sub(tick_start.elapsed()) {
                thread::sleep(remaining);
            }
        }

        info!("Gaze tracker stopped after {tick} ticks");
        Ok(())
    }
}
