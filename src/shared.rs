//! State shared between the pipeline worker and the presentation loop.
//!
//! One mutex guards both the latest published results and the key queue.
//! The worker is the only publisher and the only command consumer; the
//! presentation side only pushes keys and reads snapshots.

use crate::{
    commands::{Command, CommandQueue, KeyBindings},
    region::Region,
};
use opencv::core::Mat;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};

/// Latest results of the pipeline.
///
/// Frames are shared, never mutated after publishing, so cloning a record
/// only bumps reference counts.
#[derive(Debug, Clone, Default)]
pub struct PublishRecord {
    pub frame: Option<Arc<Mat>>,
    /// BGRA, same size as `frame`
    pub overlay: Option<Arc<Mat>>,
    pub region: Option<Region>,
    /// Measured ticks per second
    pub tick_rate: f64,
    pub tick: u64,
}

#[derive(Debug, Default)]
struct SharedInner {
    record: PublishRecord,
    commands: CommandQueue,
}

/// Cloneable handle to the shared record and key queue
#[derive(Debug, Clone, Default)]
pub struct SharedState {
    inner: Arc<Mutex<SharedInner>>,
}

impl SharedState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock leaves plain data behind, still usable
    fn lock(&self) -> MutexGuard<'_, SharedInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the whole record
    pub fn publish(&self, record: PublishRecord) {
        self.lock().record = record;
    }

    /// Current record; the frames are shared with the publisher
    #[must_use]
    pub fn snapshot(&self) -> PublishRecord {
        self.lock().record.clone()
    }

    #[must_use]
    pub fn region(&self) -> Option<Region> {
        self.lock().record.region
    }

    #[must_use]
    pub fn tick_rate(&self) -> f64 {
        self.lock().record.tick_rate
    }

    pub fn push_key(&self, key: i32) {
        self.lock().commands.push(key);
    }

    /// Dequeue the commands bound in `bindings`, leaving other keys queued
    #[must_use]
    pub fn drain_commands(&self, bindings: &KeyBindings) -> Vec<Command> {
        self.lock().commands.drain_recognized(bindings)
    }

    #[must_use]
    pub fn pending_keys(&self) -> usize {
        self.lock().commands.len()
    }
}

/// Cooperative stop flag checked once per tick
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
