use nalgebra::SVector;
use std::collections::VecDeque;

/// Moving average over the last `window` points
#[derive(Debug, Clone)]
pub struct SmoothingBuffer<const D: usize> {
    window: usize,
    buffer: VecDeque<SVector<f64, D>>,
}

impl<const D: usize> SmoothingBuffer<D> {
    /// A window of zero is treated as one (no smoothing)
    #[must_use]
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            buffer: VecDeque::with_capacity(window),
        }
    }

    /// Push a point and return the mean of the buffered points
    #[allow(clippy::cast_precision_loss)]
    pub fn push(&mut self, point: SVector<f64, D>) -> SVector<f64, D> {
        if self.buffer.len() >= self.window {
            self.buffer.pop_front();
        }
        self.buffer.push_back(point);

        let sum: SVector<f64, D> = self.buffer.iter().sum();
        sum / self.buffer.len() as f64
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    #[must_use]
    pub fn window(&self) -> usize {
        self.window
    }
}
