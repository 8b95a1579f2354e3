use std::collections::VecDeque;
use ndarray::Array2;
use crate::drivers::PipelineError;
/// Fixed-capacity window of the most recent samples per channel, plus the
/// elapsed-time stamp of every sample column.
///
/// The window is full from the start (zero-filled) and every push evicts
/// exactly the oldest column.
pub struct SlidingBuffer {
    per_channel: Vec<VecDeque<f64>>, // channel -> samples, oldest first
    timestamps: VecDeque<f64>,
    capacity: usize,
}
impl SlidingBuffer {
    pub fn new(channels: usize, capacity: usize) -> Result<Self, PipelineError> {
        if channels == 0 || capacity == 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "sliding buffer needs at least one channel and one sample (got {channels} x {capacity})"
            )));
        }
        Ok(Self {
            per_channel: (0..channels)
                .map(|_| std::iter::repeat(0.0).take(capacity).collect())
                .collect(),
            timestamps: std::iter::repeat(0.0).take(capacity).collect(),
            capacity,
        })
    }
    pub fn capacity(&self) -> usize {
        self.capacity
    }
    pub fn num_channels(&self) -> usize {
        self.per_channel.len()
    }
    /// Appends one sample column, evicting the oldest one.
    pub fn push(&mut self, sample: &[f64], timestamp_ms: f64) -> Result<(), PipelineError> {
        if sample.len() != self.per_channel.len() {
            return Err(PipelineError::ChannelMismatch {
                expected: self.per_channel.len(),
                actual: sample.len(),
            });
        }
        for (channel_queue, &value) in self.per_channel.iter_mut().zip(sample) {
            channel_queue.pop_front();
            channel_queue.push_back(value);
        }
        self.timestamps.pop_front();
        self.timestamps.push_back(timestamp_ms);
        Ok(())
    }
    /// Owned `[channels x capacity]` copy, oldest sample first.
    pub fn snapshot(&self) -> Array2<f64> {
        Array2::from_shape_fn((self.per_channel.len(), self.capacity), |(c, i)| {
            self.per_channel[c][i]
        })
    }
    #[cfg(test)]
    pub fn timestamps(&self) -> Vec<f64> {
        self.timestamps.iter().copied().collect()
    }
    pub fn latest_timestamp(&self) -> f64 {
        self.timestamps.back().copied().unwrap_or(0.0)
    }
}
