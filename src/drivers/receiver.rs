use std::time::Instant;
use crate::drivers::{
    decode_sample, DatagramSource, PipelineError, RecvOutcome, ShutdownToken, SlidingBuffer,
    SnapshotPublisher,
};
use crate::types::Snapshot;
/// Counters reported when the acquisition loop ends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    /// Datagrams thrown away during warm-up.
    pub discarded: u64,
    /// Datagrams that did not decode into a sample.
    pub skipped: u64,
    pub appended: u64,
    pub published: u64,
    /// Queued snapshots dropped because the consumer fell behind.
    pub evicted: u64,
}
/// Acquisition side of the pipeline: datagrams in, snapshots out.
///
/// The first `warmup` datagrams are dropped without being looked at. Every
/// later datagram is decoded; a bad one is counted and skipped, a good one is
/// appended to the sliding window and a copy of the whole window is handed to
/// the caller.
pub struct StreamReceiver {
    buffer: SlidingBuffer,
    channel_keys: Vec<String>,
    warmup_remaining: usize,
    max_datagram_bytes: usize,
    started_at: Instant,
    stats: ReceiverStats,
}
impl StreamReceiver {
    pub fn new(
        buffer: SlidingBuffer,
        channel_keys: Vec<String>,
        warmup: usize,
        max_datagram_bytes: usize,
    ) -> Result<Self, PipelineError> {
        if channel_keys.len() != buffer.num_channels() {
            return Err(PipelineError::ChannelMismatch {
                expected: buffer.num_channels(),
                actual: channel_keys.len(),
            });
        }
        Ok(Self {
            buffer,
            channel_keys,
            warmup_remaining: warmup,
            max_datagram_bytes: max_datagram_bytes.max(1),
            started_at: Instant::now(),
            stats: ReceiverStats::default(),
        })
    }
    #[cfg(test)]
    pub fn buffer(&self) -> &SlidingBuffer {
        &self.buffer
    }
    #[cfg(test)]
    pub fn stats(&self) -> ReceiverStats {
        self.stats
    }
    pub fn in_warmup(&self) -> bool {
        self.warmup_remaining > 0
    }
    /// Milliseconds since acquisition started, rounded to 4 decimals.
    fn elapsed_ms(&self) -> f64 {
        let ms = self.started_at.elapsed().as_secs_f64() * 1000.0;
        (ms * 1e4).round() / 1e4
    }
    /// Processes one datagram payload. Returns the snapshot to publish when a
    /// sample was appended.
    pub fn handle_datagram(&mut self, payload: &[u8]) -> Result<Option<Snapshot>, PipelineError> {
        if self.in_warmup() {
            self.warmup_remaining -= 1;
            self.stats.discarded += 1;
            if self.warmup_remaining == 0 {
                log::info!(
                    "warm-up complete, discarded {} datagrams",
                    self.stats.discarded
                );
            }
            return Ok(None);
        }
        let sample = match decode_sample(payload, &self.channel_keys) {
            Ok(sample) => sample,
            Err(e) => {
                self.stats.skipped += 1;
                log::warn!("skipped message: {e} ({} skipped so far)", self.stats.skipped);
                return Ok(None);
            }
        };
        self.buffer.push(&sample, self.elapsed_ms())?;
        self.stats.appended += 1;
        Ok(Some(Snapshot {
            samples: self.buffer.snapshot(),
            timestamp_ms: self.buffer.latest_timestamp(),
        }))
    }
    /// Pulls datagrams from `source` until shutdown is signalled. The shutdown signal is checked between reads, so the loop
    /// reacts within one read timeout.
    pub fn run<S: DatagramSource>(
        &mut self,
        source: &mut S,
        publisher: &mut SnapshotPublisher,
        shutdown: &ShutdownToken,
    ) -> Result<ReceiverStats, PipelineError> {
        self.started_at = Instant::now();
        log::info!(
            "acquisition started: {} channels x {} samples, {} warm-up datagrams",
            self.buffer.num_channels(),
            self.buffer.capacity(),
            self.warmup_remaining
        );
        let mut datagram = vec![0u8; self.max_datagram_bytes];
        while !shutdown.is_triggered() {
            match source.recv_datagram(&mut datagram)? {
                RecvOutcome::Datagram(len) => {
                    if let Some(snapshot) = self.handle_datagram(&datagram[..len])? {
                        publisher.publish(snapshot)?;
                    }
                }
                RecvOutcome::Idle => continue,
                #[cfg(test)]
                RecvOutcome::Exhausted => {
                    log::info!("datagram source exhausted");
                    break;
                }
            }
        }
        self.stats.published = publisher.published();
        self.stats.evicted = publisher.evicted();
        log::info!(
            "acquisition stopped: {} discarded, {} skipped, {} appended, {} published, {} evicted",
            self.stats.discarded,
            self.stats.skipped,
            self.stats.appended,
            self.stats.published,
            self.stats.evicted
        );
        Ok(self.stats)
    }
}
