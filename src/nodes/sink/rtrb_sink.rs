//! Ring buffer sink for rendered blocks

use dasp_graph::Buffer;
use rtrb::Producer;

/// Pushes rendered blocks into an rtrb ring buffer as interleaved samples.
///
/// Useful for:
/// - Handing audio to a device callback on another thread
/// - Recording/analysis
pub struct RtrbSink {
    producer: Producer<f32>,
    channels: usize,
}

impl RtrbSink {
    /// Create a sink that writes `channels` interleaved channels
    pub fn new(producer: Producer<f32>, channels: usize) -> Self {
        Self {
            producer,
            channels: channels.max(1),
        }
    }

    pub fn mono(producer: Producer<f32>) -> Self {
        Self::new(producer, 1)
    }

    pub fn stereo(producer: Producer<f32>) -> Self {
        Self::new(producer, 2)
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Returns how many sample slots are available
    #[inline]
    pub fn available(&self) -> usize {
        self.producer.slots()
    }

    /// Interleave one block per channel into the ring buffer. Channels past
    /// the end of `blocks` repeat the last block given; no blocks at all is
    /// written as silence.
    ///
    /// The whole block is dropped when the ring buffer cannot take it, so a
    /// stalled reader never sees a partial frame. Returns whether it was
    /// written.
    pub fn write(&mut self, blocks: &[&Buffer]) -> bool {
        let samples_needed = Buffer::LEN * self.channels;
        if self.producer.slots() < samples_needed {
            return false;
        }

        // Interleave channels
        for i in 0..Buffer::LEN {
            for ch in 0..self.channels {
                let sample = match blocks.len() {
                    0 => 0.0,
                    n => blocks[ch.min(n - 1)][i],
                };
                let _ = self.producer.push(sample);
            }
        }
        true
    }
}
