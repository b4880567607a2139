//! Block loop tying an [`Engine`] to a ring buffer.

use dasp_graph::Buffer;
use delegate::delegate;
use rtrb::{Consumer, Producer, RingBuffer};

use crate::engine::{ControlState, Engine};
use crate::message::Message;
use crate::nodes::RtrbSink;
use crate::patch::Rack;
use crate::queue::Sender;
use crate::ugen::SILENCE;

/// Runs one block at a time: execute due control messages, advance the
/// block number, pull the tapped instrument's outputs and push them
/// interleaved into a ring buffer for whoever plays them.
///
/// ```
/// use patchbay::{Driver, Engine, EngineConfig};
///
/// let (engine, _client) = Engine::new(EngineConfig::default());
/// let (mut driver, mut samples) = Driver::with_ring_buffer(engine, 2, 4);
/// driver.tap(1);
/// assert!(driver.process(0.0));
/// // nothing is defined yet, so the block is silent
/// assert_eq!(samples.pop(), Ok(0.0));
/// ```
pub struct Driver {
    engine: Engine,
    sink: RtrbSink,
    tap: Option<u32>,
    blocks_processed: u64,
}

impl Driver {
    pub fn new(engine: Engine, producer: Producer<f32>, channels: usize) -> Self {
        Self {
            engine,
            sink: RtrbSink::new(producer, channels.clamp(1, MAX_CHANNELS)),
            tap: None,
            blocks_processed: 0,
        }
    }

    /// A driver plus the consumer end of a ring buffer holding `blocks`
    /// blocks of `channels` interleaved channels.
    pub fn with_ring_buffer(engine: Engine, channels: usize, blocks: usize) -> (Self, Consumer<f32>) {
        let channels = channels.clamp(1, MAX_CHANNELS);
        let (producer, consumer) = RingBuffer::new(Buffer::LEN * channels * blocks.max(1));
        (Self::new(engine, producer, channels), consumer)
    }

    /// Render instrument `instrument`: its output `n` feeds channel `n`.
    pub fn tap(&mut self, instrument: u32) {
        self.tap = Some(instrument);
    }

    pub fn untap(&mut self) {
        self.tap = None;
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    pub fn into_engine(self) -> Engine {
        self.engine
    }

    #[inline]
    pub fn blocks_processed(&self) -> u64 {
        self.blocks_processed
    }

    delegate! {
        to self.engine {
            pub fn state(&self) -> ControlState;
            pub fn current_instrument(&self) -> Option<u32>;
            pub fn rack(&self) -> &Rack;
            pub fn sender(&self) -> Sender;
            pub fn enqueue(&self, msg: Message);
        }
        to self.sink {
            pub fn channels(&self) -> usize;
            pub fn available(&self) -> usize;
        }
    }

    /// Render one block at time `now`. Returns whether the block fit in
    /// the ring buffer; a full buffer drops the block but the engine still
    /// advances.
    pub fn process(&mut self, now: f64) -> bool {
        self.engine.poll_all(now);
        self.engine.begin_block();
        self.blocks_processed += 1;

        let Some(instrument) = self.tap else {
            return self.sink.write(&[&SILENCE]);
        };

        let channels = self.sink.channels();
        for output in 0..channels as u32 {
            // bring every channel up to date before borrowing them together
            let bound = self.engine.rack().instrument(instrument).and_then(|i| i.output(output));
            if bound.is_none() {
                break;
            }
            self.engine.request_output(instrument, output);
        }

        // outputs are taken in order up to the first unbound one; the sink
        // repeats the last block over the remaining channels
        let mut blocks = [&SILENCE; MAX_CHANNELS];
        let mut bound = 0;
        for (output, block) in blocks[..channels].iter_mut().enumerate() {
            match self.engine.output(instrument, output as u32) {
                Some(rendered) => *block = rendered,
                None => break,
            }
            bound += 1;
        }
        self.sink.write(&blocks[..bound])
    }
}

/// Channels a driver can interleave.
const MAX_CHANNELS: usize = 8;
