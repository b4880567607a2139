//! Unit generators: the nodes of an instrument's signal graph.
//!
//! Every ugen owns its output blocks. During evaluation a ugen reads its
//! inputs through [`Signals`], which resolves references against the rack
//! after the rack has brought those inputs up to date.

use dasp_graph::Buffer;

use crate::id::{SignalAddr, SignalRef};
use crate::nodes::{Add, Constant, Mul, Sine};
use crate::patch::{InputPort, Rack, SourceLink};

/// Shared all-zero block handed out for anything that cannot be read.
pub static SILENCE: Buffer = Buffer::SILENT;

/// How often a signal changes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Rate {
    /// A fresh block of samples every block.
    #[default]
    Audio,
    /// One value per block.
    Block,
}

/// One output of a ugen as of its last computation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Signal<'a> {
    Audio(&'a Buffer),
    Block(f32),
}

impl<'a> Signal<'a> {
    pub fn rate(&self) -> Rate {
        match self {
            Signal::Audio(_) => Rate::Audio,
            Signal::Block(_) => Rate::Block,
        }
    }

    /// Sample `i` of the block. A block-rate value fills every sample.
    #[inline]
    pub fn at(&self, i: usize) -> f32 {
        match self {
            Signal::Audio(block) => block[i],
            Signal::Block(value) => *value,
        }
    }

    /// The signal read once per block: an audio block gives its first
    /// sample.
    #[inline]
    pub fn value(&self) -> f32 {
        self.at(0)
    }

    pub fn audio(self) -> Option<&'a Buffer> {
        match self {
            Signal::Audio(block) => Some(block),
            Signal::Block(_) => None,
        }
    }
}

/// Linear interpolation of a block-rate operand across an audio block, so a
/// value that jumps between blocks does not click. Audio operands pass
/// through.
#[derive(Clone, Copy, Debug, Default)]
pub struct Ramp {
    last: Option<f32>,
}

impl Ramp {
    /// Per-sample view of `signal` for this block.
    pub fn read<'a>(&mut self, signal: Signal<'a>) -> Ramped<'a> {
        match signal {
            Signal::Audio(block) => {
                self.last = None;
                Ramped::Audio(block)
            }
            Signal::Block(value) => {
                // the first block starts on the value itself
                let from = self.last.unwrap_or(value);
                self.last = Some(value);
                Ramped::Line {
                    from,
                    step: (value - from) / Buffer::LEN as f32,
                }
            }
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub enum Ramped<'a> {
    Audio(&'a Buffer),
    Line { from: f32, step: f32 },
}

impl Ramped<'_> {
    #[inline]
    pub fn at(&self, i: usize) -> f32 {
        match self {
            Ramped::Audio(block) => block[i],
            Ramped::Line { from, step } => from + step * i as f32,
        }
    }
}

/// Read access to the outputs of other ugens while one ugen computes.
pub struct Signals<'a> {
    rack: &'a Rack,
    instrument: u32,
}

impl<'a> Signals<'a> {
    pub(crate) fn new(rack: &'a Rack, instrument: u32) -> Self {
        Self { rack, instrument }
    }

    /// A signal of the instrument being computed. Missing signals, and
    /// ugens that are themselves still computing, read as silence.
    pub fn get(&self, signal: SignalRef) -> Signal<'a> {
        self.signal(signal.in_instrument(self.instrument))
    }

    /// A signal anywhere in the rack.
    pub fn signal(&self, addr: SignalAddr) -> Signal<'a> {
        self.rack.signal(addr).unwrap_or(Signal::Audio(&SILENCE))
    }

    /// Everything plugged into `port`.
    pub fn sources(&self, port: &InputPort) -> impl Iterator<Item = SourceLink> + 'a {
        self.rack.sources_of(port)
    }

    #[inline]
    pub fn instrument(&self) -> u32 {
        self.instrument
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.rack.sample_rate()
    }
}

/// A node that produces one or more signals per evaluation.
///
/// Implement this to add ugens beyond the built-in ones and insert them
/// with [`Ugen::Custom`].
pub trait UnitGenerator: Send {
    /// Signals of the same instrument this ugen reads. They are evaluated
    /// before [`compute`](Self::compute) runs.
    fn inputs(&self) -> &[SignalRef] {
        &[]
    }

    fn num_outputs(&self) -> usize {
        1
    }

    /// Rate of every output. A block-rate ugen may only read block-rate
    /// signals.
    fn rate(&self) -> Rate {
        Rate::Audio
    }

    /// Fill the outputs for the current block number.
    fn compute(&mut self, signals: &Signals<'_>);

    fn output(&self, output: u16) -> Option<Signal<'_>>;
}

/// Built-in ugens are plain variants so creating them on the audio thread
/// does not box.
pub enum Ugen {
    Input(InputPort),
    Mul(Mul),
    Add(Add),
    Constant(Constant),
    Sine(Sine),
    Custom(Box<dyn UnitGenerator>),
}

impl Ugen {
    pub fn as_input(&self) -> Option<&InputPort> {
        match self {
            Ugen::Input(port) => Some(port),
            _ => None,
        }
    }

    pub fn as_input_mut(&mut self) -> Option<&mut InputPort> {
        match self {
            Ugen::Input(port) => Some(port),
            _ => None,
        }
    }

    pub fn is_input(&self) -> bool {
        matches!(self, Ugen::Input(_))
    }
}

impl UnitGenerator for Ugen {
    fn inputs(&self) -> &[SignalRef] {
        match self {
            Ugen::Input(u) => u.inputs(),
            Ugen::Mul(u) => u.inputs(),
            Ugen::Add(u) => u.inputs(),
            Ugen::Constant(u) => u.inputs(),
            Ugen::Sine(u) => u.inputs(),
            Ugen::Custom(u) => u.inputs(),
        }
    }

    fn num_outputs(&self) -> usize {
        match self {
            Ugen::Input(u) => u.num_outputs(),
            Ugen::Mul(u) => u.num_outputs(),
            Ugen::Add(u) => u.num_outputs(),
            Ugen::Constant(u) => u.num_outputs(),
            Ugen::Sine(u) => u.num_outputs(),
            Ugen::Custom(u) => u.num_outputs(),
        }
    }

    fn rate(&self) -> Rate {
        match self {
            Ugen::Input(u) => u.rate(),
            Ugen::Mul(u) => u.rate(),
            Ugen::Add(u) => u.rate(),
            Ugen::Constant(u) => u.rate(),
            Ugen::Sine(u) => u.rate(),
            Ugen::Custom(u) => u.rate(),
        }
    }

    fn compute(&mut self, signals: &Signals<'_>) {
        match self {
            Ugen::Input(u) => u.compute(signals),
            Ugen::Mul(u) => u.compute(signals),
            Ugen::Add(u) => u.compute(signals),
            Ugen::Constant(u) => u.compute(signals),
            Ugen::Sine(u) => u.compute(signals),
            Ugen::Custom(u) => u.compute(signals),
        }
    }

    fn output(&self, output: u16) -> Option<Signal<'_>> {
        match self {
            Ugen::Input(u) => u.output(output),
            Ugen::Mul(u) => u.output(output),
            Ugen::Add(u) => u.output(output),
            Ugen::Constant(u) => u.output(output),
            Ugen::Sine(u) => u.output(output),
            Ugen::Custom(u) => u.output(output),
        }
    }
}

impl core::fmt::Debug for Ugen {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Ugen::Input(_) => "Input",
            Ugen::Mul(_) => "Mul",
            Ugen::Add(_) => "Add",
            Ugen::Constant(_) => "Constant",
            Ugen::Sine(_) => "Sine",
            Ugen::Custom(_) => "Custom",
        };
        f.debug_struct(name)
            .field("rate", &self.rate())
            .field("inputs", &self.inputs())
            .field("outputs", &self.num_outputs())
            .finish()
    }
}

/// A ugen plus the number of the last block it computed.
#[derive(Debug)]
pub struct UgenCell {
    pub ugen: Ugen,
    pub(crate) stamp: Option<u64>,
}

impl UgenCell {
    pub fn new(ugen: Ugen) -> Self {
        Self { ugen, stamp: None }
    }

    /// Block number this ugen last computed, if any.
    pub fn stamp(&self) -> Option<u64> {
        self.stamp
    }
}
