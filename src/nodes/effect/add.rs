//! Sum of two signals

use dasp_graph::Buffer;

use crate::id::SignalRef;
use crate::ugen::{Ramp, Rate, Signal, Signals, UnitGenerator};

/// Adds two signals of the same instrument, sample by sample.
///
/// Operand rates follow the same rules as [`Mul`](crate::nodes::Mul).
#[derive(Clone, Debug)]
pub struct Add {
    inputs: [SignalRef; 2],
    ramps: [Ramp; 2],
    rate: Rate,
    out: Buffer,
    value: f32,
}

impl Add {
    pub fn new(a: SignalRef, b: SignalRef) -> Self {
        Self {
            inputs: [a, b],
            ramps: [Ramp::default(); 2],
            rate: Rate::Audio,
            out: Buffer::SILENT,
            value: 0.0,
        }
    }

    /// One sum per block, of two block-rate signals.
    pub fn block(a: SignalRef, b: SignalRef) -> Self {
        Self {
            rate: Rate::Block,
            ..Self::new(a, b)
        }
    }
}

impl UnitGenerator for Add {
    fn inputs(&self) -> &[SignalRef] {
        &self.inputs
    }

    fn rate(&self) -> Rate {
        self.rate
    }

    fn compute(&mut self, signals: &Signals<'_>) {
        let a = signals.get(self.inputs[0]);
        let b = signals.get(self.inputs[1]);
        match self.rate {
            Rate::Audio => {
                let a = self.ramps[0].read(a);
                let b = self.ramps[1].read(b);
                for (i, out) in self.out.iter_mut().enumerate() {
                    *out = a.at(i) + b.at(i);
                }
            }
            Rate::Block => self.value = a.value() + b.value(),
        }
    }

    fn output(&self, output: u16) -> Option<Signal<'_>> {
        (output == 0).then(|| match self.rate {
            Rate::Audio => Signal::Audio(&self.out),
            Rate::Block => Signal::Block(self.value),
        })
    }
}
