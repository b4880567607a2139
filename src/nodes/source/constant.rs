use dasp_graph::Buffer;

use crate::ugen::{Rate, Signal, Signals, UnitGenerator};

/// Outputs `value`, either in every sample or once per block.
#[derive(Clone, Debug)]
pub struct Constant {
    value: f32,
    rate: Rate,
    out: Buffer,
}

impl Constant {
    pub fn new(value: f32) -> Self {
        let mut out = Buffer::SILENT;
        out.iter_mut().for_each(|s| *s = value);
        Self {
            value,
            rate: Rate::Audio,
            out,
        }
    }

    /// A block-rate constant.
    pub fn block(value: f32) -> Self {
        Self {
            value,
            rate: Rate::Block,
            out: Buffer::SILENT,
        }
    }

    #[inline]
    pub fn value(&self) -> f32 {
        self.value
    }
}

impl UnitGenerator for Constant {
    fn rate(&self) -> Rate {
        self.rate
    }

    // the block is filled once in `new`
    fn compute(&mut self, _signals: &Signals<'_>) {}

    fn output(&self, output: u16) -> Option<Signal<'_>> {
        (output == 0).then(|| match self.rate {
            Rate::Audio => Signal::Audio(&self.out),
            Rate::Block => Signal::Block(self.value),
        })
    }
}
