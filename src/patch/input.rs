use dasp_graph::Buffer;

use crate::patch::connection::ListHead;
use crate::ugen::{Rate, Signal, Signals, UnitGenerator};

/// A ugen whose output is the sum of every signal plugged into it, from
/// any instrument. With nothing plugged in it outputs silence.
///
/// An audio-rate port sums blocks and accepts signals of either rate; a
/// block-rate port sums one value per block and only accepts block-rate
/// signals.
#[derive(Debug, Default)]
pub struct InputPort {
    rate: Rate,
    pub(crate) sources: ListHead,
    out: Buffer,
    value: f32,
}

impl InputPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// A port summing block-rate signals.
    pub fn block() -> Self {
        Self {
            rate: Rate::Block,
            ..Self::default()
        }
    }

    pub fn is_connected(&self) -> bool {
        self.sources.is_some()
    }
}

impl UnitGenerator for InputPort {
    fn rate(&self) -> Rate {
        self.rate
    }

    fn compute(&mut self, signals: &Signals<'_>) {
        match self.rate {
            Rate::Audio => {
                self.out.silence();
                for link in signals.sources(self) {
                    let signal = signals.signal(link.from);
                    for (i, out) in self.out.iter_mut().enumerate() {
                        *out += signal.at(i);
                    }
                }
            }
            Rate::Block => {
                self.value = signals
                    .sources(self)
                    .map(|link| signals.signal(link.from).value())
                    .sum();
            }
        }
    }

    fn output(&self, output: u16) -> Option<Signal<'_>> {
        (output == 0).then(|| match self.rate {
            Rate::Audio => Signal::Audio(&self.out),
            Rate::Block => Signal::Block(self.value),
        })
    }
}
