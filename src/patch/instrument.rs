use crate::error::PatchError;
use crate::id::{PortAddr, SignalRef};
use crate::message::{Message, MessageList};
use crate::patch::connection::ListHead;
use crate::ugen::{Rate, Ugen, UgenCell, UnitGenerator};

/// Highest output index an instrument can bind.
pub const MAX_OUTPUTS: usize = 64;

/// A live signal graph: ugens in creation order, the Input ports among
/// them, bound outputs, and the connections other instruments take from it.
///
/// Ugens may only read ugens created before them, so the graph inside an
/// instrument is acyclic by construction. Every table is reserved when the
/// instrument is built and never grows; a full instrument refuses new ugens.
#[derive(Debug)]
pub struct Instrument {
    id: u32,
    pub(crate) ugens: Vec<Option<UgenCell>>,
    limit: usize,
    inputs: Vec<u16>,
    outputs: Vec<Option<SignalRef>>,
    pub(crate) sinks: ListHead,
}

impl Instrument {
    /// An instrument holding at most `ugens` ugens.
    pub fn with_capacity(id: u32, ugens: usize) -> Self {
        let limit = ugens.min(usize::from(u16::MAX) + 1);
        Self {
            id,
            ugens: Vec::with_capacity(limit),
            limit,
            inputs: Vec::with_capacity(limit),
            outputs: Vec::with_capacity(MAX_OUTPUTS),
            sinks: None,
        }
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.ugens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ugens.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.limit
    }

    /// Append a ugen and return its index. Every signal it reads must
    /// already exist, and a block-rate ugen may only read block-rate
    /// signals.
    pub fn add_ugen(&mut self, ugen: Ugen) -> Result<u16, PatchError> {
        if self.ugens.len() >= self.limit {
            return Err(PatchError::TooManyUgens { instrument: self.id });
        }
        let index = self.ugens.len() as u16;
        for &input in ugen.inputs() {
            let rate = self.signal_rate(input)?;
            if ugen.rate() == Rate::Block && rate == Rate::Audio {
                return Err(PatchError::RateMismatch {
                    instrument: self.id,
                    ugen: input.ugen,
                    expected: Rate::Block,
                });
            }
        }
        if ugen.is_input() {
            self.inputs.push(index);
        }
        self.ugens.push(Some(UgenCell::new(ugen)));
        Ok(index)
    }

    pub fn ugen(&self, index: u16) -> Option<&Ugen> {
        self.cell(index).map(|c| &c.ugen)
    }

    pub fn ugen_mut(&mut self, index: u16) -> Option<&mut Ugen> {
        self.cell_mut(index).map(|c| &mut c.ugen)
    }

    pub(crate) fn cell(&self, index: u16) -> Option<&UgenCell> {
        self.ugens.get(index as usize)?.as_ref()
    }

    pub(crate) fn cell_mut(&mut self, index: u16) -> Option<&mut UgenCell> {
        self.ugens.get_mut(index as usize)?.as_mut()
    }

    /// Indices of the Input ports, in creation order.
    pub fn inputs(&self) -> &[u16] {
        &self.inputs
    }

    /// First Input port that still has something plugged into it.
    pub(crate) fn first_connected_input(&self) -> Option<PortAddr> {
        self.inputs
            .iter()
            .find(|&&input| self.ugen(input).and_then(Ugen::as_input).is_some_and(|p| p.is_connected()))
            .map(|&input| PortAddr::new(self.id, input))
    }

    pub fn check_signal(&self, signal: SignalRef) -> Result<(), PatchError> {
        self.signal_rate(signal).map(|_| ())
    }

    /// Rate of an existing signal.
    pub fn signal_rate(&self, signal: SignalRef) -> Result<Rate, PatchError> {
        let ugen = self.ugen(signal.ugen).ok_or(PatchError::NoSuchUgen {
            instrument: self.id,
            ugen: signal.ugen,
        })?;
        if signal.block as usize >= ugen.num_outputs() {
            return Err(PatchError::NoSuchOutput {
                instrument: self.id,
                ugen: signal.ugen,
                block: signal.block,
            });
        }
        Ok(ugen.rate())
    }

    /// Make output `index` of the instrument read `signal`, which must be
    /// audio rate.
    pub fn bind_output(&mut self, index: i32, signal: SignalRef) -> Result<(), PatchError> {
        let slot = usize::try_from(index)
            .ok()
            .filter(|&i| i < MAX_OUTPUTS)
            .ok_or(PatchError::BadOutputIndex { instrument: self.id, index })?;
        if self.signal_rate(signal)? != Rate::Audio {
            return Err(PatchError::RateMismatch {
                instrument: self.id,
                ugen: signal.ugen,
                expected: Rate::Audio,
            });
        }
        if self.outputs.len() <= slot {
            self.outputs.resize(slot + 1, None);
        }
        self.outputs[slot] = Some(signal);
        Ok(())
    }

    pub fn output(&self, index: u32) -> Option<SignalRef> {
        self.outputs.get(index as usize).copied().flatten()
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    /// Empty the instrument for reuse under another ID, keeping its table
    /// capacity.
    pub(crate) fn reset(&mut self, id: u32) {
        self.id = id;
        self.ugens.clear();
        self.inputs.clear();
        self.outputs.clear();
        self.sinks = None;
    }
}

/// The recorded messages that build an instrument. Instantiating replays
/// them, in order, against a fresh instrument.
#[derive(Debug, Default)]
pub struct Template {
    messages: MessageList,
}

impl Template {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, msg: Message) {
        self.messages.push_back(msg);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Take the oldest recorded message.
    pub(crate) fn take_first(&mut self) -> Option<Message> {
        self.messages.pop_front()
    }
}
