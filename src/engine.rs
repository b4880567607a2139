//! The control side of the synthesizer.
//!
//! An [`Engine`] owns the inbound and outbound queues, the dispatch table
//! and the [`Rack`]. The audio thread drives it with [`Engine::poll`] at
//! every block boundary and pulls samples with [`Engine::request_output`].
//!
//! Control messages are executed one at a time. While a template is being
//! defined, every op that builds instrument contents is kept in the
//! template instead of executed; instantiating the template later replays
//! those messages against a fresh instrument.
//!
//! Outside of any definition, building ops and instrument ID 0 still refer
//! to the instrument most recently defined live, for as long as it exists.

use std::sync::Arc;

use dasp_graph::Buffer;
use tracing::{debug, trace, warn};

use crate::client::Client;
use crate::codec::Arg;
use crate::config::EngineConfig;
use crate::dispatch::{DispatchTable, Op};
use crate::error::{Error, PatchError, Result};
use crate::id::{PackedId, PortAddr, SignalAddr, SignalRef};
use crate::message::Message;
use crate::nodes::{Add, Constant, Mul, Sine};
use crate::patch::{InputPort, Instrument, Rack, Template};
use crate::pool::Pool;
use crate::queue::{self, Receiver, Sender};
use crate::ugen::{Rate, Ugen};

/// What control messages currently apply to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ControlState {
    #[default]
    Idle,
    /// Building ops are recorded into the template in this slot.
    RecordingTemplate(u32),
    /// Building ops are applied to the instrument in this slot.
    BuildingInstance(u32),
}

pub struct Engine {
    table: DispatchTable,
    rack: Rack,
    state: ControlState,
    pool: Arc<Pool>,
    inbound: Receiver,
    inbound_tx: Sender,
    outbound: Sender,
    held: Option<Message>,
    last_built: Option<u32>,
    block: u64,
}

impl Engine {
    /// Build an engine and the client that talks to it.
    pub fn new(config: EngineConfig) -> (Self, Client) {
        let pool = Arc::new(Pool::new(config.pool));
        let (inbound_tx, inbound) = queue::channel();
        let (outbound, replies) = queue::channel();
        let client = Client::new(inbound_tx.clone(), replies, Arc::clone(&pool));
        let engine = Self {
            table: DispatchTable::with_service(&config.service),
            rack: Rack::new(&config),
            state: ControlState::Idle,
            pool,
            inbound,
            inbound_tx,
            outbound,
            held: None,
            last_built: None,
            block: 0,
        };
        (engine, client)
    }

    #[inline]
    pub fn state(&self) -> ControlState {
        self.state
    }

    /// The instrument that building ops and instrument ID 0 refer to: the
    /// one being built, or when idle the last one defined live.
    pub fn current_instrument(&self) -> Option<u32> {
        match self.state {
            ControlState::BuildingInstance(id) => Some(id),
            ControlState::Idle => self
                .last_built
                .filter(|&id| self.rack.instrument(id).is_some()),
            ControlState::RecordingTemplate(_) => None,
        }
    }

    pub fn rack(&self) -> &Rack {
        &self.rack
    }

    pub fn rack_mut(&mut self) -> &mut Rack {
        &mut self.rack
    }

    pub fn dispatch_table(&self) -> &DispatchTable {
        &self.table
    }

    pub fn dispatch_table_mut(&mut self) -> &mut DispatchTable {
        &mut self.table
    }

    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    /// A producer handle onto the inbound queue.
    pub fn sender(&self) -> Sender {
        self.inbound_tx.clone()
    }

    pub fn enqueue(&self, msg: Message) {
        self.inbound_tx.enqueue(msg);
    }

    /// Timestamp of a message that was dequeued early and is waiting to
    /// become due.
    pub fn held_until(&self) -> Option<f64> {
        self.held.as_ref().map(Message::timestamp)
    }

    /// Number of the block being rendered.
    #[inline]
    pub fn block(&self) -> u64 {
        self.block
    }

    /// Execute at most one message whose timestamp is not after `now`.
    ///
    /// A message that is not yet due is held and returned to on every later
    /// poll; everything queued behind it waits too, even when already due.
    /// Returns whether a message was executed.
    pub fn poll(&mut self, now: f64) -> bool {
        let Some(msg) = self.held.take().or_else(|| self.inbound.dequeue()) else {
            return false;
        };
        if msg.timestamp() > now {
            debug!(due = msg.timestamp(), now, "holding message until due");
            self.held = Some(msg);
            return false;
        }
        self.execute(msg);
        true
    }

    /// Poll until nothing due is left. Returns how many messages ran.
    pub fn poll_all(&mut self, now: f64) -> usize {
        let mut executed = 0;
        while self.poll(now) {
            executed += 1;
        }
        executed
    }

    /// Run one message now, regardless of its timestamp. The message ends up
    /// recorded in a template or recycled onto the outbound queue.
    pub fn execute(&mut self, msg: Message) {
        let op = match self.route(&msg) {
            Ok(op) => op,
            Err(e) => {
                debug!(address = msg.address().unwrap_or("<undecodable>"), "dropped: {e}");
                self.recycle(msg);
                return;
            }
        };

        if let ControlState::RecordingTemplate(id) = self.state {
            if op.is_recordable() {
                if let Some(template) = self.rack.template_mut(id) {
                    trace!(?op, template = id, "recorded");
                    template.record(msg);
                    return;
                }
                warn!(template = id, "template being recorded has gone away");
                self.state = ControlState::Idle;
            }
        }

        trace!(?op, "dispatch");
        if let Err(e) = self.run(op, &msg) {
            report(op, &e);
        }
        self.recycle(msg);
    }

    fn route(&self, msg: &Message) -> Result<Op> {
        let decoded = msg.decode()?;
        Ok(self.table.resolve(decoded.address, decoded.types)?)
    }

    fn recycle(&self, mut msg: Message) {
        msg.recycle();
        self.outbound.enqueue(msg);
    }

    fn recycle_template(&self, mut template: Template) {
        while let Some(msg) = template.take_first() {
            self.recycle(msg);
        }
    }

    /// Empty slot `id`, recycling any template that was in it.
    fn clear_slot(&mut self, id: u32) {
        if self.last_built == Some(id) {
            self.last_built = None;
        }
        if let Some(template) = self.rack.delete(id) {
            self.recycle_template(template);
        }
    }

    fn run(&mut self, op: Op, msg: &Message) -> Result<()> {
        let mut args = msg.decode()?.args;
        match op {
            Op::Ping => {
                let reply_to = args.string()?;
                let value = args.int32()?;
                self.reply(reply_to, &[Arg::Int32(value)])
            }
            Op::Define => {
                let id = PackedId::from(args.int64()?).instrument();
                let live = args.bool()?;
                self.define(id, live)
            }
            Op::End => {
                trace!(from = ?self.state, "end");
                self.state = ControlState::Idle;
                Ok(())
            }
            Op::NewInstance => {
                let ids = PackedId::from(args.int64()?);
                self.instantiate(ids.instrument(), u32::from(ids.ugen()))
            }
            Op::Delete => self.delete(PackedId::from(args.int64()?).instrument()),
            Op::Output => {
                let index = args.int32()?;
                let signal = SignalRef::from(args.int32()?);
                self.current_mut()?.bind_output(index, signal)?;
                Ok(())
            }
            Op::Plug => {
                let from = self.signal_addr(PackedId::from(args.int64()?))?;
                let to = self.port_addr(PackedId::from(args.int64()?))?;
                self.rack.plug(from, to)?;
                Ok(())
            }
            Op::Unplug => {
                let from = self.signal_addr(PackedId::from(args.int64()?))?;
                let to = self.port_addr(PackedId::from(args.int64()?))?;
                self.rack.unplug(from, to)?;
                Ok(())
            }
            Op::Input => self.add_ugen(Ugen::Input(InputPort::new())),
            Op::BlockInput => self.add_ugen(Ugen::Input(InputPort::block())),
            Op::Mul => {
                let a = SignalRef::from(args.int32()?);
                let b = SignalRef::from(args.int32()?);
                let ugen = match self.operand_rate(a, b)? {
                    Rate::Audio => Mul::new(a, b),
                    Rate::Block => Mul::block(a, b),
                };
                self.add_ugen(Ugen::Mul(ugen))
            }
            Op::Add => {
                let a = SignalRef::from(args.int32()?);
                let b = SignalRef::from(args.int32()?);
                let ugen = match self.operand_rate(a, b)? {
                    Rate::Audio => Add::new(a, b),
                    Rate::Block => Add::block(a, b),
                };
                self.add_ugen(Ugen::Add(ugen))
            }
            Op::Constant => self.add_ugen(Ugen::Constant(Constant::new(args.float()?))),
            Op::BlockConstant => self.add_ugen(Ugen::Constant(Constant::block(args.float()?))),
            Op::Sine => {
                let hz = args.float()?;
                let amplitude = args.float()?;
                self.add_ugen(Ugen::Sine(Sine::new(hz).with_amplitude(amplitude)))
            }
            Op::SineMod => {
                let hz = SignalRef::from(args.int32()?);
                let amplitude = args.float()?;
                self.add_ugen(Ugen::Sine(Sine::modulated(hz).with_amplitude(amplitude)))
            }
        }
    }

    fn reply(&self, address: &str, args: &[Arg<'_>]) -> Result<()> {
        let msg = Message::encode(&self.pool, 0.0, address, args).ok_or(Error::PoolExhausted)?;
        self.outbound.enqueue(msg);
        Ok(())
    }

    fn check_slot(&self, id: u32) -> Result<()> {
        if id == 0 || id >= self.rack.capacity() {
            return Err(Error::SlotOutOfRange(id));
        }
        Ok(())
    }

    /// Start a template (`live == false`) or an instrument in slot `id`.
    pub fn define(&mut self, id: u32, live: bool) -> Result<()> {
        self.check_slot(id)?;
        self.clear_slot(id);
        self.state = if live {
            self.rack.define_instrument(id)?;
            self.last_built = Some(id);
            ControlState::BuildingInstance(id)
        } else {
            self.rack.define_template(id)?;
            ControlState::RecordingTemplate(id)
        };
        trace!(state = ?self.state, "define");
        Ok(())
    }

    /// Replay template `template` into a fresh instrument at `target`.
    pub fn instantiate(&mut self, template: u32, target: u32) -> Result<()> {
        self.check_slot(template)?;
        self.check_slot(target)?;
        let mut recorded = self
            .rack
            .take_template(template)
            .ok_or(Error::NotATemplate(template))?;
        self.clear_slot(target);

        let defined = self.rack.define_instrument(target).map(|_| ());
        if defined.is_ok() {
            let saved = core::mem::replace(&mut self.state, ControlState::BuildingInstance(target));
            // messages move to a second list as they replay, keeping order
            let mut replayed = Template::new();
            while let Some(msg) = recorded.take_first() {
                self.replay(&msg);
                replayed.record(msg);
            }
            recorded = replayed;
            self.state = saved;
            trace!(template, target, ops = recorded.len(), "instantiated");
        }

        // instantiating over the template itself consumes it
        if let Some(displaced) = self.rack.restore_template(template, recorded) {
            self.recycle_template(displaced);
        }
        Ok(defined?)
    }

    fn replay(&mut self, msg: &Message) {
        match self.route(msg) {
            Ok(op) if op.is_recordable() => {
                if let Err(e) = self.run(op, msg) {
                    report(op, &e);
                }
            }
            Ok(op) => debug!(?op, "not replayable"),
            Err(e) => debug!("dropped during replay: {e}"),
        }
    }

    /// Destroy whatever is in slot `id`.
    pub fn delete(&mut self, id: u32) -> Result<()> {
        self.check_slot(id)?;
        self.clear_slot(id);
        match self.state {
            ControlState::RecordingTemplate(current) | ControlState::BuildingInstance(current)
                if current == id =>
            {
                self.state = ControlState::Idle;
            }
            _ => {}
        }
        Ok(())
    }

    fn current_mut(&mut self) -> Result<&mut Instrument> {
        let id = self.current_instrument().ok_or(Error::NoCurrentInstrument)?;
        Ok(self
            .rack
            .instrument_mut(id)
            .ok_or(PatchError::NoSuchInstrument(id))?)
    }

    /// Block rate when both operands are, otherwise audio rate. Operands
    /// that do not exist are left for `add_ugen` to report.
    fn operand_rate(&mut self, a: SignalRef, b: SignalRef) -> Result<Rate> {
        let current = self.current_mut()?;
        let block = [a, b]
            .iter()
            .all(|&s| current.signal_rate(s) == Ok(Rate::Block));
        Ok(if block { Rate::Block } else { Rate::Audio })
    }

    fn add_ugen(&mut self, ugen: Ugen) -> Result<()> {
        self.current_mut()?.add_ugen(ugen)?;
        Ok(())
    }

    /// Instrument 0 names the current instrument.
    fn resolve_instrument(&self, id: u32) -> Result<u32> {
        match id {
            0 => self.current_instrument().ok_or(Error::NoCurrentInstrument),
            id => Ok(id),
        }
    }

    fn signal_addr(&self, id: PackedId) -> Result<SignalAddr> {
        let mut addr = id.signal();
        addr.instrument = self.resolve_instrument(addr.instrument)?;
        Ok(addr)
    }

    fn port_addr(&self, id: PackedId) -> Result<PortAddr> {
        let mut addr = id.port();
        addr.instrument = self.resolve_instrument(addr.instrument)?;
        Ok(addr)
    }

    /// Advance to the next block. Every ugen computes at most once between
    /// two calls.
    pub fn begin_block(&mut self) -> u64 {
        self.block += 1;
        self.block
    }

    /// Evaluate output `output` of `instrument` for the current block.
    pub fn request_output(&mut self, instrument: u32, output: u32) -> Option<&Buffer> {
        self.rack
            .render(instrument, output, self.block)
            .map_err(|e| debug!(instrument, output, "no output: {e}"))
            .ok()
    }

    /// Last computed contents of an output, without evaluating anything.
    pub fn output(&self, instrument: u32, output: u32) -> Option<&Buffer> {
        let signal = self.rack.instrument(instrument)?.output(output)?;
        self.rack.signal(signal.in_instrument(instrument))?.audio()
    }
}

fn report(op: Op, e: &Error) {
    match e {
        Error::Patch(_) | Error::SlotOutOfRange(_) | Error::PoolExhausted => {
            warn!(?op, "{e}")
        }
        _ => debug!(?op, "{e}"),
    }
}

impl core::fmt::Debug for Engine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.state)
            .field("block", &self.block)
            .field("held", &self.held_until())
            .field("routes", &self.table.len())
            .finish()
    }
}
