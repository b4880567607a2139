//! The patch graph: instrument slots, the connections between them, and
//! pull-based block evaluation.
//!
//! Evaluation is demand driven. Asking for a ugen's block `n` first brings
//! every ugen it reads up to block `n`, then computes it once and stamps it
//! with `n`; asking again in the same block is free. A ugen is taken out of
//! its slot while it computes, so anything that reaches it again through a
//! cycle reads silence instead of recursing.

mod connection;
mod input;
mod instrument;

pub use connection::{ConnectionId, Edge, SinkLink, SourceLink};
pub use input::InputPort;
pub use instrument::{Instrument, Template, MAX_OUTPUTS};

use dasp_graph::Buffer;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Visitable};
use tracing::warn;

use crate::config::EngineConfig;
use crate::error::PatchError;
use crate::id::{PortAddr, SignalAddr, SignalRef, UgenAddr};
use crate::ugen::{Rate, Signal, Signals, Ugen, UnitGenerator};
use connection::{Connections, ListHead, Side};

/// Instrument-level view of the connections. Node `n` stands for slot `n`,
/// and each edge weight counts the connections joining that pair.
pub type Topology = DiGraph<u32, usize>;

type TopologyDfs = Dfs<NodeIndex, <Topology as Visitable>::Map>;

/// What an instrument slot holds.
#[derive(Debug)]
pub enum Slot {
    Instrument(Instrument),
    Template(Template),
}

/// Every instrument slot plus the connections linking them.
///
/// Everything a control message can touch is reserved up front from the
/// [`EngineConfig`]: spare instruments, the connection arena, the
/// topology and the search stack used to refuse cycles. Past those limits
/// operations fail instead of allocating.
#[derive(Debug)]
pub struct Rack {
    slots: Vec<Option<Slot>>,
    connections: Connections,
    topology: Topology,
    search: TopologyDfs,
    spares: Vec<Instrument>,
    spare_limit: usize,
    ugen_capacity: usize,
    sample_rate: u32,
    reject_cycles: bool,
}

impl Rack {
    pub fn new(config: &EngineConfig) -> Self {
        let slots = config.max_instruments as usize;
        let spares = (0..config.spare_instruments)
            .map(|_| Instrument::with_capacity(0, config.ugen_capacity))
            .collect();
        let mut topology = Topology::with_capacity(slots, config.connection_capacity);
        for id in 0..config.max_instruments {
            topology.add_node(id);
        }
        // a search pushes each edge at most once
        let search = Dfs::from_parts(
            Vec::with_capacity(config.connection_capacity + 1),
            topology.visit_map(),
        );
        Self {
            slots: (0..slots).map(|_| None).collect(),
            connections: Connections::with_capacity(config.connection_capacity),
            topology,
            search,
            spares,
            spare_limit: config.spare_instruments,
            ugen_capacity: config.ugen_capacity,
            sample_rate: config.sample_rate,
            reject_cycles: config.reject_cycles,
        }
    }

    /// Number of slots, slot 0 included.
    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn slot(&self, id: u32) -> Option<&Slot> {
        self.slots.get(id as usize)?.as_ref()
    }

    pub fn instrument(&self, id: u32) -> Option<&Instrument> {
        match self.slot(id)? {
            Slot::Instrument(i) => Some(i),
            Slot::Template(_) => None,
        }
    }

    pub fn instrument_mut(&mut self, id: u32) -> Option<&mut Instrument> {
        instrument_in(&mut self.slots, id)
    }

    pub fn template(&self, id: u32) -> Option<&Template> {
        match self.slot(id)? {
            Slot::Template(t) => Some(t),
            Slot::Instrument(_) => None,
        }
    }

    pub fn template_mut(&mut self, id: u32) -> Option<&mut Template> {
        match self.slots.get_mut(id as usize)?.as_mut()? {
            Slot::Template(t) => Some(t),
            Slot::Instrument(_) => None,
        }
    }

    /// IDs of the slots holding live instruments.
    pub fn instruments(&self) -> impl Iterator<Item = u32> + '_ {
        self.slots.iter().enumerate().filter_map(|(id, slot)| match slot {
            Some(Slot::Instrument(_)) => Some(id as u32),
            _ => None,
        })
    }

    /// Put a fresh instrument in slot `id`, deleting whatever was there.
    pub fn define_instrument(&mut self, id: u32) -> Result<&mut Instrument, PatchError> {
        self.vacate(id)?;
        let instrument = match self.spares.pop() {
            Some(mut spare) => {
                spare.reset(id);
                spare
            }
            None => {
                warn!(instrument = id, "no spare instruments left, allocating one");
                Instrument::with_capacity(id, self.ugen_capacity)
            }
        };
        let slot = &mut self.slots[id as usize];
        match slot.insert(Slot::Instrument(instrument)) {
            Slot::Instrument(i) => Ok(i),
            Slot::Template(_) => Err(PatchError::NoSuchInstrument(id)),
        }
    }

    /// Put an empty template in slot `id`, deleting whatever was there.
    pub fn define_template(&mut self, id: u32) -> Result<&mut Template, PatchError> {
        self.vacate(id)?;
        let slot = &mut self.slots[id as usize];
        match slot.insert(Slot::Template(Template::new())) {
            Slot::Template(t) => Ok(t),
            Slot::Instrument(_) => Err(PatchError::NoSuchInstrument(id)),
        }
    }

    fn vacate(&mut self, id: u32) -> Result<(), PatchError> {
        if id as usize >= self.slots.len() {
            return Err(PatchError::NoSuchInstrument(id));
        }
        // a displaced template's messages go back to the pool from here
        drop(self.delete(id));
        Ok(())
    }

    /// Remove a template from its slot, for replay.
    pub(crate) fn take_template(&mut self, id: u32) -> Option<Template> {
        let slot = self.slots.get_mut(id as usize)?;
        match slot.take()? {
            Slot::Template(t) => Some(t),
            other => {
                *slot = Some(other);
                None
            }
        }
    }

    /// Return a template taken with [`take_template`](Self::take_template).
    /// Gives it back if the slot was filled in the meantime.
    pub(crate) fn restore_template(&mut self, id: u32, template: Template) -> Option<Template> {
        match self.slots.get_mut(id as usize) {
            Some(slot) if slot.is_none() => {
                *slot = Some(Slot::Template(template));
                None
            }
            _ => Some(template),
        }
    }

    /// Destroy slot `id`. An instrument first has every connection into its
    /// Input ports removed, then every connection out of it, and only then
    /// are its ugens released; nothing is left pointing at it. A template is
    /// handed back so its messages can be recycled.
    pub fn delete(&mut self, id: u32) -> Option<Template> {
        if matches!(self.slot(id)?, Slot::Template(_)) {
            return self.take_template(id);
        }

        while let Some(port) = self.instrument(id).and_then(Instrument::first_connected_input) {
            let Some(first) = self.port(port).ok().and_then(|p| p.sources) else {
                break;
            };
            if !self.unplug_input(port, first) {
                break;
            }
        }
        while let Some(first) = self.instrument(id).and_then(|i| i.sinks) {
            if !self.unplug_sink(id, first) {
                break;
            }
        }

        if let Some(Slot::Instrument(mut instrument)) = self.slots[id as usize].take() {
            instrument.reset(0);
            if self.spares.len() < self.spare_limit {
                self.spares.push(instrument);
            }
        }
        None
    }

    pub fn port(&self, addr: PortAddr) -> Result<&InputPort, PatchError> {
        let instrument = self
            .instrument(addr.instrument)
            .ok_or(PatchError::NoSuchInstrument(addr.instrument))?;
        instrument
            .ugen(addr.input)
            .ok_or(PatchError::NoSuchUgen { instrument: addr.instrument, ugen: addr.input })?
            .as_input()
            .ok_or(PatchError::NotAnInput { instrument: addr.instrument, ugen: addr.input })
    }

    /// Connect a signal to an Input port. Both halves of the connection are
    /// recorded before this returns.
    pub fn plug(&mut self, from: SignalAddr, to: PortAddr) -> Result<ConnectionId, PatchError> {
        let rate = self
            .instrument(from.instrument)
            .ok_or(PatchError::NoSuchInstrument(from.instrument))?
            .signal_rate(SignalRef::new(from.ugen, from.block))?;
        if self.port(to)?.rate() == Rate::Block && rate == Rate::Audio {
            return Err(PatchError::RateMismatch {
                instrument: from.instrument,
                ugen: from.ugen,
                expected: Rate::Block,
            });
        }
        if self.reject_cycles && self.would_cycle(from.instrument, to.instrument) {
            return Err(PatchError::WouldCycle {
                from: from.instrument,
                to: to.instrument,
            });
        }

        let id = self
            .connections
            .insert(Edge { from, to })
            .ok_or(PatchError::TooManyConnections)?;
        let Self { slots, connections, .. } = self;
        if let Some(head) = port_head(slots, to) {
            connections.link(head, id, Side::Source);
        }
        if let Some(head) = sink_head(slots, from.instrument) {
            connections.link(head, id, Side::Sink);
        }
        self.count_link(from.instrument, to.instrument);
        Ok(id)
    }

    /// Remove the connection from `from` into the port at `to`.
    pub fn unplug(&mut self, from: SignalAddr, to: PortAddr) -> Result<(), PatchError> {
        let head = self.port(to)?.sources;
        let id = self
            .connections
            .list(head, Side::Source)
            .find_map(|(id, edge)| (edge.from == from).then_some(id))
            .ok_or(PatchError::NotConnected {
                instrument: to.instrument,
                input: to.input,
            })?;
        self.unplug_input(to, id);
        Ok(())
    }

    /// Remove connection `id` starting from the port it feeds. Returns
    /// whether the port held it; a missing opposite half is only logged.
    pub fn unplug_input(&mut self, to: PortAddr, id: ConnectionId) -> bool {
        let Self { slots, connections, .. } = self;
        let unlinked = port_head(slots, to).is_some_and(|head| connections.unlink(head, id, Side::Source));
        if !unlinked {
            warn!(?id, ?to, "input port does not hold connection");
            return false;
        }
        self.release(id, Side::Sink);
        true
    }

    /// Remove connection `id` starting from the instrument it leaves.
    /// Returns whether the instrument held it; a missing opposite half is
    /// only logged.
    pub fn unplug_sink(&mut self, instrument: u32, id: ConnectionId) -> bool {
        let Self { slots, connections, .. } = self;
        let unlinked =
            sink_head(slots, instrument).is_some_and(|head| connections.unlink(head, id, Side::Sink));
        if !unlinked {
            warn!(?id, instrument, "instrument does not hold sink");
            return false;
        }
        self.release(id, Side::Source);
        true
    }

    /// Take connection `id` off the `remaining` list and free it.
    fn release(&mut self, id: ConnectionId, remaining: Side) {
        let Some(edge) = self.connections.get(id).copied() else {
            warn!(?id, "connection missing from arena");
            return;
        };
        let Self { slots, connections, .. } = self;
        let found = match remaining {
            Side::Sink => sink_head(slots, edge.from.instrument)
                .is_some_and(|head| connections.unlink(head, id, Side::Sink)),
            Side::Source => {
                port_head(slots, edge.to).is_some_and(|head| connections.unlink(head, id, Side::Source))
            }
        };
        if !found {
            match remaining {
                Side::Sink => warn!(?id, from = ?edge.from, "source instrument has no sink for connection"),
                Side::Source => warn!(?id, to = ?edge.to, "input port has no source for connection"),
            }
        }
        self.connections.remove(id);
        self.uncount_link(edge.from.instrument, edge.to.instrument);
    }

    fn count_link(&mut self, from: u32, to: u32) {
        let (a, b) = (node(from), node(to));
        match self.topology.find_edge(a, b) {
            Some(edge) => self.topology[edge] += 1,
            None => {
                self.topology.add_edge(a, b, 1);
            }
        }
    }

    fn uncount_link(&mut self, from: u32, to: u32) {
        let Some(edge) = self.topology.find_edge(node(from), node(to)) else {
            return;
        };
        self.topology[edge] -= 1;
        if self.topology[edge] == 0 {
            self.topology.remove_edge(edge);
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Number of connections from instrument `from` into instrument `to`.
    pub fn links_between(&self, from: u32, to: u32) -> usize {
        self.topology
            .find_edge(node(from), node(to))
            .map_or(0, |edge| self.topology[edge])
    }

    fn would_cycle(&mut self, from: u32, to: u32) -> bool {
        if from == to {
            return true;
        }
        let target = node(from);
        self.search.reset(&self.topology);
        self.search.move_to(node(to));
        while let Some(reached) = self.search.next(&self.topology) {
            if reached == target {
                return true;
            }
        }
        false
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Edge> {
        self.connections.get(id)
    }

    pub fn connections(&self) -> impl Iterator<Item = (ConnectionId, &Edge)> + '_ {
        self.connections.iter()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Connections still available before plugging fails.
    pub fn connections_left(&self) -> usize {
        self.connections.capacity() - self.connections.len()
    }

    /// Everything plugged into the port at `addr`.
    pub fn sources(&self, addr: PortAddr) -> Result<impl Iterator<Item = SourceLink> + '_, PatchError> {
        Ok(self.sources_of(self.port(addr)?))
    }

    pub(crate) fn sources_of(&self, port: &InputPort) -> impl Iterator<Item = SourceLink> + '_ {
        self.connections
            .list(port.sources, Side::Source)
            .map(|(id, edge)| SourceLink { id, from: edge.from })
    }

    /// Every port instrument `id` feeds.
    pub fn sinks(&self, id: u32) -> impl Iterator<Item = SinkLink> + '_ {
        let head = self.instrument(id).and_then(|i| i.sinks);
        self.connections
            .list(head, Side::Sink)
            .map(|(id, edge)| SinkLink { id, to: edge.to })
    }

    /// Connections recorded on Input ports.
    pub fn source_link_count(&self) -> usize {
        self.instruments()
            .filter_map(|id| self.instrument(id))
            .flat_map(|i| i.inputs().iter().filter_map(move |&u| i.ugen(u)?.as_input()))
            .map(|port| self.sources_of(port).count())
            .sum()
    }

    /// Connections recorded on source instruments.
    pub fn sink_link_count(&self) -> usize {
        self.instruments().map(|id| self.sinks(id).count()).sum()
    }

    /// Bring ugen `addr` up to block `block`.
    pub fn evaluate(&mut self, addr: UgenAddr, block: u64) {
        let Some(slot) = self
            .instrument_mut(addr.instrument)
            .and_then(|i| i.ugens.get_mut(addr.ugen as usize))
        else {
            return;
        };
        // an empty slot is a ugen already being computed further up
        let mut cell = match slot.take() {
            Some(cell) if cell.stamp == Some(block) => {
                *slot = Some(cell);
                return;
            }
            Some(cell) => cell,
            None => return,
        };

        match &cell.ugen {
            Ugen::Input(port) => {
                let mut cursor = port.sources;
                while let Some(id) = cursor {
                    let Some(edge) = self.connections.get(id).copied() else {
                        break;
                    };
                    cursor = self.connections.next(id, Side::Source);
                    self.evaluate(edge.from.ugen_addr(), block);
                }
            }
            ugen => {
                for input in ugen.inputs() {
                    let dep = UgenAddr {
                        instrument: addr.instrument,
                        ugen: input.ugen,
                    };
                    self.evaluate(dep, block);
                }
            }
        }

        cell.stamp = Some(block);
        cell.ugen.compute(&Signals::new(self, addr.instrument));

        if let Some(slot) = self
            .instrument_mut(addr.instrument)
            .and_then(|i| i.ugens.get_mut(addr.ugen as usize))
        {
            *slot = Some(cell);
        }
    }

    /// Current value of a signal, as of the last evaluation. `None` for
    /// signals that do not exist or are being computed.
    pub fn signal(&self, addr: SignalAddr) -> Option<Signal<'_>> {
        self.instrument(addr.instrument)?
            .cell(addr.ugen)?
            .ugen
            .output(addr.block)
    }

    /// Evaluate output `index` of instrument `id` for `block` and return it.
    pub fn render(&mut self, id: u32, index: u32, block: u64) -> Result<&Buffer, PatchError> {
        let signal = self
            .instrument(id)
            .ok_or(PatchError::NoSuchInstrument(id))?
            .output(index)
            .ok_or(PatchError::UnboundOutput { instrument: id, index })?
            .in_instrument(id);
        self.evaluate(signal.ugen_addr(), block);
        match self.signal(signal) {
            Some(Signal::Audio(rendered)) => Ok(rendered),
            Some(Signal::Block(_)) => Err(PatchError::RateMismatch {
                instrument: id,
                ugen: signal.ugen,
                expected: Rate::Audio,
            }),
            None => Err(PatchError::NoSuchOutput {
                instrument: id,
                ugen: signal.ugen,
                block: signal.block,
            }),
        }
    }
}

#[inline]
fn node(id: u32) -> NodeIndex {
    NodeIndex::new(id as usize)
}

fn instrument_in(slots: &mut [Option<Slot>], id: u32) -> Option<&mut Instrument> {
    match slots.get_mut(id as usize)?.as_mut()? {
        Slot::Instrument(i) => Some(i),
        Slot::Template(_) => None,
    }
}

fn port_head(slots: &mut [Option<Slot>], addr: PortAddr) -> Option<&mut ListHead> {
    let port = instrument_in(slots, addr.instrument)?.ugen_mut(addr.input)?.as_input_mut()?;
    Some(&mut port.sources)
}

fn sink_head(slots: &mut [Option<Slot>], id: u32) -> Option<&mut ListHead> {
    Some(&mut instrument_in(slots, id)?.sinks)
}
