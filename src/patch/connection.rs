//! Connection arena.
//!
//! A plug is stored once, as an [`Edge`] in the arena, and is threaded onto
//! two lists at once: the target Input port's source list and the source
//! instrument's sink list. Both lists are linked through the arena entries
//! themselves, and the arena never grows past the capacity it was built
//! with, so plugging and unplugging never allocate.

use crate::id::{PortAddr, SignalAddr};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u32);

impl ConnectionId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Edge {
    pub from: SignalAddr,
    pub to: PortAddr,
}

/// Input-side half of a connection: where the port reads from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceLink {
    pub id: ConnectionId,
    pub from: SignalAddr,
}

/// Instrument-side half of a connection: which port reads from us.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SinkLink {
    pub id: ConnectionId,
    pub to: PortAddr,
}

/// Which of the two lists an entry is threaded on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Side {
    /// A port's list of the signals feeding it.
    Source = 0,
    /// An instrument's list of the ports it feeds.
    Sink = 1,
}

/// Head of a list threaded through the arena.
pub(crate) type ListHead = Option<ConnectionId>;

#[derive(Debug)]
struct Entry {
    edge: Edge,
    next: [ListHead; 2],
}

#[derive(Debug, Default)]
pub(crate) struct Connections {
    entries: Vec<Option<Entry>>,
    free: Vec<u32>,
    live: usize,
    capacity: usize,
}

impl Connections {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            free: Vec::with_capacity(capacity),
            live: 0,
            capacity,
        }
    }

    /// Store `edge`, or `None` when the arena is full.
    pub(crate) fn insert(&mut self, edge: Edge) -> Option<ConnectionId> {
        let entry = Entry { edge, next: [None; 2] };
        let id = match self.free.pop() {
            Some(index) => {
                self.entries[index as usize] = Some(entry);
                ConnectionId(index)
            }
            None if self.entries.len() < self.capacity => {
                self.entries.push(Some(entry));
                ConnectionId((self.entries.len() - 1) as u32)
            }
            None => return None,
        };
        self.live += 1;
        Some(id)
    }

    /// Free `id`. The caller unthreads it from both lists first.
    pub(crate) fn remove(&mut self, id: ConnectionId) -> Option<Edge> {
        let entry = self.entries.get_mut(id.index())?.take()?;
        self.live -= 1;
        self.free.push(id.0);
        Some(entry.edge)
    }

    pub(crate) fn get(&self, id: ConnectionId) -> Option<&Edge> {
        self.entry(id).map(|e| &e.edge)
    }

    fn entry(&self, id: ConnectionId) -> Option<&Entry> {
        self.entries.get(id.index())?.as_ref()
    }

    pub(crate) fn next(&self, id: ConnectionId, side: Side) -> ListHead {
        self.entry(id)?.next[side as usize]
    }

    fn set_next(&mut self, id: ConnectionId, side: Side, next: ListHead) {
        if let Some(Some(entry)) = self.entries.get_mut(id.index()) {
            entry.next[side as usize] = next;
        }
    }

    /// Put `id` at the front of the list starting at `head`.
    pub(crate) fn link(&mut self, head: &mut ListHead, id: ConnectionId, side: Side) {
        self.set_next(id, side, *head);
        *head = Some(id);
    }

    /// Take `id` out of the list starting at `head`. Returns whether it was
    /// there.
    pub(crate) fn unlink(&mut self, head: &mut ListHead, id: ConnectionId, side: Side) -> bool {
        let mut previous = None;
        let mut cursor = *head;
        while let Some(current) = cursor {
            let next = self.next(current, side);
            if current == id {
                match previous {
                    None => *head = next,
                    Some(p) => self.set_next(p, side, next),
                }
                self.set_next(id, side, None);
                return true;
            }
            previous = Some(current);
            cursor = next;
        }
        false
    }

    /// Walk the list starting at `head`.
    pub(crate) fn list(
        &self,
        head: ListHead,
        side: Side,
    ) -> impl Iterator<Item = (ConnectionId, &Edge)> + '_ {
        let mut cursor = head;
        core::iter::from_fn(move || {
            let id = cursor?;
            let entry = self.entry(id)?;
            cursor = entry.next[side as usize];
            Some((id, &entry.edge))
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.live
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (ConnectionId, &Edge)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|e| (ConnectionId(i as u32), &e.edge)))
    }
}
