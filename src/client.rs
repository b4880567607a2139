//! The messaging-layer side of an engine's queues.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::warn;

use crate::codec::{self, Arg};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::pool::Pool;
use crate::queue::{Receiver, Sender};

/// Spare messages kept for reuse before extras are dropped.
const SPARE_LIMIT: usize = 64;

/// Sends control messages to an [`Engine`](crate::Engine) and receives its
/// replies.
///
/// Messages the engine is done with come back with an empty payload. The
/// client keeps them and rewrites them in place for later sends, so a
/// steady control stream stops allocating once warmed up. Any message it
/// cannot reuse is freed here, on the producer thread.
///
/// ```
/// use patchbay::{Arg, Engine, EngineConfig};
///
/// let (mut engine, mut client) = Engine::new(EngineConfig::default());
/// client.send(0.0, "/syn/ping", &[Arg::Str("/reply"), Arg::Int32(42)]).unwrap();
/// engine.poll(0.0);
///
/// let reply = client.receive().unwrap();
/// let mut decoded = reply.decode().unwrap();
/// assert_eq!(decoded.address, "/reply");
/// assert_eq!(decoded.args.int32(), Ok(42));
/// ```
pub struct Client {
    inbound: Sender,
    outbound: Receiver,
    pool: Arc<Pool>,
    spares: Vec<Message>,
    replies: VecDeque<Message>,
}

impl Client {
    pub(crate) fn new(inbound: Sender, outbound: Receiver, pool: Arc<Pool>) -> Self {
        Self {
            inbound,
            outbound,
            pool,
            spares: Vec::with_capacity(SPARE_LIMIT),
            replies: VecDeque::new(),
        }
    }

    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    /// Another producer handle for the engine's inbound queue, for use from
    /// other threads.
    pub fn sender(&self) -> Sender {
        self.inbound.clone()
    }

    /// Encode and enqueue a message to be executed no earlier than
    /// `timestamp`.
    pub fn send(&mut self, timestamp: f64, address: &str, args: &[Arg<'_>]) -> Result<()> {
        self.collect();
        let msg = self.message(timestamp, address, args)?;
        self.inbound.enqueue(msg);
        Ok(())
    }

    /// Enqueue an already encoded message.
    pub fn enqueue(&self, msg: Message) {
        self.inbound.enqueue(msg);
    }

    /// Build a message, reusing a spare if one is big enough.
    pub fn message(&mut self, timestamp: f64, address: &str, args: &[Arg<'_>]) -> Result<Message> {
        let needed = codec::encoded_len(address, args);
        if let Some(i) = self.spares.iter().position(|m| m.capacity() >= needed) {
            let mut msg = self.spares.swap_remove(i);
            if msg.rewrite(timestamp, address, args) {
                return Ok(msg);
            }
        }
        Message::encode(&self.pool, timestamp, address, args).ok_or_else(|| {
            warn!(address, needed, "message pool exhausted");
            Error::PoolExhausted
        })
    }

    /// Next reply from the engine. Recycled messages are kept as spares
    /// and skipped.
    pub fn receive(&mut self) -> Option<Message> {
        self.collect();
        self.replies.pop_front()
    }

    /// Drain the outbound queue: recycled messages become spares, replies
    /// wait for [`receive`](Self::receive).
    fn collect(&mut self) {
        while let Some(msg) = self.outbound.dequeue() {
            if msg.is_recycled() {
                self.keep(msg);
            } else {
                self.replies.push_back(msg);
            }
        }
    }

    fn keep(&mut self, msg: Message) {
        if self.spares.len() < SPARE_LIMIT {
            self.spares.push(msg);
        }
    }

    pub fn spare_count(&self) -> usize {
        self.spares.len()
    }
}
