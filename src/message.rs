//! Pool-backed control messages.
//!
//! A [`Message`] is a single pool block: a small header (queue link, owning
//! pool, timestamp, lengths) followed by the encoded payload. The header's
//! link field lets the [`queue`](crate::queue) chain messages without any
//! node allocation of its own.

use core::fmt;
use core::mem::ManuallyDrop;
use core::ptr::{self, NonNull};
use std::sync::Arc;

use crate::codec::{self, Arg, Decoded};
use crate::error::DecodeError;
use crate::pool::Pool;

#[repr(C)]
pub(crate) struct Header {
    pub(crate) next: *mut Header,
    pool: *const Pool,
    timestamp: f64,
    len: u32,
    capacity: u32,
}

const HEADER_BYTES: usize = core::mem::size_of::<Header>();

/// An owned, encoded control message.
///
/// Dropping a message returns its block to the pool it was allocated from.
pub struct Message {
    header: NonNull<Header>,
}

// SAFETY: a message exclusively owns its block; the pool it points back to is
// `Sync` and kept alive by the reference count held in the header.
unsafe impl Send for Message {}

impl Message {
    /// Allocate an empty message able to hold `capacity` payload bytes.
    pub fn with_capacity(pool: &Arc<Pool>, capacity: usize) -> Option<Self> {
        let capacity_u32 = u32::try_from(capacity).ok()?;
        let block = pool.allocate(HEADER_BYTES + capacity)?;
        let header = block.cast::<Header>();
        // SAFETY: the block is at least HEADER_BYTES long and 8-byte aligned.
        unsafe {
            header.as_ptr().write(Header {
                next: ptr::null_mut(),
                pool: Arc::into_raw(Arc::clone(pool)),
                timestamp: 0.0,
                len: 0,
                capacity: capacity_u32,
            });
        }
        Some(Self { header })
    }

    /// Allocate and encode a message in one step.
    pub fn encode(pool: &Arc<Pool>, timestamp: f64, address: &str, args: &[Arg<'_>]) -> Option<Self> {
        let mut msg = Self::with_capacity(pool, codec::encoded_len(address, args))?;
        msg.rewrite(timestamp, address, args).then_some(msg)
    }

    /// Re-encode this message in place. Returns `false` (leaving the message
    /// untouched) if the new payload does not fit.
    pub fn rewrite(&mut self, timestamp: f64, address: &str, args: &[Arg<'_>]) -> bool {
        let needed = codec::encoded_len(address, args);
        if needed > self.capacity() {
            return false;
        }
        let written = codec::encode_into(&mut self.buffer_mut()[..needed], address, args);
        debug_assert_eq!(written, needed);
        let header = self.header_mut();
        header.timestamp = timestamp;
        header.len = needed as u32;
        true
    }

    /// Copy this message into a fresh block from the same pool.
    pub fn duplicate(&self) -> Option<Self> {
        let mut copy = Self::with_capacity(&self.pool(), self.len())?;
        copy.buffer_mut()[..self.len()].copy_from_slice(self.payload());
        let header = copy.header_mut();
        header.timestamp = self.timestamp();
        header.len = self.len() as u32;
        Some(copy)
    }

    pub fn timestamp(&self) -> f64 {
        self.header().timestamp
    }

    pub fn set_timestamp(&mut self, timestamp: f64) {
        self.header_mut().timestamp = timestamp;
    }

    /// Encoded payload length in bytes.
    pub fn len(&self) -> usize {
        self.header().len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Payload bytes this message can hold without reallocation.
    pub fn capacity(&self) -> usize {
        self.header().capacity as usize
    }

    pub fn payload(&self) -> &[u8] {
        // SAFETY: `len` bytes after the header are initialized payload.
        unsafe { core::slice::from_raw_parts(self.data_ptr(), self.len()) }
    }

    pub fn decode(&self) -> Result<Decoded<'_>, DecodeError> {
        codec::decode(self.payload())
    }

    /// Address of the message, if its payload decodes.
    pub fn address(&self) -> Option<&str> {
        self.decode().ok().map(|d| d.address)
    }

    /// Drop the payload but keep the block, marking the message as returned
    /// for reuse rather than as a reply.
    pub fn recycle(&mut self) {
        let header = self.header_mut();
        header.len = 0;
        header.timestamp = 0.0;
    }

    /// A recycled message carries no payload.
    pub fn is_recycled(&self) -> bool {
        self.is_empty()
    }

    pub(crate) fn into_raw(self) -> NonNull<Header> {
        let header = self.header;
        core::mem::forget(self);
        header
    }

    /// # Safety
    /// `header` must come from [`Message::into_raw`] and not be used again.
    pub(crate) unsafe fn from_raw(header: NonNull<Header>) -> Self {
        Self { header }
    }

    fn pool(&self) -> ManuallyDrop<Arc<Pool>> {
        // SAFETY: the header holds a counted reference to a live pool; the
        // ManuallyDrop keeps us from giving that reference away.
        ManuallyDrop::new(unsafe { Arc::from_raw(self.header().pool) })
    }

    fn header(&self) -> &Header {
        // SAFETY: the header is valid for the lifetime of the message.
        unsafe { self.header.as_ref() }
    }

    fn header_mut(&mut self) -> &mut Header {
        // SAFETY: we own the block exclusively.
        unsafe { self.header.as_mut() }
    }

    fn data_ptr(&self) -> *mut u8 {
        // SAFETY: the payload area follows the header inside the same block.
        unsafe { (self.header.as_ptr() as *mut u8).add(HEADER_BYTES) }
    }

    fn buffer_mut(&mut self) -> &mut [u8] {
        // SAFETY: `capacity` bytes follow the header and we own them.
        unsafe { core::slice::from_raw_parts_mut(self.data_ptr(), self.capacity()) }
    }
}

impl Drop for Message {
    fn drop(&mut self) {
        // SAFETY: the header's pool pointer came from `Arc::into_raw` and this
        // is the only place that gives the reference back.
        let pool = unsafe { Arc::from_raw(self.header().pool) };
        unsafe { pool.release(self.header.cast::<u8>()) };
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Message");
        s.field("timestamp", &self.timestamp());
        match self.decode() {
            Ok(d) => s.field("address", &d.address).field("types", &d.types),
            Err(_) if self.is_recycled() => s.field("recycled", &true),
            Err(e) => s.field("undecodable", &e),
        };
        s.field("len", &self.len()).finish()
    }
}

/// Owned messages chained through their header links, first in first out.
///
/// A message outside any queue has no use for its link, so holding any
/// number of messages here costs nothing beyond the messages themselves.
pub struct MessageList {
    head: *mut Header,
    tail: *mut Header,
    len: usize,
}

// SAFETY: the list exclusively owns every message linked into it.
unsafe impl Send for MessageList {}

impl MessageList {
    pub const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            tail: ptr::null_mut(),
            len: 0,
        }
    }

    pub fn push_back(&mut self, msg: Message) {
        let node = msg.into_raw().as_ptr();
        // SAFETY: `node` was just released by its owner, and `tail` is a live
        // message owned by this list whenever it is non-null.
        unsafe {
            (*node).next = ptr::null_mut();
            if self.tail.is_null() {
                self.head = node;
            } else {
                (*self.tail).next = node;
            }
        }
        self.tail = node;
        self.len += 1;
    }

    pub fn pop_front(&mut self) -> Option<Message> {
        let head = NonNull::new(self.head)?;
        // SAFETY: `head` is owned by this list; unlinking hands it back.
        unsafe {
            self.head = (*head.as_ptr()).next;
            (*head.as_ptr()).next = ptr::null_mut();
            if self.head.is_null() {
                self.tail = ptr::null_mut();
            }
            self.len -= 1;
            Some(Message::from_raw(head))
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for MessageList {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MessageList {
    fn drop(&mut self) {
        while self.pop_front().is_some() {}
    }
}

impl fmt::Debug for MessageList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageList").field("len", &self.len).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_inspect() {
        let pool = Arc::new(Pool::default());
        let msg = Message::encode(&pool, 1.5, "/syn/ping", &[Arg::Str("/r"), Arg::Int32(7)]).unwrap();
        assert_eq!(msg.timestamp(), 1.5);
        assert_eq!(msg.address(), Some("/syn/ping"));
        assert_eq!(msg.decode().unwrap().types, "si");
        assert!(!msg.is_recycled());
    }

    #[test]
    fn dropping_returns_block_to_pool() {
        let pool = Arc::new(Pool::default());
        let msg = Message::encode(&pool, 0.0, "/a", &[Arg::Int64(1)]).unwrap();
        assert!(pool.stats().in_use > 0);
        drop(msg);
        assert_eq!(pool.stats().in_use, 0);
        assert_eq!(Arc::strong_count(&pool), 1);
    }

    #[test]
    fn rewrite_respects_capacity() {
        let pool = Arc::new(Pool::default());
        let mut msg = Message::encode(&pool, 0.0, "/short", &[]).unwrap();
        assert!(!msg.rewrite(0.0, "/a/much/longer/address", &[Arg::Int64(3)]));
        assert_eq!(msg.address(), Some("/short"));
        msg.recycle();
        assert!(msg.is_recycled());
        assert!(msg.rewrite(2.0, "/tiny", &[]));
        assert_eq!(msg.address(), Some("/tiny"));
        assert_eq!(msg.timestamp(), 2.0);
    }

    #[test]
    fn duplicate_is_independent() {
        let pool = Arc::new(Pool::default());
        let msg = Message::encode(&pool, 3.0, "/x", &[Arg::Bool(true)]).unwrap();
        let mut copy = msg.duplicate().unwrap();
        copy.recycle();
        assert_eq!(msg.address(), Some("/x"));
        assert!(copy.is_recycled());
        assert_eq!(Arc::strong_count(&pool), 3);
    }

    #[test]
    fn list_keeps_insertion_order_and_frees_on_drop() {
        let pool = Arc::new(Pool::default());
        let mut list = MessageList::new();
        for n in 0..3 {
            list.push_back(Message::encode(&pool, f64::from(n), "/n", &[Arg::Int32(n)]).unwrap());
        }
        assert_eq!(list.len(), 3);

        let first = list.pop_front().unwrap();
        assert_eq!(first.timestamp(), 0.0);
        list.push_back(first);
        let order: Vec<f64> = core::iter::from_fn(|| list.pop_front())
            .map(|m| {
                let t = m.timestamp();
                drop(m);
                t
            })
            .collect();
        assert_eq!(order, [1.0, 2.0, 0.0]);
        assert!(list.is_empty());

        list.push_back(Message::encode(&pool, 0.0, "/left", &[]).unwrap());
        drop(list);
        assert_eq!(pool.stats().in_use, 0);
    }
}
