//! Lock-free multi-producer, single-consumer message queue.
//!
//! Producers push onto a shared atomic stack (`incoming`). The consumer owns
//! a private `pending` list: when it runs dry, the consumer swaps the whole
//! `incoming` stack out in one atomic operation and reverses it, which puts
//! each producer's messages back into the order that producer sent them.
//!
//! Messages are linked through their own header, so enqueueing never
//! allocates. Ordering is per producer only; messages from different
//! producers may interleave in any way.

use core::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use crate::message::{Header, Message};

struct Shared {
    incoming: AtomicPtr<Header>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        drain(*self.incoming.get_mut());
    }
}

/// Create a connected queue pair.
pub fn channel() -> (Sender, Receiver) {
    let shared = Arc::new(Shared {
        incoming: AtomicPtr::new(ptr::null_mut()),
    });
    (
        Sender {
            shared: Arc::clone(&shared),
        },
        Receiver {
            shared,
            pending: ptr::null_mut(),
        },
    )
}

/// Producer side. Clone it freely; every clone feeds the same receiver.
#[derive(Clone)]
pub struct Sender {
    shared: Arc<Shared>,
}

impl Sender {
    /// Push a message. Never blocks and never allocates.
    pub fn enqueue(&self, msg: Message) {
        let node = msg.into_raw().as_ptr();
        let mut head = self.shared.incoming.load(Ordering::Relaxed);
        loop {
            // SAFETY: we own `node` until the CAS publishes it.
            unsafe { (*node).next = head };
            match self.shared.incoming.compare_exchange_weak(
                head,
                node,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(current) => head = current,
            }
        }
    }
}

/// Consumer side. There is exactly one per queue.
pub struct Receiver {
    shared: Arc<Shared>,
    pending: *mut Header,
}

// SAFETY: `pending` is only touched through `&mut self`, and the messages it
// links are owned by the receiver.
unsafe impl Send for Receiver {}

impl Receiver {
    /// Take the next message, or `None` if nothing is queued.
    pub fn dequeue(&mut self) -> Option<Message> {
        if self.pending.is_null() {
            let batch = self.shared.incoming.swap(ptr::null_mut(), Ordering::Acquire);
            if batch.is_null() {
                return None;
            }
            self.pending = reverse(batch);
        }
        let head = self.pending;
        // SAFETY: `head` is a live message taken off the shared stack.
        unsafe {
            self.pending = (*head).next;
            (*head).next = ptr::null_mut();
            Some(Message::from_raw(NonNull::new_unchecked(head)))
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_null() && self.shared.incoming.load(Ordering::Acquire).is_null()
    }

    /// Iterate over everything currently queued, taking ownership.
    pub fn drain(&mut self) -> impl Iterator<Item = Message> + '_ {
        core::iter::from_fn(move || self.dequeue())
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        drain(self.pending);
        self.pending = ptr::null_mut();
    }
}

fn reverse(mut list: *mut Header) -> *mut Header {
    let mut reversed = ptr::null_mut();
    while !list.is_null() {
        // SAFETY: every node in the batch is exclusively ours after the swap.
        unsafe {
            let next = (*list).next;
            (*list).next = reversed;
            reversed = list;
            list = next;
        }
    }
    reversed
}

fn drain(mut list: *mut Header) {
    while let Some(node) = NonNull::new(list) {
        // SAFETY: the list is owned by the dropping side.
        unsafe {
            list = (*node.as_ptr()).next;
            drop(Message::from_raw(node));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Arg;
    use crate::pool::Pool;
    use std::collections::HashSet;

    fn numbered(pool: &Arc<Pool>, producer: i32, seq: i32) -> Message {
        Message::encode(pool, 0.0, "/n", &[Arg::Int32(producer), Arg::Int32(seq)]).unwrap()
    }

    fn read(msg: &Message) -> (i32, i32) {
        let mut d = msg.decode().unwrap();
        (d.args.int32().unwrap(), d.args.int32().unwrap())
    }

    #[test]
    fn empty_queue_dequeues_nothing() {
        let (_tx, mut rx) = channel();
        assert!(rx.is_empty());
        assert!(rx.dequeue().is_none());
    }

    #[test]
    fn single_producer_order_survives_interleaved_dequeues() {
        let pool = Arc::new(Pool::default());
        let (tx, mut rx) = channel();
        let mut next = 0;
        let mut expected = 0;
        for burst in [1, 3, 0, 5, 2, 7] {
            for _ in 0..burst {
                tx.enqueue(numbered(&pool, 0, next));
                next += 1;
            }
            // take only part of what is queued before producing more
            for _ in 0..2 {
                if let Some(m) = rx.dequeue() {
                    assert_eq!(read(&m).1, expected);
                    expected += 1;
                }
            }
        }
        for m in rx.drain() {
            assert_eq!(read(&m).1, expected);
            expected += 1;
        }
        assert_eq!(expected, next);
        assert!(rx.is_empty());
    }

    #[test]
    fn many_producers_lose_nothing_and_keep_their_order() {
        const PRODUCERS: i32 = 4;
        const PER_PRODUCER: i32 = 2_000;
        let pool = Arc::new(Pool::default());
        let (tx, mut rx) = channel();

        let handles: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let tx = tx.clone();
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    for seq in 0..PER_PRODUCER {
                        tx.enqueue(numbered(&pool, p, seq));
                    }
                })
            })
            .collect();

        let mut last = vec![-1; PRODUCERS as usize];
        let mut seen = HashSet::new();
        let mut received = 0;
        while received < PRODUCERS * PER_PRODUCER {
            if let Some(m) = rx.dequeue() {
                let (p, seq) = read(&m);
                assert!(seq > last[p as usize], "producer {p} reordered");
                last[p as usize] = seq;
                assert!(seen.insert((p, seq)), "duplicate {p}/{seq}");
                received += 1;
            } else {
                std::thread::yield_now();
            }
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!(rx.dequeue().is_none());
    }

    #[test]
    fn dropping_queue_frees_messages() {
        let pool = Arc::new(Pool::default());
        {
            let (tx, mut rx) = channel();
            for i in 0..10 {
                tx.enqueue(numbered(&pool, 0, i));
            }
            // split between pending and incoming
            let _first = rx.dequeue();
            tx.enqueue(numbered(&pool, 0, 10));
        }
        assert_eq!(pool.stats().in_use, 0);
    }
}
