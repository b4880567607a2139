//! Segregated free-list allocator for real-time threads.
//!
//! Memory is carved out of large chunks and handed out in canonical size
//! classes. Released blocks go onto a per-class free list and are reused by
//! the next allocation of the same class; nothing is returned to the system
//! until the [`Pool`] itself is dropped.
//!
//! Two banks of free lists cover the size range:
//! - a linear bank with one class every 8 bytes, up to [`MAX_LINEAR_BYTES`]
//! - an exponential bank with power-of-two classes, up to [`MAX_BLOCK_BYTES`]
//!
//! Every block starts with an 8-byte prefix holding its canonical size, so
//! [`Pool::release`] needs nothing but the pointer. Debug builds also keep a
//! guard word at the end of each block and check it on release.
//!
//! Free-list push and pop are single compare-and-swap loops. The chunk bump
//! path takes a spin lock; it is only reached when the class list is empty.

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use tracing::{error, warn};

const ALIGN: usize = 8;
const SIZE_PREFIX: usize = 8;
const CHUNK_ALIGN: usize = 16;

const LOG2_MAX_LINEAR_BYTES: u32 = 12;
const LOG2_MAX_BLOCK_BYTES: u32 = 22;

/// Largest canonical size served by the linear bank.
pub const MAX_LINEAR_BYTES: usize = 1 << LOG2_MAX_LINEAR_BYTES;
/// Largest canonical size the pool can hand out at all.
pub const MAX_BLOCK_BYTES: usize = 1 << LOG2_MAX_BLOCK_BYTES;

const LINEAR_CLASSES: usize = MAX_LINEAR_BYTES / ALIGN + 1;
const EXPONENTIAL_CLASSES: usize = LOG2_MAX_BLOCK_BYTES as usize + 1;

#[cfg(debug_assertions)]
const GUARD_BYTES: usize = 8;
#[cfg(not(debug_assertions))]
const GUARD_BYTES: usize = 0;

#[cfg(debug_assertions)]
const GUARD: u64 = 0xBADC_AFE8_DEAD_BEEF;

// Free-list heads pack a 48-bit address with a 16-bit generation tag so a
// block popped and pushed back between a load and a CAS is not mistaken for
// an unchanged head.
const ADDR_BITS: u32 = 48;
const ADDR_MASK: u64 = (1 << ADDR_BITS) - 1;

#[inline]
fn align_up(n: usize) -> usize {
    (n + (ALIGN - 1)) & !(ALIGN - 1)
}

/// Canonical block size for a request of `size` usable bytes, or `None` if
/// the request is larger than any class.
pub fn canonical_size(size: usize) -> Option<usize> {
    // a free block stores its list link in the first usable word
    let usable = align_up(size.max(ALIGN));
    let real = usable.checked_add(SIZE_PREFIX + GUARD_BYTES)?;
    if real <= MAX_LINEAR_BYTES {
        Some(real)
    } else {
        let pow = real.checked_next_power_of_two()?;
        (pow <= MAX_BLOCK_BYTES).then_some(pow)
    }
}

/// Sizing and growth policy for a [`Pool`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    /// Bytes requested from the system each time the current chunk runs out.
    pub chunk_size: usize,
    /// Bytes reserved up front when the pool is created.
    pub initial_capacity: usize,
    /// Whether the pool may request more chunks after the initial one.
    pub growable: bool,
}

impl PoolConfig {
    pub fn with_chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes;
        self
    }

    pub fn with_initial_capacity(mut self, bytes: usize) -> Self {
        self.initial_capacity = bytes;
        self
    }

    pub fn with_growth(mut self, growable: bool) -> Self {
        self.growable = growable;
        self
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1 << 16,
            initial_capacity: 1 << 20,
            growable: true,
        }
    }
}

/// Snapshot of pool usage counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Canonical bytes currently handed out.
    pub in_use: usize,
    /// Bytes obtained from the system so far.
    pub reserved: usize,
    /// Number of chunks obtained from the system so far.
    pub chunks: usize,
}

struct FreeList {
    head: AtomicU64,
}

impl FreeList {
    fn new() -> Self {
        Self { head: AtomicU64::new(0) }
    }

    /// # Safety
    /// `block` must be the base of a pool block that nobody else references.
    unsafe fn push(&self, block: NonNull<u8>) {
        let addr = block.as_ptr() as u64;
        debug_assert!(addr & !ADDR_MASK == 0, "block address exceeds 48 bits");
        // SAFETY: every block has at least one usable word after its prefix.
        let link = unsafe { link_of(block.as_ptr() as usize) };
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            link.store((head & ADDR_MASK) as usize, Ordering::Relaxed);
            let tag = (head >> ADDR_BITS).wrapping_add(1);
            let new = (tag << ADDR_BITS) | addr;
            match self
                .head
                .compare_exchange_weak(head, new, Ordering::Release, Ordering::Acquire)
            {
                Ok(_) => return,
                Err(current) => head = current,
            }
        }
    }

    fn pop(&self) -> Option<NonNull<u8>> {
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            let addr = (head & ADDR_MASK) as usize;
            if addr == 0 {
                return None;
            }
            // SAFETY: pool memory is never unmapped while the pool lives, so
            // the link word is readable even if another thread already popped
            // this block; the tagged CAS below rejects the stale value.
            let next = unsafe { link_of(addr) }.load(Ordering::Relaxed) as u64;
            let tag = (head >> ADDR_BITS).wrapping_add(1);
            let new = (tag << ADDR_BITS) | (next & ADDR_MASK);
            match self
                .head
                .compare_exchange_weak(head, new, Ordering::Acquire, Ordering::Acquire)
            {
                Ok(_) => return NonNull::new(addr as *mut u8),
                Err(current) => head = current,
            }
        }
    }
}

/// # Safety
/// `base` must point at a live pool block.
#[inline]
unsafe fn link_of<'a>(base: usize) -> &'a AtomicUsize {
    unsafe { &*((base + SIZE_PREFIX) as *const AtomicUsize) }
}

struct Chunks {
    cursor: usize,
    remaining: usize,
    owned: Vec<(NonNull<u8>, Layout)>,
}

// SAFETY: the raw chunk pointers are only dereferenced through the pool's own
// bookkeeping, and access to `Chunks` is serialized by the spin lock.
unsafe impl Send for Chunks {}

/// A thread-safe segregated free-list allocator.
///
/// Share it behind an `Arc`; any thread may allocate and release.
pub struct Pool {
    linear: [FreeList; LINEAR_CLASSES],
    exponential: [FreeList; EXPONENTIAL_CLASSES],
    chunks: spin::Mutex<Chunks>,
    chunk_size: usize,
    growable: AtomicBool,
    in_use: AtomicUsize,
    reserved: AtomicUsize,
}

impl Pool {
    /// Create a pool and reserve its initial chunk.
    pub fn new(config: PoolConfig) -> Self {
        let pool = Self {
            linear: std::array::from_fn(|_| FreeList::new()),
            exponential: std::array::from_fn(|_| FreeList::new()),
            chunks: spin::Mutex::new(Chunks {
                cursor: 0,
                remaining: 0,
                owned: Vec::new(),
            }),
            chunk_size: config.chunk_size.max(MAX_LINEAR_BYTES),
            growable: AtomicBool::new(config.growable),
            in_use: AtomicUsize::new(0),
            reserved: AtomicUsize::new(0),
        };
        if config.initial_capacity > 0 {
            let mut chunks = pool.chunks.lock();
            if !pool.refill(&mut chunks, config.initial_capacity) {
                warn!(bytes = config.initial_capacity, "could not reserve initial pool chunk");
            }
        }
        pool
    }

    /// Deny any further system allocation. After this, `allocate` only serves
    /// from free lists and the remainder of the current chunk.
    pub fn freeze(&self) {
        self.growable.store(false, Ordering::Release);
    }

    pub fn is_growable(&self) -> bool {
        self.growable.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            in_use: self.in_use.load(Ordering::Relaxed),
            reserved: self.reserved.load(Ordering::Relaxed),
            chunks: self.chunks.lock().owned.len(),
        }
    }

    /// Allocate at least `size` usable bytes, 8-byte aligned.
    ///
    /// Returns `None` when the request exceeds the largest class or the pool
    /// cannot grow.
    pub fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        let canonical = canonical_size(size)?;
        let list = self.list_for(canonical)?;
        let block = match list.pop() {
            Some(block) => block,
            None => self.bump(canonical)?,
        };
        // SAFETY: `block` is a pool block of `canonical` bytes owned by us now.
        unsafe {
            (block.as_ptr() as *mut u64).write(canonical as u64);
            #[cfg(debug_assertions)]
            (block.as_ptr().add(canonical - GUARD_BYTES) as *mut u64).write_unaligned(GUARD);
        }
        self.in_use.fetch_add(canonical, Ordering::Relaxed);
        // SAFETY: the usable region starts right after the size prefix.
        Some(unsafe { NonNull::new_unchecked(block.as_ptr().add(SIZE_PREFIX)) })
    }

    /// Return a block to its class free list.
    ///
    /// # Safety
    /// `ptr` must have come from [`Pool::allocate`] on this pool and must not
    /// be used afterwards.
    pub unsafe fn release(&self, ptr: NonNull<u8>) {
        // SAFETY: caller guarantees `ptr` came from `allocate`.
        let base = unsafe { NonNull::new_unchecked(ptr.as_ptr().sub(SIZE_PREFIX)) };
        let canonical = unsafe { (base.as_ptr() as *const u64).read() } as usize;
        let Some(list) = self.list_for(canonical) else {
            error!(?ptr, canonical, "release of block with corrupt size prefix");
            return;
        };
        #[cfg(debug_assertions)]
        if !unsafe { guard_intact(base, canonical) } {
            error!(?ptr, canonical, "block was overwritten past its usable size");
        }
        self.in_use.fetch_sub(canonical, Ordering::Relaxed);
        unsafe { list.push(base) };
    }

    /// Usable bytes of a block returned by [`Pool::allocate`].
    ///
    /// # Safety
    /// `ptr` must be a live block from this pool.
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        let canonical = unsafe { (ptr.as_ptr().sub(SIZE_PREFIX) as *const u64).read() } as usize;
        canonical - SIZE_PREFIX - GUARD_BYTES
    }

    fn list_for(&self, canonical: usize) -> Option<&FreeList> {
        if canonical <= MAX_LINEAR_BYTES {
            if canonical % ALIGN != 0 || canonical < SIZE_PREFIX + ALIGN {
                return None;
            }
            self.linear.get(canonical / ALIGN)
        } else {
            if !canonical.is_power_of_two() {
                return None;
            }
            self.exponential.get(canonical.trailing_zeros() as usize)
        }
    }

    fn bump(&self, canonical: usize) -> Option<NonNull<u8>> {
        let mut chunks = self.chunks.lock();
        if chunks.remaining < canonical {
            if !self.is_growable() {
                warn!(canonical, "pool exhausted and growth is disabled");
                return None;
            }
            // whatever is left of the old chunk is abandoned
            if !self.refill(&mut chunks, canonical.max(self.chunk_size)) {
                return None;
            }
        }
        let block = chunks.cursor;
        chunks.cursor += canonical;
        chunks.remaining -= canonical;
        NonNull::new(block as *mut u8)
    }

    fn refill(&self, chunks: &mut Chunks, size: usize) -> bool {
        let Ok(layout) = Layout::from_size_align(size, CHUNK_ALIGN) else {
            return false;
        };
        // SAFETY: layout has non-zero size.
        let Some(base) = NonNull::new(unsafe { alloc::alloc(layout) }) else {
            warn!(size, "system allocation for pool chunk failed");
            return false;
        };
        chunks.owned.push((base, layout));
        chunks.cursor = base.as_ptr() as usize;
        chunks.remaining = size;
        self.reserved.fetch_add(size, Ordering::Relaxed);
        true
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        for (base, layout) in self.chunks.get_mut().owned.drain(..) {
            // SAFETY: each chunk was allocated with exactly this layout.
            unsafe { alloc::dealloc(base.as_ptr(), layout) };
        }
    }
}

/// Whether the guard word at the end of a block still holds its pattern.
///
/// # Safety
/// `base` must be the start of a pool block of `canonical` bytes.
#[cfg(debug_assertions)]
unsafe fn guard_intact(base: NonNull<u8>, canonical: usize) -> bool {
    let guard = unsafe { (base.as_ptr().add(canonical - GUARD_BYTES) as *const u64).read_unaligned() };
    guard == GUARD
}
