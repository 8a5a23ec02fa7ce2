//! Bounded single-producer/single-consumer byte queue
//!
//! Carries raw PTY output from the reader thread to the UI thread without
//! locks. Exactly one thread may call the producer operation ([`write`])
//! and exactly one the consumer operations ([`read`], [`peek`], [`skip`]);
//! the session wiring upholds that discipline.
//!
//! [`write`]: RingBuffer::write
//! [`read`]: RingBuffer::read
//! [`peek`]: RingBuffer::peek
//! [`skip`]: RingBuffer::skip

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Pads an atomic counter to its own cache line so the producer's head and
/// the consumer's tail never false-share.
#[repr(align(64))]
struct CachePadded<T>(T);

/// Fixed-capacity SPSC byte ring.
///
/// Capacity is rounded up to a power of two at construction; one slot is
/// reserved to distinguish full from empty, so `capacity() - 1` bytes are
/// usable. Head and tail are free-running counters reduced modulo the
/// capacity on access; the producer publishes the head with release
/// ordering after the copy and the consumer observes it with acquire
/// ordering, symmetrically for the tail.
pub struct RingBuffer {
    buf: Box<[UnsafeCell<u8>]>,
    mask: usize,
    /// Next write position, owned by the producer.
    head: CachePadded<AtomicUsize>,
    /// Next read position, owned by the consumer.
    tail: CachePadded<AtomicUsize>,
}

// The byte storage is only ever touched in the disjoint [tail, head) /
// [head, tail) windows guarded by the acquire/release pair.
unsafe impl Sync for RingBuffer {}
unsafe impl Send for RingBuffer {}

impl RingBuffer {
    /// Create a ring with at least `capacity` slots (rounded up to a power
    /// of two, minimum 2).
    pub fn new(capacity: usize) -> Self {
        let cap = capacity.max(2).next_power_of_two();
        let buf = (0..cap).map(|_| UnsafeCell::new(0)).collect();
        Self {
            buf,
            mask: cap - 1,
            head: CachePadded(AtomicUsize::new(0)),
            tail: CachePadded(AtomicUsize::new(0)),
        }
    }

    /// Rounded slot count. Usable capacity is one less.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes currently queued.
    pub fn len(&self) -> usize {
        let head = self.head.0.load(Ordering::Acquire);
        let tail = self.tail.0.load(Ordering::Acquire);
        head.wrapping_sub(tail)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes the producer could accept right now.
    pub fn available(&self) -> usize {
        self.capacity() - 1 - self.len()
    }

    /// Producer: append as much of `data` as fits, returning the accepted
    /// count. A short write is the backpressure signal; there is no error.
    pub fn write(&self, data: &[u8]) -> usize {
        let head = self.head.0.load(Ordering::Relaxed);
        let tail = self.tail.0.load(Ordering::Acquire);
        let free = self.capacity() - 1 - head.wrapping_sub(tail);
        let n = data.len().min(free);
        if n == 0 {
            return 0;
        }

        self.copy_in(head, &data[..n]);
        self.head.0.store(head.wrapping_add(n), Ordering::Release);
        n
    }

    /// Consumer: move up to `out.len()` bytes into `out`.
    pub fn read(&self, out: &mut [u8]) -> usize {
        let n = self.peek(out);
        if n > 0 {
            let tail = self.tail.0.load(Ordering::Relaxed);
            self.tail.0.store(tail.wrapping_add(n), Ordering::Release);
        }
        n
    }

    /// Consumer: copy up to `out.len()` bytes without consuming them.
    pub fn peek(&self, out: &mut [u8]) -> usize {
        let tail = self.tail.0.load(Ordering::Relaxed);
        let head = self.head.0.load(Ordering::Acquire);
        let n = out.len().min(head.wrapping_sub(tail));
        if n == 0 {
            return 0;
        }

        self.copy_out(tail, &mut out[..n]);
        n
    }

    /// Consumer: drop up to `n` queued bytes, returning the count dropped.
    pub fn skip(&self, n: usize) -> usize {
        let tail = self.tail.0.load(Ordering::Relaxed);
        let head = self.head.0.load(Ordering::Acquire);
        let n = n.min(head.wrapping_sub(tail));
        if n > 0 {
            self.tail.0.store(tail.wrapping_add(n), Ordering::Release);
        }
        n
    }

    /// Discard everything. Not safe while the other side is active.
    pub fn clear(&self) {
        let head = self.head.0.load(Ordering::Acquire);
        self.tail.0.store(head, Ordering::Release);
    }

    fn copy_in(&self, head: usize, data: &[u8]) {
        let start = head & self.mask;
        let first = data.len().min(self.capacity() - start);
        let base = self.buf.as_ptr() as *mut u8;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), base.add(start), first);
            std::ptr::copy_nonoverlapping(
                data.as_ptr().add(first),
                base,
                data.len() - first,
            );
        }
    }

    fn copy_out(&self, tail: usize, out: &mut [u8]) {
        let start = tail & self.mask;
        let first = out.len().min(self.capacity() - start);
        let base = self.buf.as_ptr() as *const u8;
        unsafe {
            std::ptr::copy_nonoverlapping(base.add(start), out.as_mut_ptr(), first);
            std::ptr::copy_nonoverlapping(
                base,
                out.as_mut_ptr().add(first),
                out.len() - first,
            );
        }
    }
}
