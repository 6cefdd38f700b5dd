//! Bounded lock-free MPMC ring
//!
//! Ticket-based bounded queue: every slot carries a sequence counter
//! that producers and consumers use to claim it without touching the
//! payload under contention. A producer claims ticket `p` when the slot
//! at `p & mask` holds sequence `p`, writes the payload, then publishes
//! with `p + 1`; a consumer claims the same slot when it reads `p + 1`
//! and releases it for the next lap with `p + N`.
//!
//! Ordering contract: sequence loads are `Acquire`, publication stores
//! are `Release`, the positional CAS is `Relaxed`. The acquire/release
//! pair on the slot sequence is what carries the payload from producer
//! to consumer; the position counters only distribute tickets.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Pad the position counters to a cache line each so producers and
/// consumers do not false-share.
#[repr(C, align(64))]
struct CacheAligned<T>(T);

struct Slot<T> {
    sequence: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

pub struct RingBuffer<T> {
    slots: Box<[Slot<T>]>,
    mask: usize,
    enqueue_pos: CacheAligned<AtomicUsize>,
    dequeue_pos: CacheAligned<AtomicUsize>,
}

unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T> RingBuffer<T> {
    /// Capacity is rounded up to the next power of two, with a floor of one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        let slots = (0..capacity)
            .map(|i| Slot {
                sequence: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();
        Self {
            slots,
            mask: capacity - 1,
            enqueue_pos: CacheAligned(AtomicUsize::new(0)),
            dequeue_pos: CacheAligned(AtomicUsize::new(0)),
        }
    }

    /// Non-blocking push. A full ring hands the value back to the caller.
    pub fn push(&self, value: T) -> Result<(), T> {
        let mut pos = self.enqueue_pos.0.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[pos & self.mask];
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = (seq as isize).wrapping_sub(pos as isize);
            if diff == 0 {
                match self.enqueue_pos.0.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: the CAS won this ticket, so no other
                        // thread touches this slot until the sequence
                        // store below publishes it.
                        unsafe { (*slot.value.get()).write(value) };
                        slot.sequence.store(pos.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    Err(actual) => pos = actual,
                }
            } else if diff < 0 {
                return Err(value);
            } else {
                pos = self.enqueue_pos.0.load(Ordering::Relaxed);
            }
        }
    }

    /// Non-blocking pop. `None` when the ring is observed empty.
    pub fn pop(&self) -> Option<T> {
        let mut pos = self.dequeue_pos.0.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[pos & self.mask];
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = (seq as isize).wrapping_sub(pos.wrapping_add(1) as isize);
            if diff == 0 {
                match self.dequeue_pos.0.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: the producer's Release store of `pos + 1`
                        // happens-before our Acquire load above, so the
                        // payload is fully written and exclusively ours.
                        let value = unsafe { (*slot.value.get()).assume_init_read() };
                        slot.sequence
                            .store(pos.wrapping_add(self.slots.len()), Ordering::Release);
                        return Some(value);
                    }
                    Err(actual) => pos = actual,
                }
            } else if diff < 0 {
                return None;
            } else {
                pos = self.dequeue_pos.0.load(Ordering::Relaxed);
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Approximate: both counters race against in-flight operations.
    pub fn is_empty(&self) -> bool {
        self.enqueue_pos.0.load(Ordering::Acquire) == self.dequeue_pos.0.load(Ordering::Acquire)
    }
}

impl<T> Drop for RingBuffer<T> {
    fn drop(&mut self) {
        // Drain so every payload still in flight is dropped exactly once.
        while self.pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;

    #[test]
    fn test_capacity_rounding() {
        assert_eq!(RingBuffer::<u32>::new(0).capacity(), 1);
        assert_eq!(RingBuffer::<u32>::new(1).capacity(), 1);
        assert_eq!(RingBuffer::<u32>::new(100).capacity(), 128);
        assert_eq!(RingBuffer::<u32>::new(1024).capacity(), 1024);
    }

    #[test]
    fn test_fifo_and_full() {
        let ring = RingBuffer::new(8);
        for i in 0..8 {
            assert!(ring.push(i).is_ok());
        }
        assert_eq!(ring.push(99), Err(99));
        for i in 0..8 {
            assert_eq!(ring.pop(), Some(i));
        }
        assert_eq!(ring.pop(), None);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_wraparound_reuse() {
        let ring = RingBuffer::new(4);
        for lap in 0..10 {
            for i in 0..4 {
                assert!(ring.push(lap * 4 + i).is_ok());
            }
            for i in 0..4 {
                assert_eq!(ring.pop(), Some(lap * 4 + i));
            }
        }
    }

    #[test]
    fn test_drop_runs_destructors_once() {
        struct Counted(Arc<AtomicU64>);
        impl Drop for Counted {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let drops = Arc::new(AtomicU64::new(0));
        {
            let ring = RingBuffer::new(8);
            for _ in 0..5 {
                assert!(ring.push(Counted(drops.clone())).is_ok());
            }
            drop(ring.pop());
            assert_eq!(drops.load(Ordering::Relaxed), 1);
        }
        // Remaining four dropped by the ring itself.
        assert_eq!(drops.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn test_mpmc_stress() {
        const PRODUCERS: usize = 4;
        const CONSUMERS: usize = 4;
        const PER_PRODUCER: u64 = 2000;

        let ring = Arc::new(RingBuffer::new(1024));
        let consumed = Arc::new(AtomicU64::new(0));
        let sum = Arc::new(AtomicU64::new(0));

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let ring = ring.clone();
                std::thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        let mut item = p as u64 * PER_PRODUCER + i;
                        loop {
                            match ring.push(item) {
                                Ok(()) => break,
                                Err(back) => {
                                    item = back;
                                    std::thread::yield_now();
                                }
                            }
                        }
                    }
                })
            })
            .collect();

        let total = PRODUCERS as u64 * PER_PRODUCER;
        let consumers: Vec<_> = (0..CONSUMERS)
            .map(|_| {
                let ring = ring.clone();
                let consumed = consumed.clone();
                let sum = sum.clone();
                std::thread::spawn(move || {
                    while consumed.load(Ordering::Relaxed) < total {
                        match ring.pop() {
                            Some(v) => {
                                sum.fetch_add(v, Ordering::Relaxed);
                                consumed.fetch_add(1, Ordering::Relaxed);
                            }
                            None => std::thread::yield_now(),
                        }
                    }
                })
            })
            .collect();

        for p in producers {
            p.join().unwrap();
        }
        for c in consumers {
            c.join().unwrap();
        }

        assert_eq!(consumed.load(Ordering::Relaxed), total);
        assert_eq!(sum.load(Ordering::Relaxed), total * (total - 1) / 2);
    }
}
