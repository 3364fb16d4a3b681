use std::cell::UnsafeCell;
use std::sync::atomic::{
    AtomicUsize,
    Ordering,
};

use {
    Error,
    Result,
};

struct Slot {
    len: usize,
    data: Vec<u8>,
}

/// A single-producer/single-consumer queue of raw frames.
///
/// The producer is typically a driver RX interrupt handler calling
/// `enqueue(...)`; the consumer is the poll loop calling `dequeue_with(...)`.
/// Head and tail advance monotonically and a full queue drops the incoming
/// frame (counted, never blocking, never corrupting).
///
/// The SPSC discipline is a contract: at most one thread may enqueue and at
/// most one may dequeue at any time. Slot contents are published with a
/// release store of `tail` and consumed after an acquire load, so the
/// consumer never observes a partially written frame.
pub struct FrameQueue {
    slots: Vec<UnsafeCell<Slot>>,
    head: AtomicUsize,
    tail: AtomicUsize,
    dropped: AtomicUsize,
}

unsafe impl Sync for FrameQueue {}

impl FrameQueue {
    /// Creates a queue of `slots` frames of at most `frame_len` bytes each.
    pub fn new(slots: usize, frame_len: usize) -> FrameQueue {
        FrameQueue {
            slots: (0 .. slots)
                .map(|_| {
                    UnsafeCell::new(Slot {
                        len: 0,
                        data: vec![0; frame_len],
                    })
                })
                .collect(),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
        }
    }

    /// Copies a frame into the queue. A full queue or an oversized frame
    /// drops the frame and bumps the drop counter.
    pub fn enqueue(&self, frame: &[u8]) -> Result<()> {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Relaxed);

        if tail.wrapping_sub(head) == self.slots.len() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(Error::Exhausted);
        }

        let slot = unsafe { &mut *self.slots[tail % self.slots.len()].get() };
        if frame.len() > slot.data.len() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(Error::Exhausted);
        }

        slot.data[.. frame.len()].copy_from_slice(frame);
        slot.len = frame.len();

        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Applies f to the oldest queued frame and releases its slot, or
    /// returns an error if the queue is empty.
    pub fn dequeue_with<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&[u8]) -> R,
    {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Relaxed);

        if head == tail {
            return Err(Error::Exhausted);
        }

        let slot = unsafe { &*self.slots[head % self.slots.len()].get() };
        let res = f(&slot.data[.. slot.len]);

        self.head.store(head.wrapping_add(1), Ordering::Release);
        Ok(res)
    }

    /// Returns the current number of queued frames.
    pub fn len(&self) -> usize {
        self.tail
            .load(Ordering::Acquire)
            .wrapping_sub(self.head.load(Ordering::Acquire))
    }

    /// Returns the total number of frames dropped on the floor so far.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dequeue_when_empty() {
        let queue = FrameQueue::new(2, 64);
        assert_matches!(queue.dequeue_with(|_| ()), Err(Error::Exhausted));
    }

    #[test]
    fn test_enqueue_when_full() {
        let queue = FrameQueue::new(2, 64);
        assert_matches!(queue.enqueue(&[1]), Ok(()));
        assert_matches!(queue.enqueue(&[2]), Ok(()));
        assert_matches!(queue.enqueue(&[3]), Err(Error::Exhausted));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 1);
    }

    #[test]
    fn test_enqueue_oversized() {
        let queue = FrameQueue::new(2, 4);
        assert_matches!(queue.enqueue(&[0; 5]), Err(Error::Exhausted));
        assert_eq!(queue.dropped(), 1);
    }

    #[test]
    fn test_fifo_order() {
        let queue = FrameQueue::new(2, 64);
        queue.enqueue(&[1, 2]).unwrap();
        queue.enqueue(&[3]).unwrap();
        assert_eq!(queue.dequeue_with(|frame| frame.to_vec()).unwrap(), vec![1, 2]);
        assert_eq!(queue.dequeue_with(|frame| frame.to_vec()).unwrap(), vec![3]);
        assert_matches!(queue.dequeue_with(|_| ()), Err(Error::Exhausted));
    }

    #[test]
    fn test_slot_reuse_wraps() {
        let queue = FrameQueue::new(2, 64);
        for i in 0 .. 10 {
            queue.enqueue(&[i]).unwrap();
            assert_eq!(queue.dequeue_with(|frame| frame[0]).unwrap(), i);
        }
        assert_eq!(queue.dropped(), 0);
    }
}
