//! Bounded FIFO of encoded frames awaiting delivery

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Outbound frame queue shared by senders and the drain task
///
/// `push` never blocks: a full queue rejects the newest frame.
#[derive(Debug)]
pub struct SendQueue {
    items: Mutex<VecDeque<Bytes>>,
    capacity: usize,
}

impl SendQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    /// Enqueue at the back; returns false if the queue is full
    pub fn push(&self, frame: Bytes) -> bool {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            return false;
        }
        items.push_back(frame);
        true
    }

    /// Put an undelivered frame back at the head, ahead of newer frames
    pub fn push_front(&self, frame: Bytes) {
        self.items.lock().push_front(frame);
    }

    pub fn pop(&self) -> Option<Bytes> {
        self.items.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflow_drops_newest() {
        let queue = SendQueue::new(1000);
        let accepted = (0..1001u32)
            .filter(|i| queue.push(Bytes::from(i.to_le_bytes().to_vec())))
            .count();

        assert_eq!(accepted, 1000);
        assert_eq!(queue.len(), 1000);
        assert_eq!(queue.pop(), Some(Bytes::from(0u32.to_le_bytes().to_vec())));
    }

    #[test]
    fn test_retry_goes_first() {
        let queue = SendQueue::new(2);
        assert!(queue.push(Bytes::from_static(b"a")));
        assert!(queue.push(Bytes::from_static(b"b")));

        let head = queue.pop().unwrap();
        queue.push_front(head);
        assert_eq!(queue.pop(), Some(Bytes::from_static(b"a")));
        assert_eq!(queue.pop(), Some(Bytes::from_static(b"b")));
        assert!(queue.is_empty());
    }
}
