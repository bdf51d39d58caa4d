//! Bounded outbound audio queue (§4.4.6, §5). Default capacity 32; a
//! fill level at or above 80% raises a soft watermark flag consumers can
//! observe, and a full queue fails open by dropping the newest frame
//! rather than blocking the Receiver task.

use tokio::sync::mpsc;

pub const DEFAULT_CAPACITY: usize = 32;
const WATERMARK_RATIO: f64 = 0.8;

pub struct AudioQueue {
    tx: mpsc::Sender<Vec<u8>>,
    rx: mpsc::Receiver<Vec<u8>>,
    capacity: usize,
}

impl AudioQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self { tx, rx, capacity: capacity.max(1) }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }

    /// How many frames the queue can still accept before it's full.
    fn available(&self) -> usize {
        self.tx.capacity()
    }

    fn len(&self) -> usize {
        self.capacity - self.available()
    }

    /// True once the queue is at or above the 80% watermark.
    pub fn at_watermark(&self) -> bool {
        (self.len() as f64) >= (self.capacity as f64) * WATERMARK_RATIO
    }

    /// Push a frame. Fails open on a full queue: the frame is dropped and
    /// `false` is returned rather than blocking (§4.4.6, §5 "no task may
    /// block the event loop on a stalled peer").
    pub fn try_push(&self, frame: Vec<u8>) -> bool {
        self.tx.try_send(frame).is_ok()
    }

    pub fn sender(&self) -> mpsc::Sender<Vec<u8>> {
        self.tx.clone()
    }

    pub async fn pop(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Discard every queued chunk without yielding (§4.4.8 close step 4).
    pub fn drain(&mut self) {
        while self.rx.try_recv().is_ok() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_watermark() {
        let queue = AudioQueue::new(10);
        assert!(!queue.at_watermark());
        for _ in 0..8 {
            assert!(queue.try_push(vec![0u8; 4]));
        }
        assert!(queue.at_watermark());
    }

    #[test]
    fn full_queue_drops_newest_and_reports_failure() {
        let queue = AudioQueue::new(2);
        assert!(queue.try_push(vec![1]));
        assert!(queue.try_push(vec![2]));
        assert!(!queue.try_push(vec![3])); // dropped, fails open
    }

    #[tokio::test]
    async fn pop_returns_frames_in_fifo_order() {
        let mut queue = AudioQueue::new(4);
        queue.try_push(vec![1]);
        queue.try_push(vec![2]);
        assert_eq!(queue.pop().await, Some(vec![1]));
        assert_eq!(queue.pop().await, Some(vec![2]));
    }
}
