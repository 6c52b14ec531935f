// rust/wds-core/src/pipeline/channel.rs

use std::fmt;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};

/// A message on a stage channel: either data or the end of a producer's
/// stream.
///
/// Consumers match on the variant instead of looking for reserved keys or
/// checking a separate flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope<T> {
    Item(T),
    End,
}

impl<T> Envelope<T> {
    pub fn is_end(&self) -> bool {
        matches!(self, Self::End)
    }

    pub fn into_item(self) -> Option<T> {
        match self {
            Self::Item(item) => Some(item),
            Self::End => None,
        }
    }
}

/// Fixed-capacity multi-producer multi-consumer queue.
///
/// Handles are cheap to clone and all clones share one queue. The queue
/// never holds more than `capacity` items; blocking operations wait on the
/// channel itself rather than polling. Items pushed by one producer are
/// popped in the order they were pushed; racing producers are not ordered
/// relative to each other.
pub struct BoundedChannel<T> {
    sender: Sender<T>,
    receiver: Receiver<T>,
    capacity: usize,
}

impl<T> BoundedChannel<T> {
    /// Creates a channel holding at most `capacity` items (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = channel::bounded(capacity);
        Self {
            sender,
            receiver,
            capacity,
        }
    }

    // Every handle owns both ends, so the channel can never disconnect and
    // the operations below only fail on full/empty/timeout.

    /// Pushes an item, blocking while the channel is full.
    pub fn push(&self, item: T) -> Result<(), T> {
        self.sender.send(item).map_err(|e| e.into_inner())
    }

    /// Pushes an item if there is room; hands it back otherwise.
    pub fn try_push(&self, item: T) -> Result<(), T> {
        self.sender.try_send(item).map_err(|e| e.into_inner())
    }

    /// Pushes an item, waiting at most `timeout` for room.
    pub fn push_timeout(&self, item: T, timeout: Duration) -> Result<(), T> {
        self.sender
            .send_timeout(item, timeout)
            .map_err(|e| e.into_inner())
    }

    /// Pops an item, blocking while the channel is empty.
    pub fn pop(&self) -> Option<T> {
        self.receiver.recv().ok()
    }

    pub fn try_pop(&self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// Pops an item, waiting at most `timeout` for one to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        self.receiver.recv_timeout(timeout).ok()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.receiver.is_full()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> Clone for BoundedChannel<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
            capacity: self.capacity,
        }
    }
}

impl<T> fmt::Debug for BoundedChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedChannel")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_capacity_is_enforced() {
        let channel = BoundedChannel::new(3);
        for i in 0..3 {
            assert!(channel.try_push(i).is_ok());
        }
        assert!(channel.is_full());
        assert_eq!(channel.try_push(99), Err(99));
        assert_eq!(channel.len(), 3);

        assert_eq!(channel.try_pop(), Some(0));
        assert!(channel.try_push(3).is_ok());
        assert_eq!(channel.len(), 3);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let channel = BoundedChannel::new(0);
        assert_eq!(channel.capacity(), 1);
        assert!(channel.try_push("x").is_ok());
        assert!(channel.try_push("y").is_err());
    }

    #[test]
    fn test_fifo_for_single_producer() {
        let channel = BoundedChannel::new(8);
        for i in 0..8 {
            channel.push(i).unwrap();
        }
        let popped: Vec<i32> = (0..8).map(|_| channel.pop().unwrap()).collect();
        assert_eq!(popped, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_try_pop_empty() {
        let channel: BoundedChannel<u8> = BoundedChannel::new(1);
        assert!(channel.is_empty());
        assert_eq!(channel.try_pop(), None);
    }

    #[test]
    fn test_pop_timeout_waits_bounded_time() {
        let channel: BoundedChannel<u8> = BoundedChannel::new(1);
        let start = Instant::now();
        assert_eq!(channel.pop_timeout(Duration::from_millis(30)), None);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_push_timeout_on_full_channel() {
        let channel = BoundedChannel::new(1);
        channel.push(1).unwrap();
        assert_eq!(channel.push_timeout(2, Duration::from_millis(10)), Err(2));
    }

    #[test]
    fn test_blocked_producer_resumes_after_pop() {
        let channel = BoundedChannel::new(1);
        channel.push(1).unwrap();

        let pushed = Arc::new(AtomicBool::new(false));
        let producer = {
            let channel = channel.clone();
            let pushed = pushed.clone();
            thread::spawn(move || {
                channel.push(2).unwrap();
                pushed.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!pushed.load(Ordering::SeqCst), "producer should block while full");

        assert_eq!(channel.pop(), Some(1));
        producer.join().unwrap();
        assert!(pushed.load(Ordering::SeqCst));
        assert_eq!(channel.pop(), Some(2));
    }

    #[test]
    fn test_many_producers_many_consumers() {
        let channel = BoundedChannel::new(4);
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let channel = channel.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        channel.push(Envelope::Item(p * 1000 + i)).unwrap();
                    }
                    channel.push(Envelope::End).unwrap();
                })
            })
            .collect();

        let consumers: Vec<_> = (0..2)
            .map(|_| {
                let channel = channel.clone();
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    let mut max_len = 0;
                    while let Some(message) = channel.pop_timeout(Duration::from_millis(200)) {
                        max_len = max_len.max(channel.len());
                        if let Envelope::Item(value) = message {
                            seen.push(value);
                        }
                    }
                    (seen, max_len)
                })
            })
            .collect();

        for producer in producers {
            producer.join().unwrap();
        }
        let mut all = Vec::new();
        for consumer in consumers {
            let (seen, max_len) = consumer.join().unwrap();
            assert!(max_len <= 4);
            all.extend(seen);
        }
        all.sort_unstable();
        let mut expected: Vec<i32> = (0..4).flat_map(|p| (0..100).map(move |i| p * 1000 + i)).collect();
        expected.sort_unstable();
        assert_eq!(all, expected);
    }

    #[test]
    fn test_envelope() {
        let item: Envelope<u8> = Envelope::Item(5);
        assert!(!item.is_end());
        assert_eq!(item.into_item(), Some(5));
        let end: Envelope<u8> = Envelope::End;
        assert!(end.is_end());
        assert_eq!(end.into_item(), None);
    }
}
