// Bounded blocking queue using Mutex + two Condvars
// Producers wait on `not_full`, consumers wait on `not_empty`; shutdown
// broadcasts on both so no waiter is left blocked.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Liveness net: waiters re-check their predicate at least this often even
/// if a wake-up is lost. Correctness rests on loop-and-recheck plus the
/// shutdown broadcast, not on this tick.
const WAIT_TICK: Duration = Duration::from_millis(10);

/// Returned by [`BoundedQueue::push`] once shutdown is requested, and by
/// [`BoundedQueue::pop`] once shutdown is requested and no item remains to
/// drain. Workers should treat it as a normal stop signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("queue is shutting down")]
pub struct ShutdownError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("queue capacity must be at least 1")]
pub struct InvalidCapacity;

/// What happens to items still queued when shutdown is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrainPolicy {
    /// Consumers keep popping until the buffer is empty, then fail.
    #[default]
    DrainRemaining,
    /// Remaining items are dropped; every pop after shutdown fails.
    DiscardRemaining,
}

/// Lifecycle of a queue instance. `Drained` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Running,
    ShuttingDown,
    Drained,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub produced: u64,
    pub consumed: u64,
    /// Occupied slots at snapshot time.
    pub depth: u64,
    /// High-water mark of occupied slots over the queue's lifetime.
    pub max_depth: u64,
}

// Circular buffer state. All fields are guarded by the queue's mutex;
// nothing here is safe to touch without it.
struct Inner<T> {
    slots: Vec<Option<T>>,
    head: usize,
    count: usize,
    shutting_down: bool,
    produced_total: u64,
    consumed_total: u64,
    max_depth: u64,
}

impl<T> Inner<T> {
    fn is_full(&self) -> bool {
        self.count == self.slots.len()
    }

    fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn insert(&mut self, item: T) {
        let tail = (self.head + self.count) % self.slots.len();
        self.slots[tail] = Some(item);
        self.count += 1;
        if self.count as u64 > self.max_depth {
            self.max_depth = self.count as u64;
        }
    }

    fn remove(&mut self) -> T {
        let item = self.slots[self.head]
            .take()
            .expect("head slot occupied when count > 0");
        self.head = (self.head + 1) % self.slots.len();
        self.count -= 1;
        item
    }

    fn discard_remaining(&mut self) {
        for slot in &mut self.slots {
            slot.take();
        }
        self.count = 0;
    }
}

/// A fixed-capacity FIFO shared between producer and consumer threads.
///
/// `push` blocks while the buffer is full, `pop` blocks while it is empty.
/// [`request_shutdown`](Self::request_shutdown) unblocks every waiter; after
/// that, pushes fail immediately and pops follow the configured
/// [`DrainPolicy`].
pub struct BoundedQueue<T> {
    inner: Mutex<Inner<T>>,
    not_full: Condvar,
    not_empty: Condvar,
    capacity: usize,
    drain_policy: DrainPolicy,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Result<Self, InvalidCapacity> {
        Self::with_policy(capacity, DrainPolicy::default())
    }

    pub fn with_policy(
        capacity: usize,
        drain_policy: DrainPolicy,
    ) -> Result<Self, InvalidCapacity> {
        if capacity == 0 {
            return Err(InvalidCapacity);
        }
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Ok(Self {
            inner: Mutex::new(Inner {
                slots,
                head: 0,
                count: 0,
                shutting_down: false,
                produced_total: 0,
                consumed_total: 0,
                max_depth: 0,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            capacity,
            drain_policy,
        })
    }

    /// Inserts an item, blocking while the buffer is full.
    ///
    /// Fails without inserting once shutdown is requested; the item is
    /// dropped.
    pub fn push(&self, item: T) -> Result<(), ShutdownError> {
        let mut inner = self.inner.lock();
        while inner.is_full() && !inner.shutting_down {
            self.not_full.wait_for(&mut inner, WAIT_TICK);
        }
        if inner.shutting_down {
            return Err(ShutdownError);
        }
        inner.insert(item);
        inner.produced_total += 1;
        drop(inner);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Removes the oldest item, blocking while the buffer is empty.
    ///
    /// Under [`DrainPolicy::DrainRemaining`], items queued before shutdown
    /// are still served in order; the first pop that finds the buffer empty
    /// after shutdown fails, as does every later one.
    pub fn pop(&self) -> Result<T, ShutdownError> {
        let mut inner = self.inner.lock();
        while inner.is_empty() && !inner.shutting_down {
            self.not_empty.wait_for(&mut inner, WAIT_TICK);
        }
        if inner.shutting_down {
            match self.drain_policy {
                DrainPolicy::DrainRemaining => {
                    if inner.is_empty() {
                        return Err(ShutdownError);
                    }
                }
                DrainPolicy::DiscardRemaining => {
                    inner.discard_remaining();
                    return Err(ShutdownError);
                }
            }
        }
        let item = inner.remove();
        inner.consumed_total += 1;
        drop(inner);
        self.not_full.notify_one();
        Ok(item)
    }

    /// Non-blocking push. `Ok(Some(item))` hands the item back when the
    /// buffer is full.
    pub fn try_push(&self, item: T) -> Result<Option<T>, ShutdownError> {
        let mut inner = self.inner.lock();
        if inner.shutting_down {
            return Err(ShutdownError);
        }
        if inner.is_full() {
            return Ok(Some(item));
        }
        inner.insert(item);
        inner.produced_total += 1;
        drop(inner);
        self.not_empty.notify_one();
        Ok(None)
    }

    /// Non-blocking pop. `Ok(None)` means the buffer is currently empty but
    /// still running.
    pub fn try_pop(&self) -> Result<Option<T>, ShutdownError> {
        let mut inner = self.inner.lock();
        if inner.shutting_down {
            match self.drain_policy {
                DrainPolicy::DrainRemaining => {
                    if inner.is_empty() {
                        return Err(ShutdownError);
                    }
                }
                DrainPolicy::DiscardRemaining => {
                    inner.discard_remaining();
                    return Err(ShutdownError);
                }
            }
        } else if inner.is_empty() {
            return Ok(None);
        }
        let item = inner.remove();
        inner.consumed_total += 1;
        drop(inner);
        self.not_full.notify_one();
        Ok(Some(item))
    }

    /// Marks the queue as shutting down and wakes every waiter on both
    /// conditions. Idempotent.
    pub fn request_shutdown(&self) {
        let mut inner = self.inner.lock();
        if inner.shutting_down {
            return;
        }
        inner.shutting_down = true;
        drop(inner);
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.inner.lock().is_full()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.lock().shutting_down
    }

    pub fn state(&self) -> QueueState {
        let inner = self.inner.lock();
        if !inner.shutting_down {
            QueueState::Running
        } else if inner.is_empty() {
            QueueState::Drained
        } else {
            QueueState::ShuttingDown
        }
    }

    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock();
        QueueStats {
            produced: inner.produced_total,
            consumed: inner.consumed_total,
            depth: inner.count as u64,
            max_depth: inner.max_depth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BoundedQueue, DrainPolicy, QueueState, ShutdownError};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn rejects_zero_capacity() {
        assert!(BoundedQueue::<u64>::new(0).is_err());
        assert!(BoundedQueue::<u64>::new(1).is_ok());
    }

    #[test]
    fn fifo_order_single_producer_single_consumer() {
        let queue = BoundedQueue::new(4).unwrap();
        for i in 0..4u64 {
            queue.push(i).unwrap();
        }
        for i in 0..4u64 {
            assert_eq!(queue.pop().unwrap(), i);
        }
    }

    #[test]
    fn fifo_order_across_wraparound() {
        let queue = BoundedQueue::new(3).unwrap();
        // Force head to wrap several times.
        for i in 0..10u64 {
            queue.push(i).unwrap();
            assert_eq!(queue.pop().unwrap(), i);
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn push_blocks_when_full_until_pop() {
        let queue = Arc::new(BoundedQueue::new(1).unwrap());
        queue.push(1u64).unwrap();

        let second_done = Arc::new(AtomicBool::new(false));
        let pusher = {
            let queue = Arc::clone(&queue);
            let second_done = Arc::clone(&second_done);
            thread::spawn(move || {
                queue.push(2u64).unwrap();
                second_done.store(true, Ordering::Release);
            })
        };

        thread::sleep(Duration::from_millis(100));
        assert!(
            !second_done.load(Ordering::Acquire),
            "second push completed while the buffer was full"
        );

        assert_eq!(queue.pop().unwrap(), 1);
        pusher.join().unwrap();
        assert!(second_done.load(Ordering::Acquire));
        assert_eq!(queue.pop().unwrap(), 2);
    }

    #[test]
    fn shutdown_drains_remaining_items_in_order() {
        let queue = BoundedQueue::new(10).unwrap();
        for i in 0..5u64 {
            queue.push(i).unwrap();
        }
        queue.request_shutdown();
        assert_eq!(queue.state(), QueueState::ShuttingDown);

        assert_eq!(queue.push(99), Err(ShutdownError));
        for i in 0..5u64 {
            assert_eq!(queue.pop().unwrap(), i);
        }
        assert_eq!(queue.pop(), Err(ShutdownError));
        assert_eq!(queue.state(), QueueState::Drained);

        let stats = queue.stats();
        assert_eq!(stats.produced, 5);
        assert_eq!(stats.consumed, 5);
    }

    #[test]
    fn discard_policy_fails_pops_immediately() {
        let queue = BoundedQueue::with_policy(10, DrainPolicy::DiscardRemaining).unwrap();
        for i in 0..5u64 {
            queue.push(i).unwrap();
        }
        queue.request_shutdown();
        assert_eq!(queue.pop(), Err(ShutdownError));
        assert!(queue.is_empty());

        // Discarded items are counted in neither total.
        let stats = queue.stats();
        assert_eq!(stats.produced, 5);
        assert_eq!(stats.consumed, 0);
    }

    #[test]
    fn shutdown_unblocks_waiting_pop() {
        let queue = Arc::new(BoundedQueue::<u64>::new(4).unwrap());
        let popper = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop())
        };

        thread::sleep(Duration::from_millis(50));
        queue.request_shutdown();
        assert_eq!(popper.join().unwrap(), Err(ShutdownError));
    }

    #[test]
    fn shutdown_unblocks_waiting_push() {
        let queue = Arc::new(BoundedQueue::new(1).unwrap());
        queue.push(1u64).unwrap();
        let pusher = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.push(2))
        };

        thread::sleep(Duration::from_millis(50));
        queue.request_shutdown();
        assert_eq!(pusher.join().unwrap(), Err(ShutdownError));
        // The item queued before shutdown is still drained.
        assert_eq!(queue.pop().unwrap(), 1);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let queue = BoundedQueue::new(2).unwrap();
        queue.push(7u64).unwrap();
        queue.request_shutdown();
        queue.request_shutdown();
        assert_eq!(queue.pop().unwrap(), 7);
        assert_eq!(queue.pop(), Err(ShutdownError));
    }

    #[test]
    fn try_push_hands_item_back_when_full() {
        let queue = BoundedQueue::new(1).unwrap();
        assert_eq!(queue.try_push(1u64).unwrap(), None);
        assert_eq!(queue.try_push(2).unwrap(), Some(2));
        assert_eq!(queue.try_pop().unwrap(), Some(1));
        assert_eq!(queue.try_pop().unwrap(), None);

        queue.request_shutdown();
        assert_eq!(queue.try_push(3), Err(ShutdownError));
        assert_eq!(queue.try_pop(), Err(ShutdownError));
    }

    #[test]
    fn depth_never_exceeds_capacity_under_load() {
        let queue = Arc::new(BoundedQueue::new(4).unwrap());
        let mut handles = Vec::new();

        for p in 0..4u64 {
            let queue = Arc::clone(&queue);
            handles.push(thread::spawn(move || {
                for i in 0..250u64 {
                    queue.push(p * 1_000 + i).unwrap();
                }
            }));
        }
        for _ in 0..4 {
            let queue = Arc::clone(&queue);
            handles.push(thread::spawn(move || {
                while queue.pop().is_ok() {}
            }));
        }

        // Producers finish first, then shutdown lets the consumers drain out.
        for handle in handles.drain(..4) {
            handle.join().unwrap();
        }
        queue.request_shutdown();
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = queue.stats();
        assert!(stats.max_depth <= 4, "max depth {} over capacity", stats.max_depth);
        assert_eq!(stats.produced, 1_000);
        assert_eq!(stats.consumed, 1_000);
        assert_eq!(stats.depth, 0);
    }

    #[test]
    fn conservation_with_multiple_producers_and_consumers() {
        let queue = Arc::new(BoundedQueue::new(8).unwrap());
        let mut producers = Vec::new();
        let mut consumers = Vec::new();

        for p in 0..3u64 {
            let queue = Arc::clone(&queue);
            producers.push(thread::spawn(move || {
                for i in 0..200u64 {
                    queue.push(p * 10_000 + i).unwrap();
                }
            }));
        }
        for _ in 0..3 {
            let queue = Arc::clone(&queue);
            consumers.push(thread::spawn(move || {
                let mut seen = Vec::new();
                while let Ok(item) = queue.pop() {
                    seen.push(item);
                }
                seen
            }));
        }

        for handle in producers {
            handle.join().unwrap();
        }
        queue.request_shutdown();

        let mut all = Vec::new();
        for handle in consumers {
            all.extend(handle.join().unwrap());
        }
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 600, "items lost or duplicated");

        let stats = queue.stats();
        assert_eq!(stats.produced, stats.consumed);
    }
}
