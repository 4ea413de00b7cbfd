//! Item sources and sinks plugged into the pipeline runtime.
//!
//! Producers pull items from an [`ItemSource`]; consumers hand popped items
//! to an [`ItemSink`]. Both may take arbitrarily long, which is what makes
//! the queue's blocking behavior interesting in the first place. The default
//! implementations simulate variable work with a random per-item delay.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

pub trait ItemSource: Send {
    /// Produces the next item. May block for as long as it likes.
    fn next_item(&mut self) -> u64;
}

pub trait ItemSink: Send {
    /// Processes a popped item. An error here aborts the whole pipeline.
    fn consume(&mut self, item: u64) -> Result<()>;
}

/// Draws item ids from a sequence shared by every producer, so ids are
/// globally unique and increasing regardless of which producer wins the
/// race. Sleeps up to `max_delay` before each item.
pub struct SequenceSource {
    next_id: Arc<AtomicU64>,
    max_delay: Duration,
    rng: SmallRng,
}

impl SequenceSource {
    pub fn new(next_id: Arc<AtomicU64>, max_delay: Duration) -> Self {
        Self {
            next_id,
            max_delay,
            rng: SmallRng::from_entropy(),
        }
    }
}

impl ItemSource for SequenceSource {
    fn next_item(&mut self) -> u64 {
        sleep_jitter(&mut self.rng, self.max_delay);
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Accepts items and simulates processing them for up to `max_delay`.
pub struct SimulatedSink {
    max_delay: Duration,
    rng: SmallRng,
}

impl SimulatedSink {
    pub fn new(max_delay: Duration) -> Self {
        Self {
            max_delay,
            rng: SmallRng::from_entropy(),
        }
    }
}

impl ItemSink for SimulatedSink {
    fn consume(&mut self, _item: u64) -> Result<()> {
        sleep_jitter(&mut self.rng, self.max_delay);
        Ok(())
    }
}

fn sleep_jitter(rng: &mut SmallRng, max_delay: Duration) {
    let max_millis = max_delay.as_millis() as u64;
    if max_millis == 0 {
        return;
    }
    thread::sleep(Duration::from_millis(rng.gen_range(0..max_millis)));
}
