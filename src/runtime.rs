use crate::queue::{BoundedQueue, DrainPolicy};
use crate::workload::{ItemSink, ItemSource, SequenceSource, SimulatedSink};
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub capacity: usize,
    pub producers: usize,
    pub consumers: usize,
    /// Upper bound on the simulated per-item production delay.
    pub producer_delay_ms: u64,
    /// Upper bound on the simulated per-item processing delay.
    pub consumer_delay_ms: u64,
    /// Stop automatically after this long. `None` waits for operator input.
    pub run_for_ms: Option<u64>,
    pub drain_policy: DrainPolicy,
    /// Seconds between progress lines; 0 disables progress reporting.
    pub progress_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            producers: 2,
            consumers: 5,
            producer_delay_ms: 1_000,
            consumer_delay_ms: 2_000,
            run_for_ms: None,
            drain_policy: DrainPolicy::DrainRemaining,
            progress_interval_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStats {
    pub duration_millis: u64,
    pub producers: usize,
    pub consumers: usize,
    pub produced: u64,
    pub consumed: u64,
    pub max_depth: u64,
    pub crashed_workers: usize,
}

/// Runs producer and consumer threads against one shared bounded queue
/// until the stop trigger fires, then shuts the queue down and joins every
/// worker before reporting final counters.
pub fn run_pipeline(config: PipelineConfig) -> Result<RunStats> {
    let queue = Arc::new(
        BoundedQueue::<u64>::with_policy(config.capacity, config.drain_policy)
            .context("invalid pipeline configuration")?,
    );
    let stop = Arc::new(AtomicBool::new(false));
    let next_id = Arc::new(AtomicU64::new(0));
    let (error_tx, error_rx) = crossbeam_channel::bounded::<String>(1);

    let started_at = Instant::now();
    let mut workers = Vec::with_capacity(config.producers + config.consumers);

    for producer_id in 0..config.producers {
        let queue = Arc::clone(&queue);
        let mut source = SequenceSource::new(
            Arc::clone(&next_id),
            Duration::from_millis(config.producer_delay_ms),
        );
        workers.push(
            thread::Builder::new()
                .name(format!("beltline-producer-{producer_id}"))
                .spawn(move || {
                    loop {
                        let item = source.next_item();
                        // A rejected push is the shutdown signal; the item
                        // was never enqueued and is abandoned.
                        if queue.push(item).is_err() {
                            break;
                        }
                    }
                })
                .with_context(|| format!("failed to spawn producer {producer_id}"))?,
        );
    }

    for consumer_id in 0..config.consumers {
        let queue = Arc::clone(&queue);
        let mut sink = SimulatedSink::new(Duration::from_millis(config.consumer_delay_ms));
        let worker_error_tx = error_tx.clone();
        workers.push(
            thread::Builder::new()
                .name(format!("beltline-consumer-{consumer_id}"))
                .spawn(move || {
                    while let Ok(item) = queue.pop() {
                        if let Err(err) = sink.consume(item) {
                            let _ = worker_error_tx
                                .try_send(format!("consumer {consumer_id}: {err}"));
                            queue.request_shutdown();
                            break;
                        }
                    }
                })
                .with_context(|| format!("failed to spawn consumer {consumer_id}"))?,
        );
    }

    // Progress reporting thread, one line per interval.
    let progress_thread = if config.progress_interval_secs > 0 {
        let progress_queue = Arc::clone(&queue);
        let progress_stop = Arc::clone(&stop);
        let interval = config.progress_interval_secs;
        Some(thread::spawn(move || {
            loop {
                for _ in 0..interval {
                    thread::sleep(Duration::from_secs(1));
                    if progress_stop.load(Ordering::Relaxed) {
                        return;
                    }
                }
                let stats = progress_queue.stats();
                let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
                eprintln!(
                    "Progress at {}: {} produced, {} consumed, {} items on queue.",
                    timestamp, stats.produced, stats.consumed, stats.depth
                );
            }
        }))
    } else {
        None
    };

    match config.run_for_ms {
        Some(millis) => thread::sleep(Duration::from_millis(millis)),
        None => {
            eprintln!("Press enter to stop...");
            let mut line = String::new();
            let _ = std::io::stdin().lock().read_line(&mut line);
        }
    }

    queue.request_shutdown();

    let total_workers = workers.len();
    let mut crashed_workers = 0usize;
    for (worker_id, worker) in workers.into_iter().enumerate() {
        if worker.join().is_err() {
            crashed_workers += 1;
            eprintln!(
                "Warning: worker {} crashed ({}/{} workers still running)",
                worker_id,
                total_workers - crashed_workers,
                total_workers
            );
        }
    }

    stop.store(true, Ordering::Release);
    if let Some(handle) = progress_thread {
        let _ = handle.join();
    }

    if let Ok(err) = error_rx.try_recv() {
        return Err(anyhow!(err));
    }

    let queue_stats = queue.stats();
    Ok(RunStats {
        duration_millis: started_at.elapsed().as_millis() as u64,
        producers: config.producers,
        consumers: config.consumers,
        produced: queue_stats.produced,
        consumed: queue_stats.consumed,
        max_depth: queue_stats.max_depth,
        crashed_workers,
    })
}
