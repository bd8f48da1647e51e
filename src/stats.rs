use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Counters shared between the replay workers
#[derive(Debug)]
pub struct Stats {
    pub start_time: Instant,
    pub records_counter: AtomicU64,
    pub bytes_counter: AtomicU64,
}

impl Default for Stats {
    fn default() -> Self {
        Stats {
            start_time: Instant::now(),
            records_counter: AtomicU64::new(0),
            bytes_counter: AtomicU64::new(0),
        }
    }
}

impl Stats {
    pub fn increase(&self, bytes: usize) {
        self.records_counter.fetch_add(1, Ordering::Relaxed);
        self.bytes_counter
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn records(&self) -> u64 {
        self.records_counter.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes_counter.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn log_summary(&self) {
        let elapsed = self.elapsed();
        log::info!(
            "{} records ({} bytes) written in {:.2}s",
            self.records(),
            self.bytes(),
            elapsed.as_secs_f64()
        );
    }
}
