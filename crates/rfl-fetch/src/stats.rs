//! Process-wide fetch counters.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rfl_store::blob;

static FETCHES: AtomicU64 = AtomicU64::new(0);
static FILES: AtomicU64 = AtomicU64::new(0);
static TOTAL_BYTES: AtomicU64 = AtomicU64::new(0);
static CONTENT_BYTES: AtomicU64 = AtomicU64::new(0);
static METADATA_BYTES: AtomicU64 = AtomicU64::new(0);
static COST_MICROS: AtomicU64 = AtomicU64::new(0);

/// Point-in-time copy of the counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FetchStats {
    /// Prefetch calls that reached the network
    pub fetches: u64,
    /// Files requested by those calls
    pub files: u64,
    /// Compressed bytes received from upstream
    pub total_bytes: u64,
    pub content_bytes: u64,
    pub metadata_bytes: u64,
    pub cost: Duration,
}

impl FetchStats {
    pub fn is_empty(&self) -> bool {
        self.fetches == 0
    }
}

impl fmt::Display for FetchStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const MB: f64 = 1024.0 * 1024.0;
        let seconds = self.cost.as_secs_f64();
        write!(
            f,
            "{} files fetched over {} fetches - {:.2} MB ({:.2} MB content / {:.2} MB metadata) over {:.2}s = {:.2} MB/s",
            self.files,
            self.fetches,
            self.total_bytes as f64 / MB,
            self.content_bytes as f64 / MB,
            self.metadata_bytes as f64 / MB,
            seconds,
            self.total_bytes as f64 / MB / seconds.max(0.001)
        )
    }
}

pub fn snapshot() -> FetchStats {
    FetchStats {
        fetches: FETCHES.load(Ordering::Relaxed),
        files: FILES.load(Ordering::Relaxed),
        total_bytes: TOTAL_BYTES.load(Ordering::Relaxed),
        content_bytes: CONTENT_BYTES.load(Ordering::Relaxed),
        metadata_bytes: METADATA_BYTES.load(Ordering::Relaxed),
        cost: Duration::from_micros(COST_MICROS.load(Ordering::Relaxed)),
    }
}

pub fn reset() {
    for counter in [
        &FETCHES,
        &FILES,
        &TOTAL_BYTES,
        &CONTENT_BYTES,
        &METADATA_BYTES,
        &COST_MICROS,
    ] {
        counter.store(0, Ordering::Relaxed);
    }
}

pub(crate) fn record_fetch(files: usize) {
    FETCHES.fetch_add(1, Ordering::Relaxed);
    FILES.fetch_add(files as u64, Ordering::Relaxed);
}

/// Account one received blob: `received` compressed bytes that decoded to
/// `payload`.
pub(crate) fn record_blob(received: usize, payload: &[u8]) {
    TOTAL_BYTES.fetch_add(received as u64, Ordering::Relaxed);
    let content = blob::content_len(payload).unwrap_or(0);
    CONTENT_BYTES.fetch_add(content as u64, Ordering::Relaxed);
    METADATA_BYTES.fetch_add(
        payload.len().saturating_sub(content) as u64,
        Ordering::Relaxed,
    );
}

pub(crate) fn record_cost(elapsed: Duration) {
    COST_MICROS.fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
}
