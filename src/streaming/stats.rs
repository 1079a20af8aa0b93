use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Connection and throughput counters shared by all stream clients
#[derive(Debug, Default)]
pub(crate) struct StreamCounters {
    active: AtomicUsize,
    total: AtomicU64,
    frames_sent: AtomicU64,
    bytes_sent: AtomicU64,
}

impl StreamCounters {
    pub(crate) fn connect(&self) -> usize {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn disconnect(&self) -> usize {
        self.active.fetch_sub(1, Ordering::SeqCst).saturating_sub(1)
    }

    pub(crate) fn record_frame(&self, bytes: usize) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StreamStats {
        StreamStats {
            active_connections: self.active.load(Ordering::SeqCst),
            total_connections: self.total.load(Ordering::Relaxed),
            frames_streamed: self.frames_sent.load(Ordering::Relaxed),
            bytes_streamed: self.bytes_sent.load(Ordering::Relaxed),
        }
    }
}

/// Stream server statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StreamStats {
    pub active_connections: usize,
    pub total_connections: u64,
    pub frames_streamed: u64,
    pub bytes_streamed: u64,
}
