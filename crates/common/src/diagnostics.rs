use std::sync::atomic::{AtomicU64, Ordering};

/// Per-link error counters. Nothing here is fatal; the counts are only
/// observed (logs, tests, shutdown summary).
#[derive(Debug, Default)]
pub struct LinkDiagnostics {
    parse_errors: AtomicU64,
    transport_errors: AtomicU64,
    dropped_messages: AtomicU64,
}

impl LinkDiagnostics {
    pub fn record_parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transport_error(&self) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// An outbound message was discarded: no session was open or its queue
    /// was full.
    pub fn record_dropped(&self) {
        self.dropped_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn parse_errors(&self) -> u64 {
        self.parse_errors.load(Ordering::Relaxed)
    }

    pub fn transport_errors(&self) -> u64 {
        self.transport_errors.load(Ordering::Relaxed)
    }

    pub fn dropped_messages(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }
}
