//! Feed metrics collection.

#![allow(missing_docs)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

#[derive(Debug, Default)]
struct Counters {
    messages_received: AtomicU64,
    messages_dropped: AtomicU64,
    values_ingested: AtomicU64,
    rows_published: AtomicU64,
    rows_skipped: AtomicU64,
    publish_failures: AtomicU64,
    connection_errors: AtomicU64,
    reconnects: AtomicU64,
}

/// Shared counters for both feeds. Cloning shares the same counters.
#[derive(Debug, Clone, Default)]
pub struct FeedMetrics {
    counters: Arc<Counters>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeedStats {
    pub messages_received: u64,
    pub messages_dropped: u64,
    pub values_ingested: u64,
    pub rows_published: u64,
    pub rows_skipped: u64,
    pub publish_failures: u64,
    /// Failed polls of the broker connection, retries included.
    pub connection_errors: u64,
    /// Sessions re-established after a connection error.
    pub reconnects: u64,
}

impl FeedMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_message(&self) {
        bump(&self.counters.messages_received, 1);
    }

    pub fn record_dropped(&self) {
        bump(&self.counters.messages_dropped, 1);
    }

    pub fn record_ingested(&self, values: usize) {
        bump(&self.counters.values_ingested, values as u64);
    }

    pub fn record_row_published(&self) {
        bump(&self.counters.rows_published, 1);
    }

    pub fn record_row_skipped(&self) {
        bump(&self.counters.rows_skipped, 1);
    }

    pub fn record_publish_failure(&self) {
        bump(&self.counters.publish_failures, 1);
    }

    pub fn record_connection_error(&self) {
        bump(&self.counters.connection_errors, 1);
    }

    pub fn record_reconnect(&self) {
        bump(&self.counters.reconnects, 1);
    }

    #[must_use]
    pub fn snapshot(&self) -> FeedStats {
        let counters = &self.counters;
        FeedStats {
            messages_received: counters.messages_received.load(Ordering::Relaxed),
            messages_dropped: counters.messages_dropped.load(Ordering::Relaxed),
            values_ingested: counters.values_ingested.load(Ordering::Relaxed),
            rows_published: counters.rows_published.load(Ordering::Relaxed),
            rows_skipped: counters.rows_skipped.load(Ordering::Relaxed),
            publish_failures: counters.publish_failures.load(Ordering::Relaxed),
            connection_errors: counters.connection_errors.load(Ordering::Relaxed),
            reconnects: counters.reconnects.load(Ordering::Relaxed),
        }
    }
}

fn bump(counter: &AtomicU64, by: u64) {
    // Saturate rather than wrap.
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
        Some(current.saturating_add(by))
    });
}
