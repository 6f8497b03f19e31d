//! Latency histograms and the link dump

use super::accountant::AccountantSnapshot;
use super::pending::PendingSummary;
use crate::protocol::{EventKind, RequestKind};
use crate::transport::LinkState;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use uuid::Uuid;

/// Upper bounds of the histogram buckets, in milliseconds. One overflow bucket follows.
pub const LATENCY_BUCKETS_MS: [u64; 9] = [10, 20, 50, 100, 200, 500, 1000, 2000, 5000];

#[derive(Debug, Clone, Default, Serialize)]
pub struct LatencyHistogram {
    pub count: u64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub total_ms: u64,
    pub buckets: [u64; LATENCY_BUCKETS_MS.len() + 1],
}

impl LatencyHistogram {
    fn record(&mut self, elapsed: Duration) {
        let ms = elapsed.as_millis() as u64;
        self.min_ms = if self.count == 0 { ms } else { self.min_ms.min(ms) };
        self.max_ms = self.max_ms.max(ms);
        self.count += 1;
        self.total_ms += ms;
        let bucket = LATENCY_BUCKETS_MS
            .iter()
            .position(|&bound| ms <= bound)
            .unwrap_or(LATENCY_BUCKETS_MS.len());
        self.buckets[bucket] += 1;
    }

    pub fn mean_ms(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.total_ms / self.count
        }
    }
}

#[derive(Debug, Default)]
pub struct LatencyRecorder {
    by_kind: Mutex<BTreeMap<RequestKind, LatencyHistogram>>,
}

impl LatencyRecorder {
    pub fn record(&self, kind: RequestKind, elapsed: Duration) {
        self.by_kind
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .record(elapsed);
    }

    pub fn snapshot(&self) -> BTreeMap<RequestKind, LatencyHistogram> {
        self.by_kind
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Ordering gate state as seen in a dump.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GateSnapshot {
    pub tone: String,
    pub queued: Vec<RequestKind>,
    pub in_flight: Option<RequestKind>,
    pub superseded: u64,
    pub rejected: u64,
}

/// Point-in-time view of a link, serializable for the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct LinkDump {
    pub instance: Uuid,
    pub state: LinkState,
    pub epoch: u32,
    pub connect_attempts: u64,
    pub connections: u64,
    pub remote_version: Option<i32>,
    pub pending: Vec<PendingSummary>,
    pub resources: AccountantSnapshot,
    pub listeners: BTreeMap<EventKind, usize>,
    pub latency: BTreeMap<RequestKind, LatencyHistogram>,
    pub gate: GateSnapshot,
}
