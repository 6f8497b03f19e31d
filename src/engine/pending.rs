//! Pending request table
//!
//! The single source of truth for what is in flight. Every operation holds the
//! lock only for the map mutation; completions run after it is released.

use super::envelope::RequestEnvelope;
use crate::protocol::{RequestKind, Serial};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Rejected insert. Carries the envelope back so the caller can fail it.
#[derive(Debug)]
pub struct DuplicateSerial<R>(pub RequestEnvelope<R>);

#[derive(Debug, Clone, Serialize)]
pub struct PendingSummary {
    pub serial: Serial,
    pub kind: RequestKind,
    pub age_ms: u64,
}

#[derive(Debug)]
pub struct PendingTable<R> {
    entries: Mutex<HashMap<Serial, RequestEnvelope<R>>>,
}

impl<R> Default for PendingTable<R> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<R> PendingTable<R> {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<Serial, RequestEnvelope<R>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, envelope: RequestEnvelope<R>) -> Result<(), DuplicateSerial<R>> {
        let mut entries = self.entries();
        if entries.contains_key(&envelope.serial()) {
            return Err(DuplicateSerial(envelope));
        }
        entries.insert(envelope.serial(), envelope);
        Ok(())
    }

    /// Atomic find-and-remove. Only the first caller for a serial gets the envelope.
    pub fn remove(&self, serial: Serial) -> Option<RequestEnvelope<R>> {
        self.entries().remove(&serial)
    }

    /// Run `f` on an entry without removing it.
    pub fn with_entry<T>(
        &self,
        serial: Serial,
        f: impl FnOnce(&mut RequestEnvelope<R>) -> T,
    ) -> Option<T> {
        self.entries().get_mut(&serial).map(f)
    }

    /// Snapshot-and-clear.
    pub fn drain(&self) -> Vec<RequestEnvelope<R>> {
        let drained = std::mem::take(&mut *self.entries());
        drained.into_values().collect()
    }

    pub fn contains(&self, serial: Serial) -> bool {
        self.entries().contains_key(&serial)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Outstanding requests ordered by serial, for diagnostics.
    pub fn snapshot(&self) -> Vec<PendingSummary> {
        let mut summaries: Vec<_> = self
            .entries()
            .values()
            .map(|envelope| PendingSummary {
                serial: envelope.serial(),
                kind: envelope.kind(),
                age_ms: envelope.age().as_millis() as u64,
            })
            .collect();
        summaries.sort_by_key(|summary| summary.serial);
        summaries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::envelope::Completion;

    fn envelope(serial: Serial) -> RequestEnvelope<()> {
        RequestEnvelope::new(serial, RequestKind::GetCurrentCalls, vec![], Completion::None)
    }

    #[test]
    fn test_duplicate_insert_is_rejected() {
        let table = PendingTable::new();
        table.insert(envelope(7)).unwrap();
        let DuplicateSerial(rejected) = table.insert(envelope(7)).unwrap_err();
        assert_eq!(rejected.serial(), 7);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_remove_succeeds_once() {
        let table = PendingTable::new();
        table.insert(envelope(1)).unwrap();
        assert!(table.remove(1).is_some());
        assert!(table.remove(1).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_with_entry_keeps_entry() {
        let table = PendingTable::new();
        table.insert(envelope(4)).unwrap();
        assert_eq!(table.with_entry(4, |env| env.kind()), Some(RequestKind::GetCurrentCalls));
        assert_eq!(table.with_entry(5, |env| env.kind()), None);
        assert!(table.contains(4));
    }

    #[test]
    fn test_drain_empties_and_allows_reinsert() {
        let table = PendingTable::new();
        for serial in [3, 1, 2] {
            table.insert(envelope(serial)).unwrap();
        }
        let snapshot: Vec<_> = table.snapshot().iter().map(|s| s.serial).collect();
        assert_eq!(snapshot, vec![1, 2, 3]);

        let drained = table.drain();
        assert_eq!(drained.len(), 3);
        assert!(table.is_empty());
        table.insert(envelope(1)).unwrap();
    }

    #[test]
    fn test_concurrent_remove_delivers_each_serial_once() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let table = Arc::new(PendingTable::new());
        for serial in 0..500 {
            table.insert(envelope(serial)).unwrap();
        }
        let hits = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let table = Arc::clone(&table);
                let hits = Arc::clone(&hits);
                std::thread::spawn(move || {
                    for serial in 0..500 {
                        if table.remove(serial).is_some() {
                            hits.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(hits.load(Ordering::SeqCst), 500);
    }
}
