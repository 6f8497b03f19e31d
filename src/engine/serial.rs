//! Serial number generator
//!
//! Serials are partitioned by connection epoch: the top byte (sign bit
//! excluded) carries the epoch, the low 24 bits a wrapping counter. Resetting on
//! reconnect moves to the next epoch, so a stale serial from before a drain can
//! only collide with a new one after 128 reconnects.

use crate::protocol::Serial;
use std::sync::{Mutex, PoisonError};

const COUNTER_BITS: u32 = 24;
const COUNTER_MASK: u32 = (1 << COUNTER_BITS) - 1;
const EPOCH_MASK: u32 = 0x7f;

#[derive(Debug, Default)]
struct SerialState {
    epoch: u32,
    counter: u32,
}

#[derive(Debug, Default)]
pub struct SerialGenerator {
    state: Mutex<SerialState>,
}

impl SerialGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next serial in the current epoch. Monotonic until the counter wraps.
    pub fn next(&self) -> Serial {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let counter = state.counter;
        state.counter = (state.counter + 1) & COUNTER_MASK;
        ((state.epoch << COUNTER_BITS) | counter) as Serial
    }

    /// Move to the next epoch and restart the counter.
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.epoch = (state.epoch + 1) & EPOCH_MASK;
        state.counter = 0;
    }

    pub fn epoch(&self) -> u32 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .epoch
    }
}
