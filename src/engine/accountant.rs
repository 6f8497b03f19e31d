//! Wake lock accounting for in-flight requests
//!
//! Every request written to the modem holds one unit of the main wake lock
//! until its response arrives, it is acked, or it is drained. The physical lock
//! is taken on the first unit and dropped with the last one. A timer forces the
//! lock off if nothing has moved for the configured timeout; it is a safety net
//! and logs whoever was still holding a unit.
//!
//! Protocol acks use a separate short-lived lock so they never touch the count.

use super::envelope::{RequestEnvelope, ResourceTag};
use crate::protocol::{RequestKind, Serial};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::AbortHandle;

/// Default hold limit for the main lock.
pub const DEFAULT_WAKE_LOCK_TIMEOUT: Duration = Duration::from_secs(60);

/// Default hold time for the ack lock.
pub const DEFAULT_ACK_WAKE_LOCK_TIMEOUT: Duration = Duration::from_millis(200);

/// Platform power primitive.
pub trait WakeLock: Send + Sync + 'static {
    fn acquire(&self);
    fn release(&self);
    fn is_held(&self) -> bool;
}

/// In-process wake lock that only records its state.
#[derive(Debug, Default)]
pub struct LocalWakeLock {
    name: &'static str,
    held: AtomicBool,
    acquisitions: AtomicU64,
    releases: AtomicU64,
}

impl LocalWakeLock {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> u64 {
        self.releases.load(Ordering::SeqCst)
    }
}

impl WakeLock for LocalWakeLock {
    fn acquire(&self) {
        if !self.held.swap(true, Ordering::SeqCst) {
            self.acquisitions.fetch_add(1, Ordering::SeqCst);
            tracing::trace!(lock = self.name, "wake lock acquired");
        }
    }

    fn release(&self) {
        if self.held.swap(false, Ordering::SeqCst) {
            self.releases.fetch_add(1, Ordering::SeqCst);
            tracing::trace!(lock = self.name, "wake lock released");
        }
    }

    fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct Accounts {
    count: usize,
    sequence: u64,
    generation: u64,
    holders: BTreeMap<Serial, RequestKind>,
    timer: Option<AbortHandle>,
    forced_releases: u64,
    ack_sequence: u64,
    ack_held: bool,
    ack_timer: Option<AbortHandle>,
}

/// A request currently holding a wake lock unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Holder {
    pub serial: Serial,
    pub kind: RequestKind,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountantSnapshot {
    pub count: usize,
    pub holders: Vec<Holder>,
    pub main_held: bool,
    pub ack_held: bool,
    pub forced_releases: u64,
}

pub struct ResourceAccountant {
    main: Arc<dyn WakeLock>,
    ack: Arc<dyn WakeLock>,
    timeout: Duration,
    ack_timeout: Duration,
    accounts: Mutex<Accounts>,
}

impl ResourceAccountant {
    pub fn new(
        main: Arc<dyn WakeLock>,
        ack: Arc<dyn WakeLock>,
        timeout: Duration,
        ack_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            main,
            ack,
            timeout,
            ack_timeout,
            accounts: Mutex::new(Accounts::default()),
        })
    }

    /// Accountant backed by [`LocalWakeLock`]s.
    pub fn local(timeout: Duration, ack_timeout: Duration) -> Arc<Self> {
        Self::new(
            Arc::new(LocalWakeLock::new("rilink")),
            Arc::new(LocalWakeLock::new("rilink_ack")),
            timeout,
            ack_timeout,
        )
    }

    fn accounts(&self) -> MutexGuard<'_, Accounts> {
        self.accounts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take one unit for `envelope`. Physical transitions happen under the lock.
    pub fn acquire_for<R>(self: &Arc<Self>, envelope: &mut RequestEnvelope<R>) {
        if matches!(envelope.resource, ResourceTag::Held { .. }) {
            return;
        }

        let mut accounts = self.accounts();
        accounts.count += 1;
        if accounts.count == 1 {
            self.main.acquire();
        }
        accounts.sequence += 1;
        accounts.holders.insert(envelope.serial(), envelope.kind());
        envelope.resource = ResourceTag::Held {
            generation: accounts.generation,
        };

        let sequence = accounts.sequence;
        let previous = accounts.timer.replace(self.spawn_timer(sequence, false));
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Give back `envelope`'s unit, if it holds one.
    pub fn release_for<R>(&self, envelope: &mut RequestEnvelope<R>) {
        let ResourceTag::Held { generation } = envelope.resource else {
            return;
        };
        envelope.resource = ResourceTag::None;

        let mut accounts = self.accounts();
        if generation != accounts.generation {
            // Unit was already reclaimed by a forced release
            return;
        }
        accounts.holders.remove(&envelope.serial());
        if accounts.count == 0 {
            tracing::error!(
                serial = envelope.serial(),
                kind = %envelope.kind(),
                "wake lock release with zero count"
            );
            return;
        }
        accounts.count -= 1;
        if accounts.count == 0 {
            self.main.release();
            if let Some(timer) = accounts.timer.take() {
                timer.abort();
            }
        }
    }

    /// Timer callback. Only acts when no acquire happened since `sequence` was armed.
    pub fn force_release_on_timeout(&self, sequence: u64) {
        let mut accounts = self.accounts();
        if accounts.sequence != sequence || accounts.count == 0 {
            return;
        }

        tracing::error!(
            count = accounts.count,
            timeout_ms = self.timeout.as_millis() as u64,
            "wake lock held too long, forcing release"
        );
        for (serial, kind) in &accounts.holders {
            tracing::error!(serial, %kind, "request still holding wake lock");
        }

        self.main.release();
        accounts.count = 0;
        accounts.holders.clear();
        accounts.generation += 1;
        accounts.forced_releases += 1;
        accounts.timer = None;
    }

    /// Hold the ack lock briefly after sending a protocol ack.
    pub fn acquire_ack(self: &Arc<Self>) {
        let mut accounts = self.accounts();
        accounts.ack_sequence += 1;
        if !accounts.ack_held {
            self.ack.acquire();
            accounts.ack_held = true;
        }
        let sequence = accounts.ack_sequence;
        let previous = accounts.ack_timer.replace(self.spawn_timer(sequence, true));
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn release_ack_on_timeout(&self, sequence: u64) {
        let mut accounts = self.accounts();
        if accounts.ack_sequence != sequence || !accounts.ack_held {
            return;
        }
        self.ack.release();
        accounts.ack_held = false;
        accounts.ack_timer = None;
    }

    fn spawn_timer(self: &Arc<Self>, sequence: u64, ack: bool) -> AbortHandle {
        let accountant: Weak<Self> = Arc::downgrade(self);
        let delay = if ack { self.ack_timeout } else { self.timeout };
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(accountant) = accountant.upgrade() {
                if ack {
                    accountant.release_ack_on_timeout(sequence);
                } else {
                    accountant.force_release_on_timeout(sequence);
                }
            }
        })
        .abort_handle()
    }

    pub fn count(&self) -> usize {
        self.accounts().count
    }

    pub fn snapshot(&self) -> AccountantSnapshot {
        let accounts = self.accounts();
        AccountantSnapshot {
            count: accounts.count,
            holders: accounts
                .holders
                .iter()
                .map(|(&serial, &kind)| Holder { serial, kind })
                .collect(),
            main_held: self.main.is_held(),
            ack_held: accounts.ack_held,
            forced_releases: accounts.forced_releases,
        }
    }
}

impl std::fmt::Debug for ResourceAccountant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceAccountant")
            .field("timeout", &self.timeout)
            .field("accounts", &*self.accounts())
            .finish()
    }
}
