//! Correlation engine shared by the sender, the connection and the facade
//!
//! [`Core`] owns the pending table, the accountant, the serial generator and
//! the listener registry. Whoever removes an envelope from the table retires
//! it through [`Core::retire`], which releases its wake lock unit before the
//! completion runs.

pub mod accountant;
pub mod diagnostics;
pub mod dispatcher;
pub mod envelope;
pub mod events;
pub mod pending;
pub mod policy;
pub mod serial;

use crate::error::RequestError;
use crate::payload::PayloadCodec;
use crate::protocol::{RequestKind, Serial};
use crate::transport::LinkState;
use crate::transport::sender::Outbound;
use accountant::ResourceAccountant;
use diagnostics::{GateSnapshot, LatencyRecorder, LinkDump};
use envelope::{RequestEnvelope, RequestResult};
use events::EventRegistry;
use pending::PendingTable;
use policy::PolicyTable;
use serial::SerialGenerator;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Default)]
struct LinkStats {
    connect_attempts: u64,
    connections: u64,
    remote_version: Option<i32>,
}

pub struct Core<C: PayloadCodec> {
    pub(crate) codec: C,
    pub(crate) table: PendingTable<C::Response>,
    pub(crate) accountant: Arc<ResourceAccountant>,
    pub(crate) serials: SerialGenerator,
    pub(crate) events: EventRegistry<C::Event>,
    pub(crate) latency: LatencyRecorder,
    pub(crate) policy: PolicyTable,
    pub(crate) shutdown: CancellationToken,
    outbound: mpsc::UnboundedSender<Outbound<C::Response>>,
    state: watch::Sender<LinkState>,
    stats: Mutex<LinkStats>,
    instance: Uuid,
}

impl<C: PayloadCodec> Core<C> {
    pub fn new(
        codec: C,
        accountant: Arc<ResourceAccountant>,
        policy: PolicyTable,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Outbound<C::Response>>) {
        let (outbound, queue) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(LinkState::Disconnected);
        let core = Arc::new(Self {
            codec,
            table: PendingTable::new(),
            accountant,
            serials: SerialGenerator::new(),
            events: EventRegistry::new(),
            latency: LatencyRecorder::default(),
            policy,
            shutdown: CancellationToken::new(),
            outbound,
            state,
            stats: Mutex::new(LinkStats::default()),
            instance: Uuid::new_v4(),
        });
        (core, queue)
    }

    /// Release the envelope's wake lock unit, then deliver its outcome.
    pub(crate) fn retire(
        &self,
        mut envelope: RequestEnvelope<C::Response>,
        result: RequestResult<C::Response>,
    ) {
        self.accountant.release_for(&mut envelope);
        envelope.complete(result);
    }

    /// Fail every pending request with the error `error` builds.
    ///
    /// Runs on the connection and sender tasks; a panic while retiring one
    /// entry is logged and the rest are still failed.
    pub(crate) fn drain_all(&self, error: impl Fn() -> RequestError<C::Response>) -> usize {
        let drained = self.table.drain();
        let count = drained.len();
        for envelope in drained {
            let serial = envelope.serial();
            if catch_unwind(AssertUnwindSafe(|| self.retire(envelope, Err(error())))).is_err() {
                tracing::error!(serial, "retiring drained request panicked");
            }
        }
        if count > 0 {
            tracing::info!(count, error = %error(), "drained pending requests");
        }
        count
    }

    /// Queue a request for the sender. Fails it with `Abandoned` once the sender is gone.
    pub(crate) fn submit(&self, envelope: RequestEnvelope<C::Response>) {
        if let Err(mpsc::error::SendError(Outbound::Request(envelope))) =
            self.outbound.send(Outbound::Request(envelope))
        {
            envelope.complete(Err(RequestError::Abandoned));
        }
    }

    pub(crate) fn enqueue(&self, message: Outbound<C::Response>) -> bool {
        self.outbound.send(message).is_ok()
    }

    pub(crate) fn send_ack(&self) {
        if !self.enqueue(Outbound::Ack) {
            tracing::debug!("ack dropped, sender stopped");
        }
    }

    /// Force-complete a blocking kind if the modem has not answered in time.
    pub(crate) fn arm_blocking_timeout(self: &Arc<Self>, serial: Serial, kind: RequestKind) {
        let Some(timeout) = self.policy.blocking_timeout(kind) else {
            return;
        };
        let core = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(core) = core.upgrade() else {
                return;
            };
            let Some(envelope) = core.table.remove(serial) else {
                return;
            };
            core.latency.record(kind, envelope.age());
            let result = match core.codec.default_response(kind) {
                Some(default) => {
                    tracing::warn!(
                        serial,
                        %kind,
                        timeout_ms = timeout.as_millis() as u64,
                        "no response in time, completing with default"
                    );
                    Ok(default)
                }
                None => {
                    tracing::warn!(
                        serial,
                        %kind,
                        timeout_ms = timeout.as_millis() as u64,
                        "no response in time"
                    );
                    Err(RequestError::TimedOut { kind })
                }
            };
            core.retire(envelope, result);
        });
    }

    pub(crate) fn set_state(&self, state: LinkState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "link state changed");
        }
    }

    pub fn instance(&self) -> Uuid {
        self.instance
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    pub(crate) fn note_connect_attempt(&self) {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).connect_attempts += 1;
    }

    pub(crate) fn note_connected(&self) {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).connections += 1;
    }

    pub(crate) fn set_remote_version(&self, version: i32) {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).remote_version = Some(version);
    }

    pub fn dump(&self, gate: GateSnapshot) -> LinkDump {
        let (connect_attempts, connections, remote_version) = {
            let stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
            (stats.connect_attempts, stats.connections, stats.remote_version)
        };
        LinkDump {
            instance: self.instance,
            state: self.state(),
            epoch: self.serials.epoch(),
            connect_attempts,
            connections,
            remote_version,
            pending: self.table.snapshot(),
            resources: self.accountant.snapshot(),
            listeners: self.events.listener_counts(),
            latency: self.latency.snapshot(),
            gate,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::engine::accountant::{DEFAULT_ACK_WAKE_LOCK_TIMEOUT, DEFAULT_WAKE_LOCK_TIMEOUT};
    use crate::engine::envelope::Completion;
    use crate::engine::policy::DEFAULT_BLOCKING_TIMEOUT;
    use crate::payload::RawCodec;
    use std::time::Duration;

    pub(crate) type TestCore = (
        Arc<Core<RawCodec>>,
        mpsc::UnboundedReceiver<Outbound<Vec<u8>>>,
    );

    pub(crate) fn raw_core() -> TestCore {
        Core::new(
            RawCodec,
            ResourceAccountant::local(DEFAULT_WAKE_LOCK_TIMEOUT, DEFAULT_ACK_WAKE_LOCK_TIMEOUT),
            PolicyTable::standard(DEFAULT_BLOCKING_TIMEOUT),
        )
    }

    /// Put an envelope in the table as the sender would, returning its receiver.
    pub(crate) fn track(
        core: &Arc<Core<RawCodec>>,
        serial: Serial,
        kind: RequestKind,
    ) -> tokio::sync::oneshot::Receiver<RequestResult<Vec<u8>>> {
        let (completion, rx) = Completion::channel();
        let mut envelope = RequestEnvelope::new(serial, kind, vec![], completion);
        core.accountant.acquire_for(&mut envelope);
        core.table.insert(envelope).unwrap();
        core.arm_blocking_timeout(serial, kind);
        rx
    }

    #[tokio::test]
    async fn test_drain_all_fails_and_releases() {
        let (core, _queue) = raw_core();
        let a = track(&core, 1, RequestKind::Dial);
        let b = track(&core, 2, RequestKind::Hangup);
        assert_eq!(core.accountant.count(), 2);

        assert_eq!(core.drain_all(|| RequestError::TransportUnavailable), 2);
        assert_eq!(a.await.unwrap(), Err(RequestError::TransportUnavailable));
        assert_eq!(b.await.unwrap(), Err(RequestError::TransportUnavailable));
        assert_eq!(core.accountant.count(), 0);
        assert!(core.table.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_kind_completes_with_default() {
        let (core, _queue) = raw_core();
        let rx = track(&core, 5, RequestKind::PullLceData);

        tokio::time::sleep(DEFAULT_BLOCKING_TIMEOUT + Duration::from_millis(10)).await;
        assert_eq!(rx.await.unwrap(), Ok(Vec::new()));
        assert!(!core.table.contains(5));
        assert_eq!(core.accountant.count(), 0);
    }

    #[tokio::test]
    async fn test_drain_survives_panicking_callback() {
        let (core, _queue) = raw_core();
        let first = track(&core, 1, RequestKind::Operator);
        let mut envelope = RequestEnvelope::new(
            2,
            RequestKind::Dial,
            vec![],
            Completion::callback(|result: RequestResult<Vec<u8>>| {
                if result.is_err() {
                    panic!("callback rejects failures");
                }
            }),
        );
        core.accountant.acquire_for(&mut envelope);
        core.table.insert(envelope).unwrap();
        let third = track(&core, 3, RequestKind::Hangup);

        assert_eq!(core.drain_all(|| RequestError::TransportUnavailable), 3);
        assert_eq!(first.await.unwrap(), Err(RequestError::TransportUnavailable));
        assert_eq!(third.await.unwrap(), Err(RequestError::TransportUnavailable));
        assert!(core.table.is_empty());
        assert_eq!(core.accountant.count(), 0);
    }

    #[tokio::test]
    async fn test_submit_after_sender_gone_abandons() {
        let (core, queue) = raw_core();
        drop(queue);
        let (completion, rx) = Completion::channel();
        core.submit(RequestEnvelope::new(1, RequestKind::Operator, vec![], completion));
        assert_eq!(rx.await.unwrap(), Err(RequestError::Abandoned));
    }
}
