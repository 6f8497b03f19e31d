//! Ordering gate for DTMF and call-control requests
//!
//! Tone start/stop requests and the call-control requests that must not
//! interleave with them go through one queue and are sent strictly one at a
//! time: the next request leaves only after the previous one has completed.
//! A stop that arrives while its start is still queued cancels that start.

use crate::engine::diagnostics::GateSnapshot;
use crate::engine::envelope::{Completion, RequestEnvelope};
use crate::error::RequestError;
use crate::protocol::RequestKind;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Default bound on queued gated requests.
pub const DEFAULT_QUEUE_LIMIT: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateRole {
    Start,
    Stop,
    Barrier,
}

#[derive(Debug, Clone)]
pub struct GateRules {
    roles: HashMap<RequestKind, GateRole>,
}

impl Default for GateRules {
    fn default() -> Self {
        Self::standard()
    }
}

impl GateRules {
    pub fn empty() -> Self {
        Self {
            roles: HashMap::new(),
        }
    }

    pub fn standard() -> Self {
        let mut rules = Self::empty()
            .with_role(RequestKind::DtmfStart, GateRole::Start)
            .with_role(RequestKind::DtmfStop, GateRole::Stop);
        for kind in [
            RequestKind::SwitchWaitingOrHoldingAndActive,
            RequestKind::Conference,
            RequestKind::SeparateConnection,
            RequestKind::ExplicitCallTransfer,
            RequestKind::HangupWaitingOrBackground,
            RequestKind::HangupForegroundResumeBackground,
        ] {
            rules = rules.with_role(kind, GateRole::Barrier);
        }
        rules
    }

    pub fn with_role(mut self, kind: RequestKind, role: GateRole) -> Self {
        self.roles.insert(kind, role);
        self
    }

    pub fn role(&self, kind: RequestKind) -> Option<GateRole> {
        self.roles.get(&kind).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToneState {
    #[default]
    Idle,
    Started,
}

impl fmt::Display for ToneState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ToneState::Idle => "idle",
            ToneState::Started => "started",
        })
    }
}

struct GateState<R> {
    queue: VecDeque<RequestEnvelope<R>>,
    in_flight: Option<RequestKind>,
    tone: ToneState,
    superseded: u64,
    rejected: u64,
}

type Forward<R> = Box<dyn Fn(RequestEnvelope<R>) + Send + Sync>;

pub struct Gate<R> {
    rules: GateRules,
    limit: usize,
    state: Mutex<GateState<R>>,
    forward: Forward<R>,
}

impl<R: Send + 'static> Gate<R> {
    /// `forward` hands a request to the transport; it must not block.
    pub fn new(
        rules: GateRules,
        limit: usize,
        forward: impl Fn(RequestEnvelope<R>) + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            rules,
            limit,
            state: Mutex::new(GateState {
                queue: VecDeque::new(),
                in_flight: None,
                tone: ToneState::Idle,
                superseded: 0,
                rejected: 0,
            }),
            forward: Box::new(forward),
        })
    }

    fn state(&self) -> MutexGuard<'_, GateState<R>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn handles(&self, kind: RequestKind) -> bool {
        self.rules.role(kind).is_some()
    }

    pub fn submit(self: &Arc<Self>, envelope: RequestEnvelope<R>) {
        let kind = envelope.kind();
        let mut superseded = None;
        let mut rejected = None;

        let next = {
            let mut state = self.state();
            if self.rules.role(kind) == Some(GateRole::Stop) {
                let newest_is_start = state
                    .queue
                    .back()
                    .is_some_and(|queued| self.rules.role(queued.kind()) == Some(GateRole::Start));
                if newest_is_start {
                    superseded = state.queue.pop_back();
                    state.superseded += 1;
                }
            }

            if state.queue.len() >= self.limit {
                state.rejected += 1;
                rejected = Some(envelope);
            } else {
                state.queue.push_back(envelope);
            }

            if state.in_flight.is_none() {
                self.pop_next(&mut state)
            } else {
                None
            }
        };

        if let Some(start) = superseded {
            tracing::debug!(serial = start.serial(), "tone start superseded by stop");
            let kind = start.kind();
            start.complete(Err(RequestError::Superseded { kind }));
        }
        if let Some(envelope) = rejected {
            tracing::warn!(
                serial = envelope.serial(),
                %kind,
                limit = self.limit,
                "ordering queue full"
            );
            envelope.complete(Err(RequestError::QueueFull { kind }));
        }
        if let Some(envelope) = next {
            self.send(envelope);
        }
    }

    fn pop_next(&self, state: &mut GateState<R>) -> Option<RequestEnvelope<R>> {
        let envelope = state.queue.pop_front()?;
        match self.rules.role(envelope.kind()) {
            Some(GateRole::Start) => state.tone = ToneState::Started,
            Some(GateRole::Stop) => state.tone = ToneState::Idle,
            _ => {}
        }
        state.in_flight = Some(envelope.kind());
        Some(envelope)
    }

    fn send(self: &Arc<Self>, envelope: RequestEnvelope<R>) {
        let gate = Arc::downgrade(self);
        let envelope = envelope.map_completion(move |original| {
            Completion::callback(move |result| {
                original.deliver(result);
                if let Some(gate) = gate.upgrade() {
                    gate.advance();
                }
            })
        });
        (self.forward)(envelope);
    }

    fn advance(self: &Arc<Self>) {
        let next = {
            let mut state = self.state();
            state.in_flight = None;
            self.pop_next(&mut state)
        };
        if let Some(envelope) = next {
            self.send(envelope);
        }
    }

    pub fn tone(&self) -> ToneState {
        self.state().tone
    }

    pub fn snapshot(&self) -> GateSnapshot {
        let state = self.state();
        GateSnapshot {
            tone: state.tone.to_string(),
            queued: state.queue.iter().map(|envelope| envelope.kind()).collect(),
            in_flight: state.in_flight,
            superseded: state.superseded,
            rejected: state.rejected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    type Sent = Arc<Mutex<Vec<RequestEnvelope<()>>>>;

    fn gate(limit: usize) -> (Arc<Gate<()>>, Sent) {
        let sent: Sent = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&sent);
        let gate = Gate::new(GateRules::standard(), limit, move |envelope| {
            sink.lock().unwrap().push(envelope);
        });
        (gate, sent)
    }

    fn envelope(
        serial: i32,
        kind: RequestKind,
    ) -> (RequestEnvelope<()>, oneshot::Receiver<Result<(), RequestError<()>>>) {
        let (completion, rx) = Completion::channel();
        (RequestEnvelope::new(serial, kind, vec![], completion), rx)
    }

    fn kinds(sent: &Sent) -> Vec<RequestKind> {
        sent.lock().unwrap().iter().map(|e| e.kind()).collect()
    }

    fn complete_first(sent: &Sent) {
        let envelope = sent.lock().unwrap().remove(0);
        envelope.complete(Ok(()));
    }

    #[test]
    fn test_one_request_in_flight_at_a_time() {
        let (gate, sent) = gate(DEFAULT_QUEUE_LIMIT);
        let (start, _a) = envelope(1, RequestKind::DtmfStart);
        let (hold, _b) = envelope(2, RequestKind::SwitchWaitingOrHoldingAndActive);

        gate.submit(start);
        gate.submit(hold);
        assert_eq!(kinds(&sent), vec![RequestKind::DtmfStart]);
        assert_eq!(gate.tone(), ToneState::Started);

        complete_first(&sent);
        assert_eq!(
            kinds(&sent),
            vec![RequestKind::SwitchWaitingOrHoldingAndActive]
        );
        complete_first(&sent);
        assert_eq!(gate.snapshot().in_flight, None);
    }

    #[tokio::test]
    async fn test_stop_supersedes_queued_start() {
        let (gate, sent) = gate(DEFAULT_QUEUE_LIMIT);
        let (first_start, _a) = envelope(1, RequestKind::DtmfStart);
        let (second_start, second_rx) = envelope(2, RequestKind::DtmfStart);
        let (stop, _c) = envelope(3, RequestKind::DtmfStop);

        gate.submit(first_start);
        gate.submit(second_start);
        gate.submit(stop);

        assert_eq!(
            second_rx.await.unwrap(),
            Err(RequestError::Superseded {
                kind: RequestKind::DtmfStart
            })
        );
        assert_eq!(gate.snapshot().queued, vec![RequestKind::DtmfStop]);

        complete_first(&sent);
        assert_eq!(kinds(&sent), vec![RequestKind::DtmfStop]);
        assert_eq!(gate.tone(), ToneState::Idle);
        assert_eq!(gate.snapshot().superseded, 1);
    }

    #[tokio::test]
    async fn test_in_flight_start_is_not_superseded() {
        let (gate, sent) = gate(DEFAULT_QUEUE_LIMIT);
        let (start, _a) = envelope(1, RequestKind::DtmfStart);
        let (stop, _b) = envelope(2, RequestKind::DtmfStop);

        gate.submit(start);
        gate.submit(stop);
        assert_eq!(gate.snapshot().superseded, 0);
        complete_first(&sent);
        assert_eq!(kinds(&sent), vec![RequestKind::DtmfStop]);
    }

    #[tokio::test]
    async fn test_full_queue_rejects() {
        let (gate, _sent) = gate(1);
        let (a, _a) = envelope(1, RequestKind::Conference);
        let (b, _b) = envelope(2, RequestKind::Conference);
        let (c, c_rx) = envelope(3, RequestKind::Conference);

        gate.submit(a);
        gate.submit(b);
        gate.submit(c);
        assert_eq!(
            c_rx.await.unwrap(),
            Err(RequestError::QueueFull {
                kind: RequestKind::Conference
            })
        );
        assert_eq!(gate.snapshot().rejected, 1);
    }

    #[tokio::test]
    async fn test_failure_still_advances() {
        let (gate, sent) = gate(DEFAULT_QUEUE_LIMIT);
        let (a, a_rx) = envelope(1, RequestKind::DtmfStart);
        let (b, _b) = envelope(2, RequestKind::DtmfStop);
        gate.submit(a);
        gate.submit(b);

        let first = sent.lock().unwrap().remove(0);
        first.complete(Err(RequestError::TransportUnavailable));
        assert_eq!(a_rx.await.unwrap(), Err(RequestError::TransportUnavailable));
        assert_eq!(kinds(&sent), vec![RequestKind::DtmfStop]);
    }

    #[test]
    fn test_ungated_kinds() {
        let (gate, _sent) = gate(DEFAULT_QUEUE_LIMIT);
        assert!(!gate.handles(RequestKind::Dtmf));
        assert!(gate.handles(RequestKind::Conference));
        assert!(!gate.handles(RequestKind::Dial));
    }
}
