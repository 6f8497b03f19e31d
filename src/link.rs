//! Public facade
//!
//! A [`Link`] owns the sender and connection tasks for one modem endpoint.
//! Callers issue requests and subscribe to events; nothing here blocks.
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use rilink::{Link, LinkConfig, RawCodec, RequestKind};
//!
//! let link = Link::spawn(LinkConfig::default(), RawCodec);
//! let version = link.request(RequestKind::BasebandVersion, &Vec::new()).await?;
//! println!("{}", String::from_utf8_lossy(&version));
//! link.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod gate;

use crate::config::LinkConfig;
use crate::engine::Core;
use crate::engine::accountant::{ResourceAccountant, WakeLock};
use crate::engine::diagnostics::LinkDump;
use crate::engine::envelope::{Completion, RequestEnvelope, RequestResult};
use crate::engine::events::{Subscription, SubscriptionId};
use crate::engine::policy::PolicyTable;
use crate::error::RequestError;
use crate::payload::PayloadCodec;
use crate::protocol::{EventKind, RequestKind, Serial};
use crate::transport::codec::FrameCodec;
use crate::transport::connection::TransportConnection;
use crate::transport::sender::Sender;
use crate::transport::{Endpoint, LinkState};
use gate::{Gate, GateRules, ToneState};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

/// Future for one issued request.
#[derive(Debug)]
pub struct PendingResponse<R> {
    serial: Serial,
    kind: RequestKind,
    receiver: oneshot::Receiver<RequestResult<R>>,
}

impl<R> PendingResponse<R> {
    pub fn serial(&self) -> Serial {
        self.serial
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }
}

impl<R> Future for PendingResponse<R> {
    type Output = RequestResult<R>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(RequestError::Abandoned)))
    }
}

pub struct LinkBuilder<C: PayloadCodec> {
    config: LinkConfig,
    codec: C,
    endpoint: Option<Endpoint>,
    wake_locks: Option<(Arc<dyn WakeLock>, Arc<dyn WakeLock>)>,
    policy: Option<PolicyTable>,
    gate_rules: GateRules,
}

impl<C: PayloadCodec> LinkBuilder<C> {
    /// Connect here instead of the configured socket.
    pub fn endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    pub fn wake_locks(mut self, main: Arc<dyn WakeLock>, ack: Arc<dyn WakeLock>) -> Self {
        self.wake_locks = Some((main, ack));
        self
    }

    pub fn policy(mut self, policy: PolicyTable) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn gate_rules(mut self, rules: GateRules) -> Self {
        self.gate_rules = rules;
        self
    }

    /// Start the link on the current tokio runtime.
    pub fn spawn(self) -> Link<C> {
        let config = self.config;
        let accountant = match self.wake_locks {
            Some((main, ack)) => ResourceAccountant::new(
                main,
                ack,
                config.wake_lock_timeout(),
                config.ack_wake_lock_timeout(),
            ),
            None => ResourceAccountant::local(
                config.wake_lock_timeout(),
                config.ack_wake_lock_timeout(),
            ),
        };
        let policy = self
            .policy
            .unwrap_or_else(|| PolicyTable::standard(config.blocking_response_timeout()));
        let (core, queue) = Core::new(self.codec, accountant, policy);

        let forward_core = Arc::clone(&core);
        let gate = Gate::new(self.gate_rules, config.dtmf_queue_limit, move |envelope| {
            forward_core.submit(envelope)
        });

        let frames = FrameCodec::new(config.max_inbound_frame, config.max_outbound_frame);
        let endpoint = self.endpoint.unwrap_or_else(|| config.endpoint());
        tracing::info!(%endpoint, instance = %core.instance(), "starting link");

        let sender = Sender::new(Arc::clone(&core), queue, frames);
        let connection = TransportConnection::new(Arc::clone(&core), endpoint, frames)
            .with_retry(config.retry_interval(), config.retry_log_threshold);
        let tasks = vec![tokio::spawn(sender.run()), tokio::spawn(connection.run())];

        Link {
            core,
            gate,
            tasks: Arc::new(Mutex::new(tasks)),
        }
    }
}

pub struct Link<C: PayloadCodec> {
    core: Arc<Core<C>>,
    gate: Arc<Gate<C::Response>>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl<C: PayloadCodec> Clone for Link<C> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            gate: Arc::clone(&self.gate),
            tasks: Arc::clone(&self.tasks),
        }
    }
}

impl<C: PayloadCodec> Link<C> {
    pub fn builder(config: LinkConfig, codec: C) -> LinkBuilder<C> {
        LinkBuilder {
            config,
            codec,
            endpoint: None,
            wake_locks: None,
            policy: None,
            gate_rules: GateRules::standard(),
        }
    }

    pub fn spawn(config: LinkConfig, codec: C) -> Self {
        Self::builder(config, codec).spawn()
    }

    /// Issue a request with an explicit completion. Returns the serial assigned.
    ///
    /// Every outcome, including an encoding failure, goes to `completion`.
    pub fn issue_with(
        &self,
        kind: RequestKind,
        params: &C::Params,
        completion: Completion<C::Response>,
    ) -> Serial {
        let serial = self.core.serials.next();
        let payload = match self.core.codec.encode(kind, params) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(serial, %kind, error = %e, "failed to encode request");
                completion.deliver(Err(RequestError::EncodeFailure {
                    kind,
                    reason: e.to_string(),
                }));
                return serial;
            }
        };

        let envelope = RequestEnvelope::new(serial, kind, payload, completion);
        if self.gate.handles(kind) {
            self.gate.submit(envelope);
        } else {
            self.core.submit(envelope);
        }
        serial
    }

    pub fn issue(&self, kind: RequestKind, params: &C::Params) -> PendingResponse<C::Response> {
        let (completion, receiver) = Completion::channel();
        let serial = self.issue_with(kind, params, completion);
        PendingResponse {
            serial,
            kind,
            receiver,
        }
    }

    /// Fire-and-forget. Failures are only logged.
    pub fn issue_oneway(&self, kind: RequestKind, params: &C::Params) -> Serial {
        self.issue_with(kind, params, Completion::None)
    }

    pub async fn request(
        &self,
        kind: RequestKind,
        params: &C::Params,
    ) -> RequestResult<C::Response> {
        self.issue(kind, params).await
    }

    pub fn subscribe(&self, kind: EventKind) -> Subscription<C::Event> {
        self.core.events.subscribe(kind)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.core.events.unsubscribe(id)
    }

    pub fn state(&self) -> LinkState {
        self.core.state()
    }

    pub fn state_changes(&self) -> watch::Receiver<LinkState> {
        self.core.state_changes()
    }

    pub fn tone(&self) -> ToneState {
        self.gate.tone()
    }

    pub fn dump(&self) -> LinkDump {
        self.core.dump(self.gate.snapshot())
    }

    /// Stop both tasks. Requests still pending complete with `Abandoned`.
    pub async fn shutdown(&self) {
        self.core.shutdown.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "link task failed");
            }
        }
    }
}
