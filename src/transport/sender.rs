//! Single writer task
//!
//! Everything that goes out on the socket passes through one FIFO queue, so
//! frames never interleave. The connection task hands the write half over
//! with [`Outbound::Attach`] and takes it back with [`Outbound::Detach`].

use super::codec::FrameCodec;
use crate::engine::Core;
use crate::engine::envelope::RequestEnvelope;
use crate::engine::pending::DuplicateSerial;
use crate::error::RequestError;
use crate::payload::PayloadCodec;
use crate::protocol::{RESPONSE_ACKNOWLEDGEMENT, request_body};
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

pub enum Outbound<R> {
    Request(RequestEnvelope<R>),
    Ack,
    Attach {
        writer: BoxedWriter,
        epoch: u64,
        connection: CancellationToken,
    },
    Detach {
        epoch: u64,
    },
}

impl<R> std::fmt::Debug for Outbound<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outbound::Request(envelope) => f
                .debug_struct("Request")
                .field("serial", &envelope.serial())
                .field("kind", &envelope.kind())
                .finish(),
            Outbound::Ack => f.write_str("Ack"),
            Outbound::Attach { epoch, .. } => {
                f.debug_struct("Attach").field("epoch", epoch).finish()
            }
            Outbound::Detach { epoch } => f.debug_struct("Detach").field("epoch", epoch).finish(),
        }
    }
}

struct Attached {
    writer: BoxedWriter,
    epoch: u64,
    connection: CancellationToken,
}

pub struct Sender<C: PayloadCodec> {
    core: Arc<Core<C>>,
    queue: mpsc::UnboundedReceiver<Outbound<C::Response>>,
    frames: FrameCodec,
    attached: Option<Attached>,
}

impl<C: PayloadCodec> Sender<C> {
    pub fn new(
        core: Arc<Core<C>>,
        queue: mpsc::UnboundedReceiver<Outbound<C::Response>>,
        frames: FrameCodec,
    ) -> Self {
        Self {
            core,
            queue,
            frames,
            attached: None,
        }
    }

    pub async fn run(mut self) {
        let shutdown = self.core.shutdown.clone();
        loop {
            let message = tokio::select! {
                _ = shutdown.cancelled() => break,
                message = self.queue.recv() => message,
            };
            match message {
                Some(message) => self.handle(message).await,
                None => break,
            }
        }
        self.stop();
    }

    async fn handle(&mut self, message: Outbound<C::Response>) {
        match message {
            Outbound::Request(envelope) => self.send_request(envelope).await,
            Outbound::Ack => self.send_ack().await,
            Outbound::Attach {
                writer,
                epoch,
                connection,
            } => {
                tracing::debug!(epoch, "writer attached");
                self.attached = Some(Attached {
                    writer,
                    epoch,
                    connection,
                });
            }
            Outbound::Detach { epoch } => {
                if self.attached.as_ref().is_some_and(|a| a.epoch == epoch) {
                    tracing::debug!(epoch, "writer detached");
                    self.attached = None;
                }
                self.core.drain_all(|| RequestError::TransportUnavailable);
            }
        }
    }

    async fn send_request(&mut self, mut envelope: RequestEnvelope<C::Response>) {
        let (serial, kind) = (envelope.serial(), envelope.kind());
        let Some(attached) = self.attached.as_mut() else {
            tracing::debug!(serial, %kind, "no connection, failing request");
            self.core.retire(envelope, Err(RequestError::TransportUnavailable));
            return;
        };

        let payload = envelope.take_payload().unwrap_or_default();
        let body = request_body(kind, serial, &payload);
        let max = self.frames.max_outbound();
        if body.len() > max {
            tracing::warn!(serial, %kind, len = body.len(), max, "request too large");
            self.core.retire(
                envelope,
                Err(RequestError::Oversize {
                    kind,
                    len: body.len(),
                    max,
                }),
            );
            return;
        }

        self.core.accountant.acquire_for(&mut envelope);
        if let Err(DuplicateSerial(envelope)) = self.core.table.insert(envelope) {
            tracing::error!(serial, %kind, "serial already pending, request not sent");
            self.core.retire(envelope, Err(RequestError::TransportUnavailable));
            return;
        }
        self.core.arm_blocking_timeout(serial, kind);

        tracing::debug!(serial, %kind, len = payload.len(), "sending request");
        if let Err(e) = self.frames.write_frame(&mut attached.writer, &body).await {
            tracing::warn!(serial, %kind, error = %e, "write failed, dropping connection");
            if let Some(envelope) = self.core.table.remove(serial) {
                self.core.retire(envelope, Err(RequestError::TransportUnavailable));
            }
            self.teardown();
        }
    }

    async fn send_ack(&mut self) {
        let Some(attached) = self.attached.as_mut() else {
            tracing::debug!("no connection, ack dropped");
            return;
        };
        self.core.accountant.acquire_ack();
        let body = RESPONSE_ACKNOWLEDGEMENT.to_le_bytes();
        if let Err(e) = self.frames.write_frame(&mut attached.writer, &body).await {
            tracing::warn!(error = %e, "ack write failed, dropping connection");
            self.teardown();
        }
    }

    /// Drop the writer and tell the connection to stop reading.
    fn teardown(&mut self) {
        if let Some(attached) = self.attached.take() {
            attached.connection.cancel();
        }
    }

    fn stop(&mut self) {
        self.teardown();
        self.queue.close();
        while let Ok(message) = self.queue.try_recv() {
            if let Outbound::Request(envelope) = message {
                self.core.retire(envelope, Err(RequestError::Abandoned));
            }
        }
        self.core.drain_all(|| RequestError::Abandoned);
        tracing::debug!("sender stopped");
    }
}
