//! Inbound frame dispatch
//!
//! Runs on the connection's read task, one frame at a time, in arrival order.
//! Malformed frames are logged and dropped; nothing a frame contains can end
//! the read loop.

use super::Core;
use super::envelope::RequestResult;
use super::policy::QuirkAction;
use crate::error::{CodecError, DispatchError, RequestError};
use crate::payload::PayloadCodec;
use crate::protocol::{ErrorCode, EventKind, ParcelReader, RequestKind, ResponseType, Serial};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

pub struct Dispatcher<C: PayloadCodec> {
    core: Arc<Core<C>>,
}

impl<C: PayloadCodec> Dispatcher<C> {
    pub fn new(core: Arc<Core<C>>) -> Self {
        Self { core }
    }

    /// Dispatch one frame, logging anything that goes wrong.
    pub fn dispatch_logged(&self, frame: &[u8]) {
        match catch_unwind(AssertUnwindSafe(|| self.dispatch(frame))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, len = frame.len(), "dropping malformed frame"),
            Err(_) => tracing::error!(len = frame.len(), "frame handling panicked, frame dropped"),
        }
    }

    pub fn dispatch(&self, frame: &[u8]) -> Result<(), DispatchError> {
        let mut parcel = ParcelReader::new(frame);
        let raw = parcel.read_i32()?;
        let response_type =
            ResponseType::from_i32(raw).ok_or(DispatchError::UnknownResponseType(raw))?;

        if response_type.expects_ack() {
            self.core.send_ack();
        }

        match response_type {
            ResponseType::Solicited | ResponseType::SolicitedAckExp => self.solicited(parcel),
            ResponseType::SolicitedAck => {
                let serial = parcel.read_i32()?;
                self.acknowledged(serial);
                Ok(())
            }
            ResponseType::Unsolicited | ResponseType::UnsolicitedAckExp => {
                self.unsolicited(parcel)
            }
        }
    }

    fn solicited(&self, mut parcel: ParcelReader<'_>) -> Result<(), DispatchError> {
        let serial = parcel.read_i32()?;
        let error = ErrorCode(parcel.read_i32()?);

        let Some(envelope) = self.core.table.remove(serial) else {
            tracing::warn!(serial, %error, "response for unknown serial dropped");
            return Ok(());
        };

        let kind = envelope.kind();
        self.core.latency.record(kind, envelope.age());
        let result = self.solicited_result(serial, kind, error, parcel.remaining());
        tracing::debug!(serial, %kind, ok = result.is_ok(), "response matched");
        self.core.retire(envelope, result);
        Ok(())
    }

    fn solicited_result(
        &self,
        serial: Serial,
        kind: RequestKind,
        error: ErrorCode,
        body: &[u8],
    ) -> RequestResult<C::Response> {
        if error.is_success() {
            return guarded(|| self.core.codec.decode_response(kind, body)).map_err(|e| {
                tracing::warn!(serial, %kind, error = %e, "failed to decode response");
                RequestError::DecodeFailure {
                    kind,
                    reason: e.to_string(),
                }
            });
        }

        if let Some(QuirkAction::SynthesizeDefault) = self.core.policy.quirk_for(kind, error) {
            if let Some(default) = self.core.codec.default_response(kind) {
                tracing::info!(serial, %kind, %error, "substituting default result");
                return Ok(default);
            }
        }

        // Error replies may still carry a payload; a bad one does not mask the code.
        let response = if body.is_empty() {
            None
        } else {
            guarded(|| self.core.codec.decode_response(kind, body))
                .inspect_err(|e| {
                    tracing::debug!(
                        serial,
                        %kind,
                        %error,
                        reason = %e,
                        "undecodable error payload"
                    );
                })
                .ok()
        };
        Err(RequestError::Remote {
            code: error,
            response,
        })
    }

    fn acknowledged(&self, serial: Serial) {
        let accountant = &self.core.accountant;
        let found = self
            .core
            .table
            .with_entry(serial, |envelope| accountant.release_for(envelope));
        if found.is_none() {
            tracing::debug!(serial, "ack for unknown serial");
        }
    }

    fn unsolicited(&self, mut parcel: ParcelReader<'_>) -> Result<(), DispatchError> {
        let raw = parcel.read_i32()?;
        let kind = EventKind::from_i32(raw).ok_or(DispatchError::UnknownEvent(raw))?;
        let body = parcel.remaining();

        if kind == EventKind::RilConnected {
            self.record_remote_version(body);
        }

        let event = guarded(|| self.core.codec.decode_event(kind, body)).map_err(|e| {
            DispatchError::EventDecode {
                kind,
                reason: e.to_string(),
            }
        })?;
        let delivered = self.core.events.broadcast(kind, &event);
        tracing::debug!(%kind, delivered, "event");
        Ok(())
    }

    /// `[count][version]...`; anything shorter is ignored.
    fn record_remote_version(&self, body: &[u8]) {
        let mut parcel = ParcelReader::new(body);
        match (parcel.read_i32(), parcel.read_i32()) {
            (Ok(count), Ok(version)) if count >= 1 => {
                tracing::info!(version, "modem connected");
                self.core.set_remote_version(version);
            }
            _ => tracing::debug!(len = body.len(), "connect event without version"),
        }
    }
}

/// Run a codec call, turning a panic into a codec error.
fn guarded<T>(f: impl FnOnce() -> Result<T, CodecError>) -> Result<T, CodecError> {
    catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|_| Err(CodecError::Invalid("codec panicked".to_string())))
}
