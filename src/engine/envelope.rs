//! One outbound request and its completion

use crate::error::RequestError;
use crate::protocol::{RequestKind, Serial};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

pub type RequestResult<R> = Result<R, RequestError<R>>;

/// Where a request's single terminal outcome goes.
pub enum Completion<R> {
    Channel(oneshot::Sender<RequestResult<R>>),
    Callback(Box<dyn FnOnce(RequestResult<R>) + Send>),
    /// Fire-and-forget. Errors are logged and dropped.
    None,
}

impl<R> Completion<R> {
    pub fn callback<F>(f: F) -> Self
    where
        F: FnOnce(RequestResult<R>) + Send + 'static,
    {
        Completion::Callback(Box::new(f))
    }

    pub fn channel() -> (Self, oneshot::Receiver<RequestResult<R>>) {
        let (tx, rx) = oneshot::channel();
        (Completion::Channel(tx), rx)
    }

    pub(crate) fn deliver(self, result: RequestResult<R>) {
        match self {
            Completion::Channel(tx) => {
                if tx.send(result).is_err() {
                    tracing::debug!("caller stopped waiting");
                }
            }
            Completion::Callback(callback) => {
                if catch_unwind(AssertUnwindSafe(|| callback(result))).is_err() {
                    tracing::error!("completion callback panicked");
                }
            }
            Completion::None => {
                if let Err(e) = result {
                    tracing::debug!(error = %e, "fire-and-forget request failed");
                }
            }
        }
    }
}

impl<R> fmt::Debug for Completion<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Completion::Channel(_) => f.write_str("Channel"),
            Completion::Callback(_) => f.write_str("Callback"),
            Completion::None => f.write_str("None"),
        }
    }
}

/// Whether this envelope currently accounts for one wake lock unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceTag {
    None,
    /// Held since the accountant's `generation`; a forced release bumps the
    /// generation, which turns older tags stale.
    Held { generation: u64 },
}

#[derive(Debug)]
pub struct RequestEnvelope<R> {
    serial: Serial,
    kind: RequestKind,
    payload: Option<Vec<u8>>,
    completion: Completion<R>,
    created_at: Instant,
    pub(crate) resource: ResourceTag,
}

impl<R> RequestEnvelope<R> {
    pub fn new(
        serial: Serial,
        kind: RequestKind,
        payload: Vec<u8>,
        completion: Completion<R>,
    ) -> Self {
        Self {
            serial,
            kind,
            payload: Some(payload),
            completion,
            created_at: Instant::now(),
            resource: ResourceTag::None,
        }
    }

    pub fn serial(&self) -> Serial {
        self.serial
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn resource(&self) -> ResourceTag {
        self.resource
    }

    /// Hand the encoded payload to the writer. The envelope keeps nothing.
    pub fn take_payload(&mut self) -> Option<Vec<u8>> {
        self.payload.take()
    }

    /// Deliver the terminal outcome. Consumes the envelope so it can only happen once.
    pub(crate) fn complete(self, result: RequestResult<R>) {
        tracing::trace!(
            serial = self.serial,
            kind = %self.kind,
            ok = result.is_ok(),
            "completing request"
        );
        self.completion.deliver(result);
    }

    /// Swap the completion for one built around the current one.
    pub(crate) fn map_completion(
        mut self,
        f: impl FnOnce(Completion<R>) -> Completion<R>,
    ) -> Self {
        let current = std::mem::replace(&mut self.completion, Completion::None);
        self.completion = f(current);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_payload_is_handed_over_once() {
        let mut env: RequestEnvelope<()> =
            RequestEnvelope::new(3, RequestKind::Dial, vec![1, 2], Completion::None);
        assert_eq!(env.take_payload(), Some(vec![1, 2]));
        assert_eq!(env.take_payload(), None);
    }

    #[tokio::test]
    async fn test_channel_completion() {
        let (completion, rx) = Completion::channel();
        let env = RequestEnvelope::new(1, RequestKind::Operator, vec![], completion);
        env.complete(Ok(42u32));
        assert_eq!(rx.await.unwrap(), Ok(42));
    }

    #[test]
    fn test_callback_completion_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let env: RequestEnvelope<()> = RequestEnvelope::new(
            1,
            RequestKind::Hangup,
            vec![],
            Completion::callback(move |result| {
                assert_eq!(result, Err(RequestError::TransportUnavailable));
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );
        env.complete(Err(RequestError::TransportUnavailable));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
