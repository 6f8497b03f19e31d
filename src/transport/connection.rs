//! Connect, read and reconnect loop
//!
//! One task per link. It connects to the modem endpoint, retrying forever on a
//! fixed interval, hands the write half to the sender and reads frames until
//! the socket dies. Every disconnect fails whatever was still pending.

use super::codec::FrameCodec;
use super::sender::Outbound;
use super::{Endpoint, LinkState};
use crate::engine::Core;
use crate::engine::dispatcher::Dispatcher;
use crate::error::RequestError;
use crate::payload::PayloadCodec;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::UnixStream;

/// Default wait between connection attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(4);

/// Failed attempts logged before retries go quiet.
pub const DEFAULT_RETRY_LOG_THRESHOLD: u32 = 8;

pub struct TransportConnection<C: PayloadCodec> {
    core: Arc<Core<C>>,
    endpoint: Endpoint,
    frames: FrameCodec,
    retry_interval: Duration,
    retry_log_threshold: u32,
}

impl<C: PayloadCodec> TransportConnection<C> {
    pub fn new(core: Arc<Core<C>>, endpoint: Endpoint, frames: FrameCodec) -> Self {
        Self {
            core,
            endpoint,
            frames,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            retry_log_threshold: DEFAULT_RETRY_LOG_THRESHOLD,
        }
    }

    pub fn with_retry(mut self, interval: Duration, log_threshold: u32) -> Self {
        self.retry_interval = interval;
        self.retry_log_threshold = log_threshold;
        self
    }

    pub async fn run(self) {
        let mut epoch = 0u64;
        while let Some(stream) = self.connect_with_retry().await {
            epoch += 1;
            self.serve(stream, epoch).await;
            self.disconnected(epoch);
            if self.core.shutdown.is_cancelled() {
                break;
            }
        }
        self.core.set_state(LinkState::Disconnected);
        tracing::debug!(endpoint = %self.endpoint, "connection task stopped");
    }

    /// `None` once the link is shut down.
    async fn connect_with_retry(&self) -> Option<UnixStream> {
        let mut failures = 0u32;
        loop {
            if self.core.shutdown.is_cancelled() {
                return None;
            }
            self.core.set_state(LinkState::Connecting);
            self.core.note_connect_attempt();

            match self.endpoint.connect().await {
                Ok(stream) => {
                    tracing::info!(
                        endpoint = %self.endpoint,
                        attempts = failures + 1,
                        "connected to modem"
                    );
                    return Some(stream);
                }
                Err(e) => {
                    failures += 1;
                    if failures < self.retry_log_threshold {
                        tracing::info!(
                            endpoint = %self.endpoint,
                            attempt = failures,
                            error = %e,
                            "couldn't connect, retrying in {}ms",
                            self.retry_interval.as_millis()
                        );
                    } else if failures == self.retry_log_threshold {
                        tracing::error!(
                            endpoint = %self.endpoint,
                            attempt = failures,
                            error = %e,
                            "couldn't connect, continuing to retry silently"
                        );
                    }
                }
            }

            tokio::select! {
                _ = self.core.shutdown.cancelled() => return None,
                _ = tokio::time::sleep(self.retry_interval) => {}
            }
        }
    }

    async fn serve(&self, stream: UnixStream, epoch: u64) {
        let (reader, writer) = stream.into_split();
        let connection = self.core.shutdown.child_token();
        let attached = self.core.enqueue(Outbound::Attach {
            writer: Box::new(writer),
            epoch,
            connection: connection.clone(),
        });
        if !attached {
            return;
        }
        self.core.note_connected();
        self.core.set_state(LinkState::Connected);

        let dispatcher = Dispatcher::new(Arc::clone(&self.core));
        let mut reader = BufReader::new(reader);
        loop {
            let frame = tokio::select! {
                _ = connection.cancelled() => {
                    tracing::debug!(epoch, "connection cancelled");
                    break;
                }
                frame = self.frames.read_frame(&mut reader) => frame,
            };
            match frame {
                Ok(Some(body)) => dispatcher.dispatch_logged(&body),
                Ok(None) => {
                    tracing::warn!(endpoint = %self.endpoint, "modem closed the socket");
                    break;
                }
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(error = %e, "dropping frame");
                }
                Err(e) => {
                    tracing::warn!(endpoint = %self.endpoint, error = %e, "read failed");
                    break;
                }
            }
        }
        connection.cancel();
    }

    fn disconnected(&self, epoch: u64) {
        self.core.set_state(LinkState::Disconnected);
        self.core.serials.reset();
        self.core.enqueue(Outbound::Detach { epoch });
        if self.core.shutdown.is_cancelled() {
            self.core.drain_all(|| RequestError::Abandoned);
        } else {
            self.core.drain_all(|| RequestError::TransportUnavailable);
        }
    }
}
