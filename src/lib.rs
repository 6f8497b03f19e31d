//! Command/response transport to a radio modem process
//!
//! Requests are framed onto a local socket, correlated with their responses by
//! serial number, and completed exactly once. Unsolicited events fan out to
//! subscribers. The connection is re-established forever when the modem
//! restarts; everything pending at the time fails with
//! [`RequestError::TransportUnavailable`].

pub mod config;
pub mod engine;
pub mod error;
pub mod link;
pub mod payload;
pub mod protocol;
pub mod transport;

pub use config::LinkConfig;
pub use engine::accountant::{LocalWakeLock, WakeLock};
pub use engine::diagnostics::LinkDump;
pub use engine::envelope::Completion;
pub use engine::events::{Subscription, SubscriptionId};
pub use engine::policy::{PolicyTable, QuirkCondition};
pub use error::{CodecError, RequestError};
pub use link::gate::{GateRole, GateRules, ToneState};
pub use link::{Link, LinkBuilder, PendingResponse};
pub use payload::{PayloadCodec, RawCodec};
pub use protocol::{ErrorCode, EventKind, RequestKind, Serial};
pub use transport::{Endpoint, LinkState};
