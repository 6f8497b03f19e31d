//! Per-kind compatibility rules
//!
//! Two tables. Quirks turn a known-benign error into the codec's default result
//! for a kind; blocking kinds are force-completed when the modem is slow to
//! answer. Both are consulted once per request and can be replaced wholesale
//! when building a link.

use crate::protocol::{ErrorCode, RequestKind};
use std::collections::HashMap;
use std::time::Duration;

/// Default wait for kinds the stack must not stall on.
pub const DEFAULT_BLOCKING_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuirkCondition {
    Error(ErrorCode),
    AnyError,
}

impl QuirkCondition {
    fn matches(self, error: ErrorCode) -> bool {
        match self {
            QuirkCondition::Error(code) => code == error,
            QuirkCondition::AnyError => !error.is_success(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuirkAction {
    SynthesizeDefault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quirk {
    pub kind: RequestKind,
    pub condition: QuirkCondition,
    pub action: QuirkAction,
}

#[derive(Debug, Clone, Default)]
pub struct PolicyTable {
    quirks: Vec<Quirk>,
    blocking: HashMap<RequestKind, Duration>,
}

impl PolicyTable {
    /// Empty table: every error is delivered as-is and nothing times out.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rules the stack depends on for known modem behavior.
    pub fn standard(blocking_timeout: Duration) -> Self {
        let mut table = Self::new()
            .with_quirk(
                RequestKind::GetRadioCapability,
                QuirkCondition::Error(ErrorCode::REQUEST_NOT_SUPPORTED),
            )
            .with_quirk(
                RequestKind::GetRadioCapability,
                QuirkCondition::Error(ErrorCode::GENERIC_FAILURE),
            )
            .with_quirk(RequestKind::GetActivityInfo, QuirkCondition::AnyError);

        for kind in [
            RequestKind::GetActivityInfo,
            RequestKind::PullLceData,
            RequestKind::StartLce,
            RequestKind::StopLce,
        ] {
            table = table.with_blocking(kind, blocking_timeout);
        }
        table
    }

    pub fn with_quirk(mut self, kind: RequestKind, condition: QuirkCondition) -> Self {
        self.quirks.push(Quirk {
            kind,
            condition,
            action: QuirkAction::SynthesizeDefault,
        });
        self
    }

    pub fn with_blocking(mut self, kind: RequestKind, timeout: Duration) -> Self {
        self.blocking.insert(kind, timeout);
        self
    }

    pub fn quirk_for(&self, kind: RequestKind, error: ErrorCode) -> Option<QuirkAction> {
        self.quirks
            .iter()
            .find(|quirk| quirk.kind == kind && quirk.condition.matches(error))
            .map(|quirk| quirk.action)
    }

    pub fn blocking_timeout(&self, kind: RequestKind) -> Option<Duration> {
        self.blocking.get(&kind).copied()
    }
}
