use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ReadinessState {
    #[default]
    Ready,
    Blocked(String),
}

/// Shared readiness signal.
///
/// Only the credential bootstrap writes a blocking reason; refresh cycle
/// failures never change it. An empty reason means ready.
#[derive(Debug, Clone, Default)]
pub struct Readiness {
    state: Arc<RwLock<ReadinessState>>,
}

impl Readiness {
    pub fn blocked(reason: impl Into<String>) -> Self {
        let readiness = Self::default();
        readiness.set_blocked(reason);
        readiness
    }

    pub fn set_blocked(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if reason.is_empty() {
            self.set_ready();
            return;
        }

        debug!("readiness blocked: {}", reason);
        *self.state.write().unwrap_or_else(PoisonError::into_inner) =
            ReadinessState::Blocked(reason);
    }

    pub fn set_ready(&self) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = ReadinessState::Ready;
    }

    pub fn state(&self) -> ReadinessState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The blocking reason, or "" when ready.
    pub fn reason(&self) -> String {
        match self.state() {
            ReadinessState::Ready => String::new(),
            ReadinessState::Blocked(reason) => reason,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ReadinessState::Ready
    }
}
