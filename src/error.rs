//! Error taxonomy for the actor runtime.
//!
//! Three layers: `RegistryError` (startup-fatal registration problems),
//! `StoreError` (persistence failures, always retryable on the next save
//! pass), and `ActorError` (everything a live actor call can surface).

use crate::types::{ActorId, ActorKind};

/// Fatal registration problems detected while building the component registry.
///
/// Any of these aborts startup; a server with a half-wired registry would
/// corrupt state at runtime.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("component {component} registered twice")]
    DuplicateComponent { component: &'static str },

    #[error("agent type already bound to component {component}")]
    DuplicateAgentBinding { component: &'static str },

    #[error("feature {feature} bound to component {component} of non-role kind {kind:?}")]
    FeatureOnNonRole {
        component: &'static str,
        feature: u16,
        kind: ActorKind,
    },

    #[error("no component registered for the requested agent type")]
    UnknownAgent,

    #[error("component {component} is registered to {registered:?}, not {requested:?}")]
    KindMismatch {
        component: &'static str,
        registered: ActorKind,
        requested: ActorKind,
    },
}

/// Persistence-store failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("upsert failed for {kind}/{state_id}: {reason}")]
    UpsertFailed {
        kind: String,
        state_id: u64,
        reason: String,
    },

    #[error("load failed for {kind}/{state_id}: {reason}")]
    LoadFailed {
        kind: String,
        state_id: u64,
        reason: String,
    },

    #[error("stored bytes for {kind}/{state_id} could not be decoded: {reason}")]
    Corrupt {
        kind: String,
        state_id: u64,
        reason: String,
    },

    #[error("serialization failed: {0}")]
    Serialize(String),
}

impl StoreError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        StoreError::Unavailable(msg.into())
    }

    pub fn upsert_failed(kind: impl Into<String>, state_id: u64, reason: impl Into<String>) -> Self {
        StoreError::UpsertFailed {
            kind: kind.into(),
            state_id,
            reason: reason.into(),
        }
    }

    pub fn load_failed(kind: impl Into<String>, state_id: u64, reason: impl Into<String>) -> Self {
        StoreError::LoadFailed {
            kind: kind.into(),
            state_id,
            reason: reason.into(),
        }
    }

    pub fn corrupt(kind: impl Into<String>, state_id: u64, reason: impl Into<String>) -> Self {
        StoreError::Corrupt {
            kind: kind.into(),
            state_id,
            reason: reason.into(),
        }
    }

    /// Whether a later retry of the same operation can succeed.
    ///
    /// Corrupt payloads never heal on retry; everything else is assumed to be
    /// a transient backend condition.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, StoreError::Corrupt { .. })
    }
}

/// Errors surfaced by actor calls and lifecycle operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ActorError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("actor {actor} has no component for the requested agent type")]
    ComponentMissing { actor: ActorId },

    #[error("component {component} of actor {actor} is not active")]
    ComponentInactive {
        actor: ActorId,
        component: &'static str,
    },

    #[error("component {component} of actor {actor} failed to activate: {reason}")]
    ActivationFailed {
        actor: ActorId,
        component: &'static str,
        reason: String,
    },

    #[error("actor {actor} is shutting down")]
    ShuttingDown { actor: ActorId },

    #[error("state downcast failed for component {component}")]
    StateTypeMismatch { component: &'static str },

    #[error("agent hook failed: {0}")]
    Hook(String),
}

impl ActorError {
    pub fn activation_failed(
        actor: ActorId,
        component: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        ActorError::ActivationFailed {
            actor,
            component,
            reason: reason.into(),
        }
    }

    pub fn hook(msg: impl Into<String>) -> Self {
        ActorError::Hook(msg.into())
    }

    /// Activation failures leave the component inactive, so the next
    /// `agent()` call retries from scratch.
    pub fn is_retryable(&self) -> bool {
        match self {
            ActorError::ActivationFailed { .. } => true,
            ActorError::Store(e) => e.is_recoverable(),
            _ => false,
        }
    }
}
