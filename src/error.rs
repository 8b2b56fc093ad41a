//! Top-Level Error Type
//!
//! One `thiserror` enum composing every module's error type via `#[from]`,
//! the way the teacher composes `WorkflowError` out of `ListenerError`,
//! `BlobStoreError`, and `CargoRefParseError`.

use uuid::Uuid;

use crate::graph::GraphError;
use crate::provider::ProviderError;

/// Errors surfaced by the engine's public API.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("graph validation failed: {0}")]
    Graph(#[from] GraphError),

    #[error("unknown campaign: {0}")]
    UnknownCampaign(Uuid),

    #[error("unknown lead: {0}")]
    UnknownLead(Uuid),

    #[error("lead {lead} is not attached to campaign {campaign}")]
    LeadNotInCampaign { campaign: Uuid, lead: Uuid },

    #[error("connected account could not be resolved for campaign {0}")]
    AccountUnresolved(Uuid),

    #[error("provider error: {0:?}")]
    Provider(ProviderError),

    #[error("permanent failure on step {step_index}: {detail}")]
    Permanent { step_index: u32, detail: String },

    #[error("store error: {0}")]
    Store(String),

    #[cfg(feature = "database")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<ProviderError> for EngineError {
    fn from(e: ProviderError) -> Self {
        EngineError::Provider(e)
    }
}
