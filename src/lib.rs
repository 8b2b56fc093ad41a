//! Durable Per-Lead Outreach Workflow Engine
//!
//! Interprets a campaign graph (§3 `WorkflowGraph`) as a long-running,
//! restart-safe computation: one [`workflow::run_lead_workflow`] per lead,
//! supervised by a [`orchestrator`] that spawns them with a staggered
//! start and bounded concurrency. Each node execution goes through a
//! [`provider::Provider`] adapter, is normalized by the [`classifier`]
//! into a [`classifier::Verdict`], and is recorded exactly once in the
//! [`ledger::StepLedger`].
//!
//! CSV import, account CRUD, the workflow-graph editor, authentication,
//! and webhook receiving are external collaborators (§1) — this crate
//! only defines the narrow port traits ([`store::LeadStore`],
//! [`store::CampaignStore`], [`runtime::DurableContext`]) those systems
//! satisfy.

mod classifier;
mod config;
mod connection;
mod error;
mod executors;
mod graph;
mod ledger;
mod model;
mod orchestrator;
mod provider;
mod quota;
mod runtime;
mod store;
mod window;
mod workflow;

pub use classifier::{classify, Verdict};
pub use config::EngineConfig;
pub use connection::{poll_interval, run as run_connection_request, ConnectionState};
pub use error::EngineError;
pub use executors::{
    execute_comment_post, execute_like_post, execute_profile_visit, execute_send_connection_request, execute_send_followup,
    execute_send_inmail, execute_webhook, execute_withdraw_request, LiteralFallbackMessageGenerator, MessageGenerator, NodeOutcome,
    TemplateMessageGenerator,
};
pub use graph::{Branch, ConditionSpec, Delay, DelayUnit, EdgeSpec, GraphError, NodeKind, NodeSpec, RawWorkflowGraph, WorkflowGraph};
pub use ledger::{InMemoryStepLedger, LedgerError, StepLedger};
pub use model::{
    Campaign, CampaignStatus, ConnectedAccount, ConnectedAccountStatus, Lead, LeadName, LeadStatus, QuotaState, ScheduleWindow,
    StepLedgerEntry, StepResultPayload,
};
pub use orchestrator::{spawn as spawn_orchestrator, CampaignStatusSnapshot, OrchestratorHandle, OrchestratorSignal};
pub use provider::{extract_public_identifier, HttpProvider, Provider, ProviderError, ProviderResponse, SentInvitation};
pub use quota::{evaluate as evaluate_quota, InMemoryQuotaGate, QuotaCheck, QuotaError, QuotaGate};
pub use runtime::{sleep_fn, BoxSleepFn, BoxedChildFuture, DurableContext, LocalDurableContext};
pub use store::{CampaignStore, InMemoryCampaignStore, InMemoryLeadStore, LeadStore, StoreError};
pub use window::{check as check_time_window, TimeWindow, WindowCheck, WindowError};
pub use workflow::{run_lead_workflow, WorkflowContext};

#[cfg(feature = "database")]
pub use ledger::PgStepLedger;
#[cfg(feature = "database")]
pub use quota::PgQuotaGate;
