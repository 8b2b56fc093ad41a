//! Campaign Orchestrator (C8)
//!
//! Spawns one Lead Workflow per lead with a staggered offset, bounded by
//! `max_concurrent_leads` concurrently-running children, and reacts to
//! pause/resume/stop operator signals (§4.9). Modeled on the teacher's
//! `TaskQueueListener::run` poll loop: a `tokio::select!` racing a sleep
//! against a `watch::Receiver`, except the channel here carries a
//! three-way operator signal instead of a bare shutdown bool.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::model::{Campaign, CampaignStatus};
use crate::workflow::{run_lead_workflow, WorkflowContext};

/// Operator control messages (§6 `PauseCampaign`/`ResumeCampaign`/
/// `StopCampaign`).
#[derive(Debug, Clone)]
pub enum OrchestratorSignal {
    Idle,
    Pause { reason: Option<String> },
    Resume,
    /// `complete_current = true`: stop spawning, let running leads finish
    /// (abandon). `complete_current = false`: stop spawning and cancel
    /// running leads immediately (§4.9.5).
    Stop { complete_current: bool, reason: Option<String> },
}

#[derive(Default)]
struct Counters {
    total: AtomicU32,
    processed: AtomicU32,
    success: AtomicU32,
    fail: AtomicU32,
    end_time: std::sync::Mutex<Option<DateTime<Utc>>>,
}

/// Query response mirroring §6's `CampaignStatus` query.
#[derive(Debug, Clone)]
pub struct CampaignStatusSnapshot {
    pub total_leads: u32,
    pub processed: u32,
    pub success: u32,
    pub fail: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

/// A running (or finished) orchestrator run: the caller holds this handle
/// to send signals and query status while `run` executes to completion
/// in the background.
pub struct OrchestratorHandle {
    signal_tx: watch::Sender<OrchestratorSignal>,
    counters: Arc<Counters>,
    start_time: DateTime<Utc>,
    join: JoinHandle<Result<(), EngineError>>,
}

impl OrchestratorHandle {
    pub fn pause(&self, reason: Option<String>) {
        let _ = self.signal_tx.send(OrchestratorSignal::Pause { reason });
    }

    pub fn resume(&self) {
        let _ = self.signal_tx.send(OrchestratorSignal::Resume);
    }

    pub fn stop(&self, complete_current: bool, reason: Option<String>) {
        let _ = self.signal_tx.send(OrchestratorSignal::Stop { complete_current, reason });
    }

    pub fn status(&self) -> CampaignStatusSnapshot {
        CampaignStatusSnapshot {
            total_leads: self.counters.total.load(Ordering::SeqCst),
            processed: self.counters.processed.load(Ordering::SeqCst),
            success: self.counters.success.load(Ordering::SeqCst),
            fail: self.counters.fail.load(Ordering::SeqCst),
            start_time: self.start_time,
            end_time: *self.counters.end_time.lock().expect("counters mutex is never poisoned"),
        }
    }

    /// Wait for the orchestrator run to finish (all spawned leads
    /// terminated, §4.9.5).
    pub async fn join(self) -> Result<(), EngineError> {
        self.join.await.expect("orchestrator task panicked")
    }
}

/// Start orchestrating a campaign's leads in the background. Returns
/// immediately with a handle; the spawn loop itself runs as a detached
/// task via `ctx.runtime`.
pub fn spawn(
    ctx: Arc<WorkflowContext>,
    campaign: Campaign,
    max_concurrent_leads: u32,
    lead_stagger: Duration,
) -> OrchestratorHandle {
    let (signal_tx, signal_rx) = watch::channel(OrchestratorSignal::Idle);
    let counters = Arc::new(Counters::default());
    let start_time = Utc::now();

    let task_ctx = ctx.clone();
    let task_counters = counters.clone();
    let join = tokio::spawn(run(task_ctx, campaign, signal_rx, max_concurrent_leads, lead_stagger, task_counters));

    OrchestratorHandle {
        signal_tx,
        counters,
        start_time,
        join,
    }
}

enum SpawnDecision {
    Proceed,
    Stop { cancel_children: bool },
}

/// Block until it is time to spawn the next lead, or until a stop signal
/// arrives. Pausing suspends the stagger clock entirely; resuming
/// restarts it from a full stagger interval.
async fn await_next_slot(signal_rx: &mut watch::Receiver<OrchestratorSignal>, stagger: Duration, paused: &mut bool) -> SpawnDecision {
    loop {
        if *paused {
            if signal_rx.changed().await.is_err() {
                return SpawnDecision::Stop { cancel_children: true };
            }
        } else {
            tokio::select! {
                _ = tokio::time::sleep(stagger) => return SpawnDecision::Proceed,
                changed = signal_rx.changed() => {
                    if changed.is_err() {
                        return SpawnDecision::Stop { cancel_children: true };
                    }
                }
            }
        }

        let signal = signal_rx.borrow().clone();
        match signal {
            OrchestratorSignal::Idle => {}
            OrchestratorSignal::Pause { reason } => {
                info!(?reason, "campaign orchestrator paused, spawning suspended");
                *paused = true;
            }
            OrchestratorSignal::Resume => {
                info!("campaign orchestrator resumed");
                *paused = false;
            }
            OrchestratorSignal::Stop { complete_current, reason } => {
                warn!(?reason, complete_current, "campaign orchestrator stopping");
                return SpawnDecision::Stop {
                    cancel_children: !complete_current,
                }
            }
        }
    }
}

async fn run(
    ctx: Arc<WorkflowContext>,
    campaign: Campaign,
    mut signal_rx: watch::Receiver<OrchestratorSignal>,
    max_concurrent_leads: u32,
    lead_stagger: Duration,
    counters: Arc<Counters>,
) -> Result<(), EngineError> {
    let leads = ctx
        .lead_store
        .list_for_campaign(campaign.campaign_id)
        .await
        .map_err(|e| EngineError::Store(e.to_string()))?;

    let semaphore = Arc::new(tokio::sync::Semaphore::new(max_concurrent_leads as usize));
    let mut handles: Vec<JoinHandle<()>> = Vec::new();
    let mut paused = false;
    let mut cancel_on_exit = false;

    for lead in leads {
        match await_next_slot(&mut signal_rx, lead_stagger, &mut paused).await {
            SpawnDecision::Stop { cancel_children } => {
                cancel_on_exit = cancel_children;
                break;
            }
            SpawnDecision::Proceed => {}
        }

        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore is never closed while the orchestrator owns it");

        counters.total.fetch_add(1, Ordering::SeqCst);
        info!(campaign_id = %campaign.campaign_id, lead_id = %lead.lead_id, "spawning lead workflow");

        let lead_ctx = ctx.clone();
        let lead_campaign = campaign.clone();
        let lead_counters = counters.clone();
        let lead_id = lead.lead_id;

        let handle = ctx.runtime.start_child(Box::pin(async move {
            let _permit = permit;
            let result = run_lead_workflow(&lead_ctx, &lead_campaign, lead_id).await;
            lead_counters.processed.fetch_add(1, Ordering::SeqCst);
            match result {
                Ok(()) => lead_counters.success.fetch_add(1, Ordering::SeqCst),
                Err(_) => lead_counters.fail.fetch_add(1, Ordering::SeqCst),
            };
        }));
        handles.push(handle);
    }

    if cancel_on_exit {
        for handle in &handles {
            handle.abort();
        }
    }
    for handle in handles {
        let _ = handle.await;
    }

    // §3/§4.9.5: the campaign completes once every spawned lead workflow
    // has terminated, unless an auth failure already paused it or a config
    // error already failed it — those outrank a blanket `Completed`.
    let current = ctx.campaign_store.get(campaign.campaign_id).await.map_err(|e| EngineError::Store(e.to_string()))?;
    if !matches!(current.status, CampaignStatus::Paused | CampaignStatus::Failed) {
        let mut completed = current;
        completed.transition_to(CampaignStatus::Completed);
        ctx.campaign_store.save(&completed).await.map_err(|e| EngineError::Store(e.to_string()))?;
    }
    *counters.end_time.lock().expect("counters mutex is never poisoned") = Some(Utc::now());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::TemplateMessageGenerator;
    use crate::ledger::InMemoryStepLedger;
    use crate::model::{Campaign, CampaignStatus, ConnectedAccount, ConnectedAccountStatus, Lead, LeadName, QuotaState, ScheduleWindow};
    use crate::provider::{Provider, ProviderError, ProviderResponse, SentInvitation};
    use crate::quota::InMemoryQuotaGate;
    use crate::runtime::LocalDurableContext;
    use crate::store::{CampaignStore, InMemoryCampaignStore, InMemoryLeadStore, LeadStore};
    use async_trait::async_trait;

    struct AlwaysSucceedsProvider;

    #[async_trait]
    impl Provider for AlwaysSucceedsProvider {
        async fn visit_profile(&self, _account_id: Uuid, _profile_url: &str) -> Result<ProviderResponse, ProviderError> {
            Ok(ProviderResponse {
                status_code: 200,
                body: serde_json::json!({ "provider_id": "p1", "first_name": "Jane", "last_name": "Doe" }),
            })
        }
        async fn list_recent_posts(&self, _account_id: Uuid, _provider_id: &str, _lookback_days: u32) -> Result<Vec<String>, ProviderError> {
            Ok(vec![])
        }
        async fn like_post(&self, _account_id: Uuid, _post_id: &str) -> Result<ProviderResponse, ProviderError> {
            Ok(ProviderResponse {
                status_code: 200,
                body: serde_json::Value::Null,
            })
        }
        async fn comment_post(&self, _account_id: Uuid, _post_id: &str, _comment: &str) -> Result<ProviderResponse, ProviderError> {
            Ok(ProviderResponse {
                status_code: 200,
                body: serde_json::Value::Null,
            })
        }
        async fn send_connection_request(&self, _account_id: Uuid, _provider_id: &str, _message: Option<&str>) -> Result<ProviderResponse, ProviderError> {
            Ok(ProviderResponse {
                status_code: 200,
                body: serde_json::Value::Null,
            })
        }
        async fn is_connected(&self, _account_id: Uuid, _public_identifier: &str) -> Result<bool, ProviderError> {
            Ok(true)
        }
        async fn list_sent_invitations(&self, _account_id: Uuid) -> Result<Vec<SentInvitation>, ProviderError> {
            Ok(vec![])
        }
        async fn cancel_invitation(&self, _account_id: Uuid, _invitation_id: &str) -> Result<ProviderResponse, ProviderError> {
            Ok(ProviderResponse {
                status_code: 200,
                body: serde_json::Value::Null,
            })
        }
        async fn send_inmail(&self, _account_id: Uuid, _provider_id: &str, _subject: &str, _body: &str) -> Result<ProviderResponse, ProviderError> {
            Ok(ProviderResponse {
                status_code: 200,
                body: serde_json::Value::Null,
            })
        }
        async fn send_message(&self, _account_id: Uuid, _provider_id: &str, _body: &str) -> Result<ProviderResponse, ProviderError> {
            Ok(ProviderResponse {
                status_code: 200,
                body: serde_json::Value::Null,
            })
        }
    }

    async fn test_context(num_leads: u32) -> (Arc<WorkflowContext>, Campaign) {
        let account_id = Uuid::new_v4();
        let campaign_id = Uuid::new_v4();

        let raw = crate::graph::RawWorkflowGraph {
            nodes: vec![crate::graph::NodeSpec {
                id: "visit".to_string(),
                kind: crate::graph::NodeKind::ProfileVisit,
                config: serde_json::Value::Null,
            }],
            edges: vec![],
        };
        let graph = crate::graph::WorkflowGraph::from_raw(raw).unwrap();

        let campaign = Campaign {
            campaign_id,
            organization_id: Uuid::new_v4(),
            account_id,
            status: CampaignStatus::Active,
            graph,
            schedule: ScheduleWindow::default(),
            quota: QuotaState::new(1000, 1000),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let lead_store = Arc::new(InMemoryLeadStore::new());
        for _ in 0..num_leads {
            lead_store
                .seed(Lead::new(
                    campaign_id,
                    LeadName {
                        first_name: "Jane".into(),
                        last_name: "Doe".into(),
                    },
                    "https://www.linkedin.com/in/jane-doe".into(),
                ))
                .await;
        }

        let campaign_store = Arc::new(InMemoryCampaignStore::new());
        campaign_store
            .seed_account(ConnectedAccount {
                account_id,
                provider_account_id: "acct".to_string(),
                status: ConnectedAccountStatus::Connected,
            })
            .await;
        campaign_store.seed_campaign(campaign.clone()).await;

        let quota = Arc::new(InMemoryQuotaGate::new());
        quota.seed(campaign_id, QuotaState::new(1000, 1000)).await;

        let ctx = Arc::new(WorkflowContext {
            provider: Arc::new(AlwaysSucceedsProvider),
            ledger: Arc::new(InMemoryStepLedger::new()),
            quota,
            lead_store,
            campaign_store,
            generator: Arc::new(TemplateMessageGenerator),
            runtime: Arc::new(LocalDurableContext),
            webhook_client: reqwest::Client::new(),
        });

        (ctx, campaign)
    }

    #[tokio::test(start_paused = true)]
    async fn spawns_all_leads_with_enough_time() {
        let (ctx, campaign) = test_context(3).await;
        let handle = spawn(ctx, campaign, 10, Duration::from_millis(50));

        tokio::time::advance(Duration::from_millis(500)).await;
        handle.join().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn pause_stops_spawning_until_resumed() {
        let (ctx, campaign) = test_context(5).await;
        let handle = spawn(ctx, campaign, 10, Duration::from_millis(100));

        // Let one or two leads spawn, then pause.
        tokio::time::advance(Duration::from_millis(150)).await;
        handle.pause(None);
        tokio::task::yield_now().await;

        let spawned_at_pause = handle.status().total;
        tokio::time::advance(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;
        assert_eq!(handle.status().total, spawned_at_pause, "no further leads should spawn while paused");

        handle.resume();
        tokio::time::advance(Duration::from_secs(2)).await;
        handle.join().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn completes_the_campaign_once_every_lead_terminates() {
        let (ctx, campaign) = test_context(3).await;
        let campaign_id = campaign.campaign_id;
        let campaign_store = ctx.campaign_store.clone();
        let handle = spawn(ctx, campaign, 10, Duration::from_millis(50));

        tokio::time::advance(Duration::from_millis(500)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(
            handle.status().end_time.is_some(),
            "end_time should be stamped once every spawned lead workflow has terminated"
        );

        handle.join().await.unwrap();

        let saved = campaign_store.get(campaign_id).await.unwrap();
        assert_eq!(saved.status, CampaignStatus::Completed);
    }
}
