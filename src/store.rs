//! Lead / Campaign Persistence Ports
//!
//! CSV import, account CRUD, and the editor UI all sit outside this
//! engine's scope (§1 Out of scope); what remains in scope is a narrow
//! port the interpreter and orchestrator read/write leads and campaigns
//! through, so the core stays testable without a live database — the
//! same role the teacher's `WorkflowRepository` plays for `WorkflowEngine`.

use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::model::{Campaign, ConnectedAccount, Lead};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("lead not found: {0}")]
    LeadNotFound(Uuid),
    #[error("campaign not found: {0}")]
    CampaignNotFound(Uuid),
    #[error("connected account not found: {0}")]
    AccountNotFound(Uuid),
    #[cfg(feature = "database")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait LeadStore: Send + Sync {
    async fn get(&self, lead_id: Uuid) -> Result<Lead, StoreError>;
    async fn list_for_campaign(&self, campaign_id: Uuid) -> Result<Vec<Lead>, StoreError>;
    async fn save(&self, lead: &Lead) -> Result<(), StoreError>;
}

#[async_trait]
pub trait CampaignStore: Send + Sync {
    async fn get(&self, campaign_id: Uuid) -> Result<Campaign, StoreError>;
    async fn save(&self, campaign: &Campaign) -> Result<(), StoreError>;
    async fn get_account(&self, account_id: Uuid) -> Result<ConnectedAccount, StoreError>;
}

/// In-memory `LeadStore` for tests and local runs.
#[derive(Default)]
pub struct InMemoryLeadStore {
    leads: tokio::sync::Mutex<HashMap<Uuid, Lead>>,
}

impl InMemoryLeadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed(&self, lead: Lead) {
        self.leads.lock().await.insert(lead.lead_id, lead);
    }
}

#[async_trait]
impl LeadStore for InMemoryLeadStore {
    async fn get(&self, lead_id: Uuid) -> Result<Lead, StoreError> {
        self.leads.lock().await.get(&lead_id).cloned().ok_or(StoreError::LeadNotFound(lead_id))
    }

    async fn list_for_campaign(&self, campaign_id: Uuid) -> Result<Vec<Lead>, StoreError> {
        Ok(self
            .leads
            .lock()
            .await
            .values()
            .filter(|l| l.campaign_id == campaign_id)
            .cloned()
            .collect())
    }

    async fn save(&self, lead: &Lead) -> Result<(), StoreError> {
        self.leads.lock().await.insert(lead.lead_id, lead.clone());
        Ok(())
    }
}

/// In-memory `CampaignStore` for tests and local runs.
#[derive(Default)]
pub struct InMemoryCampaignStore {
    campaigns: tokio::sync::Mutex<HashMap<Uuid, Campaign>>,
    accounts: tokio::sync::Mutex<HashMap<Uuid, ConnectedAccount>>,
}

impl InMemoryCampaignStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_campaign(&self, campaign: Campaign) {
        self.campaigns.lock().await.insert(campaign.campaign_id, campaign);
    }

    pub async fn seed_account(&self, account: ConnectedAccount) {
        self.accounts.lock().await.insert(account.account_id, account);
    }
}

#[async_trait]
impl CampaignStore for InMemoryCampaignStore {
    async fn get(&self, campaign_id: Uuid) -> Result<Campaign, StoreError> {
        self.campaigns
            .lock()
            .await
            .get(&campaign_id)
            .cloned()
            .ok_or(StoreError::CampaignNotFound(campaign_id))
    }

    async fn save(&self, campaign: &Campaign) -> Result<(), StoreError> {
        self.campaigns.lock().await.insert(campaign.campaign_id, campaign.clone());
        Ok(())
    }

    async fn get_account(&self, account_id: Uuid) -> Result<ConnectedAccount, StoreError> {
        self.accounts
            .lock()
            .await
            .get(&account_id)
            .cloned()
            .ok_or(StoreError::AccountNotFound(account_id))
    }
}
