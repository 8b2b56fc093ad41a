//! Core Data Model
//!
//! Lead, Campaign, Connected Account, and Step-Ledger types (§3). Shape and
//! derive conventions follow `ob-workflow`'s `state.rs` (`WorkflowInstance`,
//! `Blocker`) and `task_queue.rs` (`TaskStatus`, enum `as_str`/`FromStr`).

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::graph::WorkflowGraph;

/// Status of a lead as it is walked through a campaign graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for LeadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("unknown lead status: {s}")),
        }
    }
}

/// Status of a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Active,
    Paused,
    Completed,
    Failed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Name parts for a lead, as imported from a lead list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadName {
    pub first_name: String,
    pub last_name: String,
}

/// A single outreach target within a campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub lead_id: Uuid,
    pub campaign_id: Uuid,
    pub name: LeadName,
    pub profile_url: String,
    pub status: LeadStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    pub fn new(campaign_id: Uuid, name: LeadName, profile_url: String) -> Self {
        let now = Utc::now();
        Self {
            lead_id: Uuid::new_v4(),
            campaign_id,
            name,
            profile_url,
            status: LeadStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn transition_to(&mut self, status: LeadStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// Business-hour schedule window for a campaign (§4.4). `None` start/end
/// means 24/7.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleWindow {
    pub start_hhmm: Option<String>,
    pub end_hhmm: Option<String>,
    #[serde(default = "default_tz")]
    pub timezone: String,
}

fn default_tz() -> String {
    "UTC".to_string()
}

impl Default for ScheduleWindow {
    fn default() -> Self {
        Self {
            start_hhmm: None,
            end_hhmm: None,
            timezone: default_tz(),
        }
    }
}

/// Rolling daily/weekly connection-request quota counters (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaState {
    pub sent_day: u32,
    pub sent_week: u32,
    pub last_day_reset_at: Option<DateTime<Utc>>,
    pub last_week_reset_at: Option<DateTime<Utc>>,
    pub daily_limit: u32,
    pub weekly_limit: u32,
}

impl QuotaState {
    pub fn new(daily_limit: u32, weekly_limit: u32) -> Self {
        Self {
            sent_day: 0,
            sent_week: 0,
            last_day_reset_at: None,
            last_week_reset_at: None,
            daily_limit,
            weekly_limit,
        }
    }
}

/// A read-only handle to the provider account a campaign sends through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectedAccountStatus {
    Pending,
    Connected,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectedAccount {
    pub account_id: Uuid,
    pub provider_account_id: String,
    pub status: ConnectedAccountStatus,
}

/// A campaign: a lead list attached to a directed graph of outreach steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub campaign_id: Uuid,
    pub organization_id: Uuid,
    pub account_id: Uuid,
    pub status: CampaignStatus,
    pub graph: WorkflowGraph,
    pub schedule: ScheduleWindow,
    pub quota: QuotaState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    pub fn transition_to(&mut self, status: CampaignStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// Result payload recorded for one (lead, step) execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResultPayload {
    pub provider_id: Option<String>,
    pub error_code: Option<String>,
    pub status: Option<String>,
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl StepResultPayload {
    pub fn empty() -> Self {
        Self {
            provider_id: None,
            error_code: None,
            status: None,
            extra: HashMap::new(),
        }
    }
}

/// A single immutable step-ledger entry (§3, §4.2). Unique on
/// `(campaign_id, lead_id, step_index)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepLedgerEntry {
    pub campaign_id: Uuid,
    pub lead_id: Uuid,
    pub step_index: u32,
    pub node_kind: String,
    pub config_snapshot: serde_json::Value,
    pub success: bool,
    pub result: StepResultPayload,
    pub created_at: DateTime<Utc>,
}
