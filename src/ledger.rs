//! Step Ledger (C2)
//!
//! Durable, idempotent per-`(campaign, lead, step_index)` record of what
//! happened. Mirrors the teacher's `WorkflowRepository` role: the
//! interpreter calls through this trait and never touches SQL directly.

use async_trait::async_trait;
use uuid::Uuid;

use crate::model::StepLedgerEntry;

/// Errors the ledger port can fail with.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[cfg(feature = "database")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Durable step record (§4.2). `record_step` is idempotent on
/// `(campaign_id, lead_id, step_index)`: a second write for an existing
/// key is a no-op and does not overwrite the first payload (I1).
#[async_trait]
pub trait StepLedger: Send + Sync {
    async fn record_step(&self, entry: StepLedgerEntry) -> Result<(), LedgerError>;

    async fn list_steps(&self, campaign_id: Uuid) -> Result<Vec<StepLedgerEntry>, LedgerError>;

    async fn list_for_lead(&self, lead_id: Uuid) -> Result<Vec<StepLedgerEntry>, LedgerError>;
}

/// In-memory ledger for tests and local runs. First write for a given
/// key wins; later writes are silently dropped, matching the Postgres
/// `ON CONFLICT DO NOTHING` implementation's observable behavior.
#[derive(Default)]
pub struct InMemoryStepLedger {
    rows: tokio::sync::Mutex<Vec<StepLedgerEntry>>,
}

impl InMemoryStepLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StepLedger for InMemoryStepLedger {
    async fn record_step(&self, entry: StepLedgerEntry) -> Result<(), LedgerError> {
        let mut rows = self.rows.lock().await;
        let exists = rows
            .iter()
            .any(|r| r.campaign_id == entry.campaign_id && r.lead_id == entry.lead_id && r.step_index == entry.step_index);
        if !exists {
            rows.push(entry);
        }
        Ok(())
    }

    async fn list_steps(&self, campaign_id: Uuid) -> Result<Vec<StepLedgerEntry>, LedgerError> {
        let rows = self.rows.lock().await;
        Ok(rows.iter().filter(|r| r.campaign_id == campaign_id).cloned().collect())
    }

    async fn list_for_lead(&self, lead_id: Uuid) -> Result<Vec<StepLedgerEntry>, LedgerError> {
        let rows = self.rows.lock().await;
        Ok(rows.iter().filter(|r| r.lead_id == lead_id).cloned().collect())
    }
}

/// Postgres-backed ledger. `record_step` relies on a unique index over
/// `(campaign_id, lead_id, step_index)` and an `ON CONFLICT DO NOTHING`
/// insert to get idempotency from the database itself, the same
/// discipline `listener.rs` uses for its queue dequeue/requeue rows.
#[cfg(feature = "database")]
pub struct PgStepLedger {
    pool: sqlx::PgPool,
}

#[cfg(feature = "database")]
impl PgStepLedger {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[cfg(feature = "database")]
#[async_trait]
impl StepLedger for PgStepLedger {
    async fn record_step(&self, entry: StepLedgerEntry) -> Result<(), LedgerError> {
        let result_json = serde_json::to_value(&entry.result)?;
        sqlx::query(
            r#"
            INSERT INTO step_ledger (campaign_id, lead_id, step_index, node_kind, config_snapshot, success, result, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (campaign_id, lead_id, step_index) DO NOTHING
            "#,
        )
        .bind(entry.campaign_id)
        .bind(entry.lead_id)
        .bind(entry.step_index as i32)
        .bind(&entry.node_kind)
        .bind(&entry.config_snapshot)
        .bind(entry.success)
        .bind(&result_json)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_steps(&self, campaign_id: Uuid) -> Result<Vec<StepLedgerEntry>, LedgerError> {
        let rows = sqlx::query_as::<_, StepLedgerRow>(
            "SELECT campaign_id, lead_id, step_index, node_kind, config_snapshot, success, result, created_at FROM step_ledger WHERE campaign_id = $1 ORDER BY step_index",
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_for_lead(&self, lead_id: Uuid) -> Result<Vec<StepLedgerEntry>, LedgerError> {
        let rows = sqlx::query_as::<_, StepLedgerRow>(
            "SELECT campaign_id, lead_id, step_index, node_kind, config_snapshot, success, result, created_at FROM step_ledger WHERE lead_id = $1 ORDER BY step_index",
        )
        .bind(lead_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[cfg(feature = "database")]
#[derive(sqlx::FromRow)]
struct StepLedgerRow {
    campaign_id: Uuid,
    lead_id: Uuid,
    step_index: i32,
    node_kind: String,
    config_snapshot: serde_json::Value,
    success: bool,
    result: serde_json::Value,
    created_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(feature = "database")]
impl TryFrom<StepLedgerRow> for StepLedgerEntry {
    type Error = LedgerError;

    fn try_from(row: StepLedgerRow) -> Result<Self, Self::Error> {
        Ok(StepLedgerEntry {
            campaign_id: row.campaign_id,
            lead_id: row.lead_id,
            step_index: row.step_index as u32,
            node_kind: row.node_kind,
            config_snapshot: row.config_snapshot,
            success: row.success,
            result: serde_json::from_value(row.result)?,
            created_at: row.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StepResultPayload;

    fn entry(campaign_id: Uuid, lead_id: Uuid, step_index: u32, success: bool) -> StepLedgerEntry {
        StepLedgerEntry {
            campaign_id,
            lead_id,
            step_index,
            node_kind: "profile_visit".to_string(),
            config_snapshot: serde_json::Value::Null,
            success,
            result: StepResultPayload::empty(),
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn repeated_record_step_keeps_first_write_only() {
        let ledger = InMemoryStepLedger::new();
        let campaign_id = Uuid::new_v4();
        let lead_id = Uuid::new_v4();

        ledger.record_step(entry(campaign_id, lead_id, 0, true)).await.unwrap();
        ledger.record_step(entry(campaign_id, lead_id, 0, false)).await.unwrap();

        let rows = ledger.list_for_lead(lead_id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].success, "first write must win");
    }

    #[tokio::test]
    async fn list_steps_filters_by_campaign() {
        let ledger = InMemoryStepLedger::new();
        let campaign_a = Uuid::new_v4();
        let campaign_b = Uuid::new_v4();
        let lead = Uuid::new_v4();

        ledger.record_step(entry(campaign_a, lead, 0, true)).await.unwrap();
        ledger.record_step(entry(campaign_b, lead, 0, true)).await.unwrap();

        assert_eq!(ledger.list_steps(campaign_a).await.unwrap().len(), 1);
        assert_eq!(ledger.list_steps(campaign_b).await.unwrap().len(), 1);
    }
}
