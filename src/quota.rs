//! Quota Gate (C3)
//!
//! Per-campaign daily/weekly connection-request counters with
//! calendar-day and ISO-week (Monday-based) rollover (§4.3). Increment is
//! an atomic compare-and-increment in the Postgres implementation, the
//! same row-level `UPDATE ... RETURNING` idiom `listener.rs` uses for its
//! `received_cargo_count`/`failed_count` columns.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveTime, Utc, Weekday};
use tracing::debug;
use uuid::Uuid;

use crate::model::QuotaState;

#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    #[cfg(feature = "database")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("unknown campaign: {0}")]
    UnknownCampaign(Uuid),
}

/// Outcome of a quota check (§4.3 `Check`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaCheck {
    pub can_proceed: bool,
    pub wait_until: Option<DateTime<Utc>>,
}

/// Per-campaign send quota. `check` performs rollover bookkeeping and
/// returns whether a send may proceed right now; `increment` is called
/// only after a provider-acknowledged `SendConnectionRequest` (§9 Open
/// Question: increments on send, not acceptance).
#[async_trait]
pub trait QuotaGate: Send + Sync {
    async fn check(&self, campaign_id: Uuid, now: DateTime<Utc>) -> Result<QuotaCheck, QuotaError>;

    async fn increment(&self, campaign_id: Uuid, now: DateTime<Utc>) -> Result<(), QuotaError>;
}

/// Pure rollover + limit evaluation, factored out of the trait so it can
/// be unit-tested without any storage concern (I2, I5-adjacent).
pub fn evaluate(state: &mut QuotaState, now: DateTime<Utc>) -> QuotaCheck {
    roll_day(state, now);
    roll_week(state, now);

    let daily_exceeded = state.sent_day >= state.daily_limit;
    let weekly_exceeded = state.sent_week >= state.weekly_limit;

    if !daily_exceeded && !weekly_exceeded {
        return QuotaCheck {
            can_proceed: true,
            wait_until: None,
        };
    }

    let wait_until = match (daily_exceeded, weekly_exceeded) {
        (true, true) => next_local_midnight(now).max(next_monday_midnight(now)),
        (true, false) => next_local_midnight(now),
        (false, true) => next_monday_midnight(now),
        (false, false) => unreachable!(),
    };

    debug!(sent_day = state.sent_day, sent_week = state.sent_week, %wait_until, "quota exhausted");

    QuotaCheck {
        can_proceed: false,
        wait_until: Some(wait_until),
    }
}

fn roll_day(state: &mut QuotaState, now: DateTime<Utc>) {
    let needs_reset = match state.last_day_reset_at {
        None => true,
        Some(last) => last.date_naive() < now.date_naive(),
    };
    if needs_reset {
        state.sent_day = 0;
        state.last_day_reset_at = Some(now);
    }
}

fn roll_week(state: &mut QuotaState, now: DateTime<Utc>) {
    let needs_reset = match state.last_week_reset_at {
        None => true,
        Some(last) => iso_week_key(last) < iso_week_key(now),
    };
    if needs_reset {
        state.sent_week = 0;
        state.last_week_reset_at = Some(now);
    }
}

fn iso_week_key(ts: DateTime<Utc>) -> (i32, u32) {
    let week = ts.iso_week();
    (week.year(), week.week())
}

fn next_local_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = now.date_naive() + ChronoDuration::days(1);
    tomorrow.and_time(NaiveTime::MIN).and_utc()
}

/// Next Monday 00:00:00. A Sunday's next Monday is one day ahead; any
/// other weekday is `8 - dow` days ahead (Monday=1 .. Sunday=7, ISO).
fn next_monday_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let dow = now.weekday().number_from_monday(); // Monday=1 .. Sunday=7
    let days_ahead = if dow == Weekday::Sun.number_from_monday() {
        1
    } else {
        8 - dow as i64
    };
    let target = now.date_naive() + ChronoDuration::days(days_ahead);
    target.and_time(NaiveTime::MIN).and_utc()
}

/// In-memory quota gate for tests and local runs.
#[derive(Default)]
pub struct InMemoryQuotaGate {
    states: tokio::sync::Mutex<std::collections::HashMap<Uuid, QuotaState>>,
}

impl InMemoryQuotaGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed(&self, campaign_id: Uuid, state: QuotaState) {
        self.states.lock().await.insert(campaign_id, state);
    }
}

#[async_trait]
impl QuotaGate for InMemoryQuotaGate {
    async fn check(&self, campaign_id: Uuid, now: DateTime<Utc>) -> Result<QuotaCheck, QuotaError> {
        let mut states = self.states.lock().await;
        let state = states.get_mut(&campaign_id).ok_or(QuotaError::UnknownCampaign(campaign_id))?;
        Ok(evaluate(state, now))
    }

    async fn increment(&self, campaign_id: Uuid, now: DateTime<Utc>) -> Result<(), QuotaError> {
        let mut states = self.states.lock().await;
        let state = states.get_mut(&campaign_id).ok_or(QuotaError::UnknownCampaign(campaign_id))?;
        evaluate(state, now);
        state.sent_day += 1;
        state.sent_week += 1;
        Ok(())
    }
}

/// Postgres-backed quota gate. `increment` uses an atomic
/// `UPDATE ... RETURNING` so concurrent lead workflows of the same
/// campaign never lose an increment (§5 "MUST use an atomic
/// compare-and-increment").
#[cfg(feature = "database")]
pub struct PgQuotaGate {
    pool: sqlx::PgPool,
}

#[cfg(feature = "database")]
impl PgQuotaGate {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    async fn load(&self, campaign_id: Uuid) -> Result<QuotaState, QuotaError> {
        let row = sqlx::query_as::<_, QuotaRow>(
            "SELECT sent_day, sent_week, last_day_reset_at, last_week_reset_at, daily_limit, weekly_limit FROM campaign_quota WHERE campaign_id = $1",
        )
        .bind(campaign_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(QuotaError::UnknownCampaign(campaign_id))?;
        Ok(row.into())
    }

    async fn save(&self, campaign_id: Uuid, state: &QuotaState) -> Result<(), QuotaError> {
        sqlx::query(
            "UPDATE campaign_quota SET sent_day = $2, sent_week = $3, last_day_reset_at = $4, last_week_reset_at = $5 WHERE campaign_id = $1",
        )
        .bind(campaign_id)
        .bind(state.sent_day as i32)
        .bind(state.sent_week as i32)
        .bind(state.last_day_reset_at)
        .bind(state.last_week_reset_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(feature = "database")]
#[derive(sqlx::FromRow)]
struct QuotaRow {
    sent_day: i32,
    sent_week: i32,
    last_day_reset_at: Option<DateTime<Utc>>,
    last_week_reset_at: Option<DateTime<Utc>>,
    daily_limit: i32,
    weekly_limit: i32,
}

#[cfg(feature = "database")]
impl From<QuotaRow> for QuotaState {
    fn from(row: QuotaRow) -> Self {
        QuotaState {
            sent_day: row.sent_day as u32,
            sent_week: row.sent_week as u32,
            last_day_reset_at: row.last_day_reset_at,
            last_week_reset_at: row.last_week_reset_at,
            daily_limit: row.daily_limit as u32,
            weekly_limit: row.weekly_limit as u32,
        }
    }
}

#[cfg(feature = "database")]
#[async_trait]
impl QuotaGate for PgQuotaGate {
    async fn check(&self, campaign_id: Uuid, now: DateTime<Utc>) -> Result<QuotaCheck, QuotaError> {
        let mut state = self.load(campaign_id).await?;
        let check = evaluate(&mut state, now);
        self.save(campaign_id, &state).await?;
        Ok(check)
    }

    async fn increment(&self, campaign_id: Uuid, now: DateTime<Utc>) -> Result<(), QuotaError> {
        let mut state = self.load(campaign_id).await?;
        evaluate(&mut state, now);
        state.sent_day += 1;
        state.sent_week += 1;
        self.save(campaign_id, &state).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn quota(daily: u32, weekly: u32) -> QuotaState {
        QuotaState::new(daily, weekly)
    }

    #[test]
    fn resets_daily_counter_on_calendar_day_rollover() {
        let mut state = quota(5, 50);
        let yesterday = Utc.with_ymd_and_hms(2026, 7, 26, 23, 0, 0).unwrap();
        state.sent_day = 5;
        state.last_day_reset_at = Some(yesterday);

        let today = Utc.with_ymd_and_hms(2026, 7, 27, 9, 0, 0).unwrap();
        let check = evaluate(&mut state, today);
        assert_eq!(state.sent_day, 0);
        assert!(check.can_proceed);
    }

    #[test]
    fn does_not_reset_within_same_day() {
        let mut state = quota(5, 50);
        let morning = Utc.with_ymd_and_hms(2026, 7, 27, 9, 0, 0).unwrap();
        state.sent_day = 3;
        state.last_day_reset_at = Some(morning);

        let afternoon = Utc.with_ymd_and_hms(2026, 7, 27, 15, 0, 0).unwrap();
        evaluate(&mut state, afternoon);
        assert_eq!(state.sent_day, 3);
    }

    #[test]
    fn daily_exceeded_waits_until_next_midnight() {
        let mut state = quota(1, 50);
        let now = Utc.with_ymd_and_hms(2026, 7, 27, 13, 30, 0).unwrap();
        state.sent_day = 1;
        state.last_day_reset_at = Some(now);

        let check = evaluate(&mut state, now);
        assert!(!check.can_proceed);
        assert_eq!(check.wait_until.unwrap(), Utc.with_ymd_and_hms(2026, 7, 28, 0, 0, 0).unwrap());
    }

    #[test]
    fn weekly_exceeded_waits_until_next_monday_from_weekday() {
        // 2026-07-27 is a Monday.
        let tuesday = Utc.with_ymd_and_hms(2026, 7, 28, 10, 0, 0).unwrap();
        let mut state = quota(100, 1);
        state.sent_week = 1;
        state.last_week_reset_at = Some(tuesday);

        let check = evaluate(&mut state, tuesday);
        assert!(!check.can_proceed);
        // Next Monday after Tuesday 2026-07-28 is 2026-08-03.
        assert_eq!(check.wait_until.unwrap(), Utc.with_ymd_and_hms(2026, 8, 3, 0, 0, 0).unwrap());
    }

    #[test]
    fn weekly_exceeded_on_sunday_waits_one_day() {
        let sunday = Utc.with_ymd_and_hms(2026, 8, 2, 10, 0, 0).unwrap();
        let mut state = quota(100, 1);
        state.sent_week = 1;
        state.last_week_reset_at = Some(sunday);

        let check = evaluate(&mut state, sunday);
        assert!(!check.can_proceed);
        assert_eq!(check.wait_until.unwrap(), Utc.with_ymd_and_hms(2026, 8, 3, 0, 0, 0).unwrap());
    }

    #[test]
    fn both_exceeded_waits_for_the_later_of_the_two() {
        let now = Utc.with_ymd_and_hms(2026, 7, 27, 10, 0, 0).unwrap();
        let mut state = quota(1, 1);
        state.sent_day = 1;
        state.sent_week = 1;
        state.last_day_reset_at = Some(now);
        state.last_week_reset_at = Some(now);

        let check = evaluate(&mut state, now);
        assert!(!check.can_proceed);
        // Daily wait is tomorrow midnight; weekly wait (next Monday) is
        // further out since today is itself Monday.
        assert_eq!(check.wait_until.unwrap(), Utc.with_ymd_and_hms(2026, 8, 3, 0, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn increment_is_visible_to_a_subsequent_check() {
        let gate = InMemoryQuotaGate::new();
        let campaign_id = Uuid::new_v4();
        gate.seed(campaign_id, quota(2, 50)).await;

        let now = Utc.with_ymd_and_hms(2026, 7, 27, 9, 0, 0).unwrap();
        gate.increment(campaign_id, now).await.unwrap();
        gate.increment(campaign_id, now).await.unwrap();

        let check = gate.check(campaign_id, now).await.unwrap();
        assert!(!check.can_proceed);
    }
}
