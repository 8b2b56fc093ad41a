//! Connection-Request Sub-State-Machine (§4.7)
//!
//! `Sending → Polling → {Accepted, Rejected, TimedOut, AlreadyConnected}`.
//! Each explicit state carries the data it needs, the way the teacher's
//! `TaskStatus`/`PendingTaskStatus`/`RequirementState` enums tag state
//! with an `as_str` helper rather than leaning on booleans.

use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::classifier::{classify, Verdict};
use crate::provider::{Provider, ProviderError};
use crate::quota::QuotaGate;
use crate::runtime::BoxSleepFn;

const DEFAULT_POLL_BUDGET: Duration = Duration::from_secs(10 * 24 * 3600);

/// Terminal or in-flight state of the sub-machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Sending,
    Polling,
    Accepted,
    Rejected,
    TimedOut,
    AlreadyConnected,
    /// Provider refused the send with a 24h-resend code (§4.6 `Wait24h`):
    /// recorded as a skip, not entered into polling.
    Wait24h,
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ConnectionState::Sending | ConnectionState::Polling)
    }

    /// Mapping onto the DAG's success flag (§4.7: "Accepted |
    /// AlreadyConnected → success; Rejected | TimedOut → failure"), plus
    /// `Wait24h` which §4.6 says counts as success ("step returns success
    /// with a 24h hint the scheduler may honor").
    pub fn as_success(&self) -> Option<bool> {
        match self {
            ConnectionState::Accepted | ConnectionState::AlreadyConnected | ConnectionState::Wait24h => Some(true),
            ConnectionState::Rejected | ConnectionState::TimedOut => Some(false),
            ConnectionState::Sending | ConnectionState::Polling => None,
        }
    }
}

/// Choose a poll interval from the remaining budget (§4.7, I6): under a
/// day left, poll every 15 minutes; under a week, every 30; otherwise
/// hourly.
pub fn poll_interval(remaining_budget: Duration) -> Duration {
    const ONE_DAY: Duration = Duration::from_secs(24 * 3600);
    const ONE_WEEK: Duration = Duration::from_secs(7 * 24 * 3600);

    if remaining_budget < ONE_DAY {
        Duration::from_secs(15 * 60)
    } else if remaining_budget < ONE_WEEK {
        Duration::from_secs(30 * 60)
    } else {
        Duration::from_secs(3_600)
    }
}

/// Drive the connection-request sub-machine to completion, sleeping
/// across poll ticks via `ctx`. `budget` defaults to 10 days unless an
/// outgoing negative conditional edge specifies a delay (§4.7.2).
pub async fn run<P, Q>(
    provider: &P,
    quota: &Q,
    campaign_id: Uuid,
    account_id: Uuid,
    provider_id: &str,
    public_identifier: &str,
    message: Option<&str>,
    budget: Option<Duration>,
    sleep: &BoxSleepFn,
    now: impl Fn() -> DateTime<Utc>,
) -> Result<ConnectionState, ProviderError>
where
    P: Provider + ?Sized,
    Q: QuotaGate + ?Sized,
{
    let budget = budget.unwrap_or(DEFAULT_POLL_BUDGET);

    // Sending: gate on quota (keyed by campaign, §4.3 — not by account,
    // since one connected account may serve several campaigns), send,
    // react to the verdict.
    loop {
        let check = quota
            .check(campaign_id, now())
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        if !check.can_proceed {
            let wait_until = check.wait_until.unwrap_or(now());
            let delta = (wait_until - now()).to_std().unwrap_or(Duration::ZERO);
            sleep(delta).await;
            continue;
        }
        break;
    }

    let response = provider.send_connection_request(account_id, provider_id, message).await?;

    // `classify` only has opinions about non-2xx/error-coded responses
    // (§4.6); a plain 2xx is success and must not be run through it.
    let should_increment = if (200..300).contains(&response.status_code) {
        true
    } else {
        match classify(&response) {
            Verdict::AlreadyDone => return Ok(ConnectionState::AlreadyConnected),
            // Skip the send, enter polling as if we had just sent it.
            Verdict::AlreadyInvitedRecently => false,
            // Record a skip; this is success, not an error (§4.6) — never
            // enters polling, there is nothing outstanding to poll for.
            Verdict::Wait24h => return Ok(ConnectionState::Wait24h),
            Verdict::Transient | Verdict::QuotaExhausted | Verdict::AuthFailure | Verdict::Permanent => {
                return Err(ProviderError::Http {
                    status: response.status_code,
                    body: response.body.to_string(),
                });
            }
        }
    };

    if should_increment {
        quota
            .increment(campaign_id, now())
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
    }

    // Polling (§4.7.2): each tick calls `IsConnected` first; only once that
    // is false do we consult the sent-invitation list, and only its
    // disappearance (not a single false `IsConnected`) means rejected.
    let poll_start = now();
    loop {
        let elapsed = (now() - poll_start).to_std().unwrap_or(Duration::ZERO);
        if elapsed >= budget {
            return Ok(ConnectionState::TimedOut);
        }
        let remaining = budget - elapsed;
        sleep(poll_interval(remaining)).await;

        if provider.is_connected(account_id, public_identifier).await? {
            return Ok(ConnectionState::Accepted);
        }

        let sent = provider.list_sent_invitations(account_id).await?;
        let still_outstanding = sent.iter().any(|invitation| invitation.invited_provider_id == provider_id);
        if !still_outstanding {
            return Ok(ConnectionState::Rejected);
        }
    }
}
