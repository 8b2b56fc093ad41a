//! Node Executors (C6)
//!
//! One function per node kind, dispatched from `execute_node`, composing
//! the Provider adapter (C1), Step Ledger (C2), and Error Classifier
//! (C5) — the same shape as the teacher's `RequirementEvaluator::evaluate`
//! dispatching to one `check_*` method per requirement kind.

use std::sync::Arc;

use rand::Rng;
use serde::Deserialize;
use uuid::Uuid;

use crate::classifier::{classify, Verdict};
use crate::connection::ConnectionState;
use crate::model::{Lead, StepResultPayload};
use crate::provider::{Provider, ProviderError, ProviderResponse};
use crate::runtime::BoxSleepFn;

/// Outcome of executing one node for one lead (§4.5.4).
#[derive(Debug, Clone)]
pub struct NodeOutcome {
    pub success: bool,
    pub verdict: Option<Verdict>,
    pub result: StepResultPayload,
}

impl NodeOutcome {
    fn ok(result: StepResultPayload) -> Self {
        Self {
            success: true,
            verdict: None,
            result,
        }
    }

    fn from_response(response: ProviderResponse, mut result: StepResultPayload) -> Self {
        if (200..300).contains(&response.status_code) {
            result.status = Some("success".to_string());
            return Self::ok(result);
        }
        let verdict = classify(&response);
        result.error_code = response.error_code().map(str::to_string);
        result.status = Some("error".to_string());
        Self {
            success: verdict.counts_as_success(),
            verdict: Some(verdict),
            result,
        }
    }
}

/// Renders `{{first_name}}`/`{{last_name}}`/`{{company}}` style templates,
/// or generates text via an external AI service. §9 Open Question:
/// both are production behavior, not a stub-vs-real distinction.
pub trait MessageGenerator: Send + Sync {
    fn generate(&self, template_hint: &str, first_name: &str, last_name: &str, company: Option<&str>) -> String;
}

/// Fallback generator returning the configured literal template with
/// `{{first_name}}`/`{{last_name}}`/`{{company}}` substituted.
pub struct TemplateMessageGenerator;

impl MessageGenerator for TemplateMessageGenerator {
    fn generate(&self, template_hint: &str, first_name: &str, last_name: &str, company: Option<&str>) -> String {
        template_hint
            .replace("{{first_name}}", first_name)
            .replace("{{last_name}}", last_name)
            .replace("{{company}}", company.unwrap_or(""))
    }
}

/// Custom-template generator is a distinct implementation only in name:
/// production deployments may swap in an LLM-backed generator behind the
/// same trait without the interpreter changing.
pub struct LiteralFallbackMessageGenerator;

impl MessageGenerator for LiteralFallbackMessageGenerator {
    fn generate(&self, _template_hint: &str, first_name: &str, _last_name: &str, _company: Option<&str>) -> String {
        format!("Great connecting with you, {first_name}!")
    }
}

#[derive(Debug, Deserialize)]
struct RecentPostConfig {
    #[serde(default = "default_lookback_days")]
    recent_post_days: u32,
    #[serde(default)]
    comment_text: Option<String>,
}

fn default_lookback_days() -> u32 {
    7
}

#[derive(Debug, Deserialize)]
struct InviteConfig {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FollowupConfig {
    #[serde(default)]
    template: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebhookConfig {
    target_url: String,
}

/// Resolves `public_identifier` then `provider_id` once per node
/// execution call (§4.5.1/2). Not cached across steps — each node
/// re-resolves, matching "cached within the executor call, not across
/// steps".
async fn resolve_provider_id<P: Provider + ?Sized>(provider: &P, account_id: Uuid, profile_url: &str) -> Result<(String, String, String, Option<String>), ProviderError> {
    // Validates the URL shape even though `visit_profile` takes the full
    // URL; a malformed profile URL should fail before any network call.
    crate::provider::extract_public_identifier(profile_url)?;
    let response = provider.visit_profile(account_id, profile_url).await?;
    let provider_id = response
        .body
        .get("provider_id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ProviderError::MalformedResponse("missing provider_id".to_string()))?
        .to_string();
    let first_name = response
        .body
        .get("first_name")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let last_name = response
        .body
        .get("last_name")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let last_company = response.body.get("last_company").and_then(|v| v.as_str()).map(str::to_string);
    Ok((provider_id, first_name, last_name, last_company))
}

pub async fn execute_profile_visit<P: Provider + ?Sized>(provider: &P, account_id: Uuid, lead: &Lead) -> NodeOutcome {
    match provider.visit_profile(account_id, &lead.profile_url).await {
        Ok(response) => {
            let mut result = StepResultPayload::empty();
            result.provider_id = response.body.get("provider_id").and_then(|v| v.as_str()).map(str::to_string);
            NodeOutcome::from_response(response, result)
        }
        Err(e) => error_outcome(e),
    }
}

pub async fn execute_like_post<P: Provider + ?Sized>(
    provider: &P,
    account_id: Uuid,
    lead: &Lead,
    config: &serde_json::Value,
) -> Result<NodeOutcome, ProviderError> {
    let config: RecentPostConfig = serde_json::from_value(config.clone()).unwrap_or(RecentPostConfig {
        recent_post_days: default_lookback_days(),
        comment_text: None,
    });
    let (provider_id, _, _, _) = resolve_provider_id(provider, account_id, &lead.profile_url).await?;
    let posts = provider.list_recent_posts(account_id, &provider_id, config.recent_post_days).await?;

    let Some(index) = pick_random_index(posts.len()) else {
        let mut result = StepResultPayload::empty();
        result.status = Some("no recent posts".to_string());
        return Ok(NodeOutcome::ok(result));
    };

    match provider.like_post(account_id, &posts[index]).await {
        Ok(response) => Ok(NodeOutcome::from_response(response, StepResultPayload::empty())),
        Err(e) => Ok(error_outcome(e)),
    }
}

pub async fn execute_comment_post<P, G>(
    provider: &P,
    generator: &G,
    account_id: Uuid,
    lead: &Lead,
    config: &serde_json::Value,
) -> Result<NodeOutcome, ProviderError>
where
    P: Provider + ?Sized,
    G: MessageGenerator + ?Sized,
{
    let config: RecentPostConfig = serde_json::from_value(config.clone()).unwrap_or(RecentPostConfig {
        recent_post_days: default_lookback_days(),
        comment_text: None,
    });
    let (provider_id, first_name, last_name, company) = resolve_provider_id(provider, account_id, &lead.profile_url).await?;
    let posts = provider.list_recent_posts(account_id, &provider_id, config.recent_post_days).await?;

    let Some(index) = pick_random_index(posts.len()) else {
        let mut result = StepResultPayload::empty();
        result.status = Some("no recent posts".to_string());
        return Ok(NodeOutcome::ok(result));
    };

    let template = config.comment_text.unwrap_or_else(|| "Thanks for sharing, {{first_name}}!".to_string());
    let comment = generator.generate(&template, &first_name, &last_name, company.as_deref());

    match provider.comment_post(account_id, &posts[index], &comment).await {
        Ok(response) => Ok(NodeOutcome::from_response(response, StepResultPayload::empty())),
        Err(e) => Ok(error_outcome(e)),
    }
}

pub async fn execute_send_connection_request<P, Q>(
    provider: &P,
    quota: &Q,
    campaign_id: Uuid,
    account_id: Uuid,
    lead: &Lead,
    config: &serde_json::Value,
    budget: Option<std::time::Duration>,
    sleep: &BoxSleepFn,
    now: impl Fn() -> chrono::DateTime<chrono::Utc>,
) -> Result<(NodeOutcome, ConnectionState), ProviderError>
where
    P: Provider + ?Sized,
    Q: crate::quota::QuotaGate + ?Sized,
{
    let config: InviteConfig = serde_json::from_value(config.clone()).unwrap_or(InviteConfig { message: None });
    let public_identifier = crate::provider::extract_public_identifier(&lead.profile_url)?;
    let (provider_id, _, _, _) = resolve_provider_id(provider, account_id, &lead.profile_url).await?;

    let state = crate::connection::run(
        provider,
        quota,
        campaign_id,
        account_id,
        &provider_id,
        &public_identifier,
        config.message.as_deref(),
        budget,
        sleep,
        now,
    )
    .await?;

    let mut result = StepResultPayload::empty();
    result.provider_id = Some(provider_id);
    result.status = Some(connection_state_label(state).to_string());
    let success = state.as_success().unwrap_or(false);

    Ok((
        NodeOutcome {
            success,
            verdict: None,
            result,
        },
        state,
    ))
}

fn connection_state_label(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Sending => "sending",
        ConnectionState::Polling => "polling",
        ConnectionState::Accepted => "accepted",
        ConnectionState::Rejected => "rejected",
        ConnectionState::TimedOut => "timed_out",
        ConnectionState::AlreadyConnected => "already_connected",
        ConnectionState::Wait24h => "wait_24h",
    }
}

pub async fn execute_send_followup<P, G>(
    provider: &P,
    generator: &G,
    account_id: Uuid,
    lead: &Lead,
    config: &serde_json::Value,
) -> Result<NodeOutcome, ProviderError>
where
    P: Provider + ?Sized,
    G: MessageGenerator + ?Sized,
{
    let config: FollowupConfig = serde_json::from_value(config.clone()).unwrap_or(FollowupConfig { template: None });
    let (provider_id, first_name, last_name, company) = resolve_provider_id(provider, account_id, &lead.profile_url).await?;
    let template = config
        .template
        .unwrap_or_else(|| "Hi {{first_name}}, following up on my earlier message.".to_string());
    let body = generator.generate(&template, &first_name, &last_name, company.as_deref());

    match provider.send_message(account_id, &provider_id, &body).await {
        Ok(response) => Ok(NodeOutcome::from_response(response, StepResultPayload::empty())),
        Err(e) => Ok(error_outcome(e)),
    }
}

/// `SendInmail`: stubbed success, kept as a node kind to preserve graph
/// semantics (§4.5).
pub fn execute_send_inmail() -> NodeOutcome {
    let mut result = StepResultPayload::empty();
    result.status = Some("stubbed".to_string());
    NodeOutcome::ok(result)
}

/// §4.5: "look up invitation by target `providerId` in sent list; cancel
/// if present; otherwise success with 'nothing to withdraw'" — no provider
/// call at all when there is nothing outstanding to cancel.
pub async fn execute_withdraw_request<P: Provider + ?Sized>(provider: &P, account_id: Uuid, lead: &Lead) -> Result<NodeOutcome, ProviderError> {
    let (provider_id, _, _, _) = resolve_provider_id(provider, account_id, &lead.profile_url).await?;

    let sent = provider.list_sent_invitations(account_id).await?;
    let Some(invitation) = sent.into_iter().find(|inv| inv.invited_provider_id == provider_id) else {
        let mut result = StepResultPayload::empty();
        result.status = Some("nothing to withdraw".to_string());
        return Ok(NodeOutcome::ok(result));
    };

    match provider.cancel_invitation(account_id, &invitation.invitation_id).await {
        Ok(response) => Ok(NodeOutcome::from_response(response, StepResultPayload::empty())),
        Err(e) => Ok(error_outcome(e)),
    }
}

pub async fn execute_webhook(client: &reqwest::Client, config: &serde_json::Value, payload: &serde_json::Value) -> NodeOutcome {
    let mut result = StepResultPayload::empty();
    let config: Result<WebhookConfig, _> = serde_json::from_value(config.clone());
    let target_url = match config {
        Ok(c) => c.target_url,
        Err(e) => {
            result.error_code = Some("invalid_webhook_config".to_string());
            result.status = Some(e.to_string());
            return NodeOutcome {
                success: false,
                verdict: None,
                result,
            };
        }
    };

    match client.post(&target_url).json(payload).send().await {
        Ok(response) if response.status().is_success() => {
            result.status = Some("delivered".to_string());
            NodeOutcome::ok(result)
        }
        Ok(response) => {
            result.status = Some(format!("http {}", response.status()));
            NodeOutcome {
                success: false,
                verdict: None,
                result,
            }
        }
        Err(e) => {
            result.status = Some(e.to_string());
            NodeOutcome {
                success: false,
                verdict: None,
                result,
            }
        }
    }
}

fn error_outcome(error: ProviderError) -> NodeOutcome {
    let mut result = StepResultPayload::empty();
    result.status = Some(error.to_string());
    NodeOutcome {
        success: false,
        verdict: Some(Verdict::Transient),
        result,
    }
}

/// Pick a random index in `0..len`, used for "likes/comments a random
/// recent post" selection (§4.1, §4.5). A thin wrapper so callers don't
/// reach for `rand` directly.
pub fn pick_random_index(len: usize) -> Option<usize> {
    if len == 0 {
        None
    } else {
        Some(rand::thread_rng().gen_range(0..len))
    }
}

/// Shared config accessor for node dispatch: resolves the per-node-kind
/// message generator from a campaign-level default plus an optional
/// per-node override recorded in `config.message_generator`.
pub fn resolve_generator(default_generator: &Arc<dyn MessageGenerator>, config: &serde_json::Value) -> Arc<dyn MessageGenerator> {
    match config.get("message_generator").and_then(|v| v.as_str()) {
        Some("literal_fallback") => Arc::new(LiteralFallbackMessageGenerator),
        _ => default_generator.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_generator_substitutes_all_placeholders() {
        let generator = TemplateMessageGenerator;
        let text = generator.generate("Hi {{first_name}} {{last_name}} from {{company}}", "Jane", "Doe", Some("Acme"));
        assert_eq!(text, "Hi Jane Doe from Acme");
    }

    #[test]
    fn template_generator_handles_missing_company() {
        let generator = TemplateMessageGenerator;
        let text = generator.generate("Hi {{first_name}}, nice to meet you from {{company}}", "Jane", "Doe", None);
        assert_eq!(text, "Hi Jane, nice to meet you from ");
    }

    #[test]
    fn literal_fallback_generator_ignores_template_hint() {
        let generator = LiteralFallbackMessageGenerator;
        let text = generator.generate("ignored", "Jane", "Doe", None);
        assert_eq!(text, "Great connecting with you, Jane!");
    }

    #[test]
    fn pick_random_index_is_none_for_empty_collection() {
        assert_eq!(pick_random_index(0), None);
        assert!(pick_random_index(5).unwrap() < 5);
    }

    #[test]
    fn send_inmail_is_a_stubbed_success() {
        let outcome = execute_send_inmail();
        assert!(outcome.success);
        assert_eq!(outcome.result.status.as_deref(), Some("stubbed"));
    }
}
