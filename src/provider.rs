//! Provider Port
//!
//! The boundary between the interpreter and the LinkedIn automation
//! aggregator. Split into a `Provider` trait plus an `HttpProvider` impl
//! the same way `ob-workflow`'s `blob_store.rs` splits `BlobStore` from
//! `LocalBlobStore`: callers depend on the trait, tests swap in a fake.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

/// Errors a provider call can fail with, prior to classification (§4.6).
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("http transport error: {0}")]
    Transport(String),
    #[error("provider returned malformed response: {0}")]
    MalformedResponse(String),
    #[error("provider returned status {status}: {body}")]
    Http { status: u16, body: String },
    #[error("could not extract a public identifier from url {0}")]
    BadProfileUrl(String),
}

/// Raw outcome of a provider call, ahead of `classifier::classify` turning
/// it into a `Verdict` (§4.6). Intentionally untyped-feeling: this is the
/// shape an HTTP aggregator actually hands back.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderResponse {
    pub status_code: u16,
    #[serde(default)]
    pub body: serde_json::Value,
}

impl ProviderResponse {
    pub fn error_code(&self) -> Option<&str> {
        self.body.get("error_code").and_then(|v| v.as_str())
    }
}

/// One entry from `ListSentInvitations` (§4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentInvitation {
    pub invited_provider_id: String,
    pub invitation_id: String,
}

/// Port to the outbound LinkedIn automation surface. One call per
/// node-kind the interpreter executes (§4.5), plus the relation/invite
/// listing calls the connection-request sub-state-machine (§4.7) and
/// `WithdrawRequest` (§4.5) poll against.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn visit_profile(&self, account_id: Uuid, profile_url: &str) -> Result<ProviderResponse, ProviderError>;

    /// Posts authored by `provider_id` within the last `lookback_days`.
    /// Callers pick one at random (§4.1 "picks a random post") and act on
    /// its id; an empty result means "no recent posts".
    async fn list_recent_posts(
        &self,
        account_id: Uuid,
        provider_id: &str,
        lookback_days: u32,
    ) -> Result<Vec<String>, ProviderError>;

    async fn like_post(&self, account_id: Uuid, post_id: &str) -> Result<ProviderResponse, ProviderError>;

    async fn comment_post(
        &self,
        account_id: Uuid,
        post_id: &str,
        comment: &str,
    ) -> Result<ProviderResponse, ProviderError>;

    async fn send_connection_request(
        &self,
        account_id: Uuid,
        provider_id: &str,
        message: Option<&str>,
    ) -> Result<ProviderResponse, ProviderError>;

    /// Whether `account_id` is connected to `public_identifier`, via
    /// relation listing (§4.1).
    async fn is_connected(&self, account_id: Uuid, public_identifier: &str) -> Result<bool, ProviderError>;

    async fn list_sent_invitations(&self, account_id: Uuid) -> Result<Vec<SentInvitation>, ProviderError>;

    async fn cancel_invitation(&self, account_id: Uuid, invitation_id: &str) -> Result<ProviderResponse, ProviderError>;

    async fn send_inmail(
        &self,
        account_id: Uuid,
        provider_id: &str,
        subject: &str,
        body: &str,
    ) -> Result<ProviderResponse, ProviderError>;

    async fn send_message(&self, account_id: Uuid, provider_id: &str, body: &str) -> Result<ProviderResponse, ProviderError>;
}

/// `reqwest`-backed implementation talking to the aggregator's REST API.
pub struct HttpProvider {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpProvider {
    pub fn new(base_url: String, token: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client construction should never fail with static config");
        Self {
            client,
            base_url,
            token,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        req
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<ProviderResponse, ProviderError> {
        let resp = req
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        let status_code = resp.status().as_u16();
        let body: serde_json::Value = resp
            .json()
            .await
            .unwrap_or_else(|_| serde_json::Value::Null);
        Ok(ProviderResponse { status_code, body })
    }
}

#[async_trait]
impl Provider for HttpProvider {
    async fn visit_profile(&self, account_id: Uuid, profile_url: &str) -> Result<ProviderResponse, ProviderError> {
        let req = self
            .request(reqwest::Method::POST, "/v1/actions/visit")
            .json(&serde_json::json!({ "account_id": account_id, "profile_url": profile_url }));
        self.send(req).await
    }

    async fn list_recent_posts(
        &self,
        account_id: Uuid,
        provider_id: &str,
        lookback_days: u32,
    ) -> Result<Vec<String>, ProviderError> {
        let req = self.request(
            reqwest::Method::GET,
            &format!("/v1/posts?account_id={account_id}&provider_id={provider_id}&lookback_days={lookback_days}"),
        );
        let resp = self.send(req).await?;
        let posts = resp
            .body
            .get("posts")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|p| p.get("id").and_then(|id| id.as_str()).map(str::to_string)).collect())
            .unwrap_or_default();
        Ok(posts)
    }

    async fn like_post(&self, account_id: Uuid, post_id: &str) -> Result<ProviderResponse, ProviderError> {
        let req = self
            .request(reqwest::Method::POST, "/v1/actions/like")
            .json(&serde_json::json!({ "account_id": account_id, "post_id": post_id }));
        self.send(req).await
    }

    async fn comment_post(
        &self,
        account_id: Uuid,
        post_id: &str,
        comment: &str,
    ) -> Result<ProviderResponse, ProviderError> {
        let req = self.request(reqwest::Method::POST, "/v1/actions/comment").json(&serde_json::json!({
            "account_id": account_id,
            "post_id": post_id,
            "comment": comment,
        }));
        self.send(req).await
    }

    async fn send_connection_request(
        &self,
        account_id: Uuid,
        provider_id: &str,
        message: Option<&str>,
    ) -> Result<ProviderResponse, ProviderError> {
        let req = self.request(reqwest::Method::POST, "/v1/actions/connect").json(&serde_json::json!({
            "account_id": account_id,
            "provider_id": provider_id,
            "message": message,
        }));
        self.send(req).await
    }

    async fn is_connected(&self, account_id: Uuid, public_identifier: &str) -> Result<bool, ProviderError> {
        let req = self.request(
            reqwest::Method::GET,
            &format!("/v1/relations?account_id={account_id}&public_identifier={public_identifier}"),
        );
        let resp = self.send(req).await?;
        Ok(resp.body.get("connected").and_then(|v| v.as_bool()).unwrap_or(false))
    }

    async fn list_sent_invitations(&self, account_id: Uuid) -> Result<Vec<SentInvitation>, ProviderError> {
        let req = self.request(reqwest::Method::GET, &format!("/v1/invitations/sent?account_id={account_id}"));
        let resp = self.send(req).await?;
        let invitations = resp
            .body
            .get("invitations")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|entry| {
                        let invited_provider_id = entry.get("invited_provider_id")?.as_str()?.to_string();
                        let invitation_id = entry.get("invitation_id")?.as_str()?.to_string();
                        Some(SentInvitation {
                            invited_provider_id,
                            invitation_id,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(invitations)
    }

    async fn cancel_invitation(&self, account_id: Uuid, invitation_id: &str) -> Result<ProviderResponse, ProviderError> {
        let req = self.request(reqwest::Method::POST, "/v1/invitations/cancel").json(&serde_json::json!({
            "account_id": account_id,
            "invitation_id": invitation_id,
        }));
        self.send(req).await
    }

    async fn send_inmail(
        &self,
        account_id: Uuid,
        provider_id: &str,
        subject: &str,
        body: &str,
    ) -> Result<ProviderResponse, ProviderError> {
        let req = self.request(reqwest::Method::POST, "/v1/actions/inmail").json(&serde_json::json!({
            "account_id": account_id,
            "provider_id": provider_id,
            "subject": subject,
            "body": body,
        }));
        self.send(req).await
    }

    async fn send_message(&self, account_id: Uuid, provider_id: &str, body: &str) -> Result<ProviderResponse, ProviderError> {
        let req = self.request(reqwest::Method::POST, "/v1/actions/message").json(&serde_json::json!({
            "account_id": account_id,
            "provider_id": provider_id,
            "body": body,
        }));
        self.send(req).await
    }

}

/// Extract a LinkedIn public identifier from a profile or company page URL
/// (§4.1: "path-component extraction after `/in/` or `/company/`, trimmed
/// of trailing slashes"), the way `CargoRef::parse` pulls an identifier out
/// of a `cargo:` URI: strip the scheme and host, then take the path
/// segment that matters.
pub fn extract_public_identifier(profile_url: &str) -> Result<String, ProviderError> {
    let without_scheme = profile_url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(profile_url);

    let mut segments = without_scheme.split('/').filter(|s| !s.is_empty());
    let host = segments.next().unwrap_or_default();
    if !host.ends_with("linkedin.com") {
        return Err(ProviderError::BadProfileUrl(profile_url.to_string()));
    }

    match (segments.next(), segments.next()) {
        (Some("in") | Some("company"), Some(id)) if !id.is_empty() => Ok(id.trim_end_matches('/').to_string()),
        _ => Err(ProviderError::BadProfileUrl(profile_url.to_string())),
    }
}
