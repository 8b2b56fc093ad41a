//! Error Classifier (C5)
//!
//! The only place a provider error's HTTP status and typed code are
//! inspected (§4.6, §9: "Heavy `any`-typed error handling in the source
//! [becomes] the Error Classifier is the only place..."). Everything
//! downstream switches on `Verdict`, never on the raw error shape —
//! structurally the same move as the teacher's `RequirementEvaluator::
//! evaluate` centralizing a big typed dispatch in one function.

use crate::provider::ProviderResponse;

/// Classification of a provider call outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Unrecoverable for this lead; stop the walk, mark the lead Failed.
    Permanent,
    /// The requested effect already holds; treat the step as success.
    AlreadyDone,
    /// An invite already went out recently; skip the send and start polling
    /// as though we had just sent it.
    AlreadyInvitedRecently,
    /// Provider refuses a resend within 24h; record a skip with a hint.
    Wait24h,
    /// Provider-side rate limit; sleep until the quota gate clears, retry.
    QuotaExhausted,
    /// Credentials are bad; pause the campaign, fail the current lead.
    AuthFailure,
    /// Anything else: let the runtime retry per its backoff policy.
    Transient,
}

impl Verdict {
    /// Verdicts that must never be retried by the runtime's backoff loop
    /// (§5: "the Error Classifier throws a non-retryable marker for
    /// Permanent/Auth verdicts").
    pub fn is_non_retryable(&self) -> bool {
        matches!(self, Verdict::Permanent | Verdict::AuthFailure)
    }

    /// A node execution counts as successful for ledger and DAG-edge
    /// purposes (§4.8.d/e) when the verdict resolves as "done".
    pub fn counts_as_success(&self) -> bool {
        matches!(self, Verdict::AlreadyDone | Verdict::Wait24h)
    }
}

const PERMANENT_CODES: &[&str] = &[
    "InvalidRecipient",
    "NoConnectionWithRecipient",
    "BlockedRecipient",
    "UserUnreachable",
    "UnprocessableEntity",
    "PaymentError",
    "InvalidMessage",
    "InvalidPost",
    "InsufficientCredits",
    "Unauthorized",
    "SenderRejected",
    "RecipientRejected",
    "IpRejectedByServer",
    "InvalidHeaders",
    "SendAsDenied",
    "LimitTooHigh",
    "RealtimeClientNotInitialized",
    "InvalidAccount",
];

const ALREADY_DONE_CODES: &[&str] = &["ActionAlreadyPerformed", "AlreadyConnected"];
const WAIT_24H_CODES: &[&str] = &["CannotResendYet", "CannotResendWithin24hrs"];
const AUTH_FAILURE_CODES: &[&str] = &["Unauthorized", "AccountConfigurationError", "ProviderUnreachable"];

/// Classify a provider response into a `Verdict` (§4.6). A `2xx` response
/// is always `AlreadyDone`-free success territory and is not passed
/// through this function by callers; this is only invoked on non-2xx
/// responses or responses carrying a typed error code.
pub fn classify(response: &ProviderResponse) -> Verdict {
    let status = response.status_code;
    let code = response.error_code();

    if status == 422 && code.is_some_and(|c| PERMANENT_CODES.contains(&c)) {
        return Verdict::Permanent;
    }

    if code.is_some_and(|c| ALREADY_DONE_CODES.contains(&c)) {
        return Verdict::AlreadyDone;
    }

    if code == Some("AlreadyInvitedRecently") {
        return Verdict::AlreadyInvitedRecently;
    }

    if code.is_some_and(|c| WAIT_24H_CODES.contains(&c)) {
        return Verdict::Wait24h;
    }

    if code == Some("LimitExceeded") || status == 429 {
        return Verdict::QuotaExhausted;
    }

    if matches!(status, 401 | 403) || code.is_some_and(|c| AUTH_FAILURE_CODES.contains(&c)) {
        return Verdict::AuthFailure;
    }

    Verdict::Transient
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, code: Option<&str>) -> ProviderResponse {
        let body = match code {
            Some(c) => serde_json::json!({ "error_code": c }),
            None => serde_json::Value::Null,
        };
        ProviderResponse {
            status_code: status,
            body,
        }
    }

    #[test]
    fn classifies_every_permanent_code_at_422() {
        for code in PERMANENT_CODES {
            assert_eq!(classify(&response(422, Some(code))), Verdict::Permanent, "{code}");
        }
    }

    #[test]
    fn permanent_code_at_other_status_is_not_permanent() {
        assert_ne!(classify(&response(400, Some("InvalidRecipient"))), Verdict::Permanent);
    }

    #[test]
    fn classifies_already_done_codes() {
        for code in ALREADY_DONE_CODES {
            assert_eq!(classify(&response(409, Some(code))), Verdict::AlreadyDone, "{code}");
        }
    }

    #[test]
    fn classifies_already_invited_recently() {
        assert_eq!(
            classify(&response(409, Some("AlreadyInvitedRecently"))),
            Verdict::AlreadyInvitedRecently
        );
    }

    #[test]
    fn classifies_wait_24h_codes() {
        for code in WAIT_24H_CODES {
            assert_eq!(classify(&response(429, Some(code))), Verdict::Wait24h, "{code}");
        }
    }

    #[test]
    fn classifies_quota_exhausted_by_code_or_status() {
        assert_eq!(classify(&response(400, Some("LimitExceeded"))), Verdict::QuotaExhausted);
        assert_eq!(classify(&response(429, None)), Verdict::QuotaExhausted);
    }

    #[test]
    fn classifies_auth_failure_by_status_or_code() {
        assert_eq!(classify(&response(401, None)), Verdict::AuthFailure);
        assert_eq!(classify(&response(403, None)), Verdict::AuthFailure);
        assert_eq!(
            classify(&response(500, Some("AccountConfigurationError"))),
            Verdict::AuthFailure
        );
        assert_eq!(classify(&response(500, Some("ProviderUnreachable"))), Verdict::AuthFailure);
    }

    #[test]
    fn falls_back_to_transient() {
        assert_eq!(classify(&response(500, Some("SomethingElse"))), Verdict::Transient);
        assert_eq!(classify(&response(503, None)), Verdict::Transient);
    }

    #[test]
    fn wait_24h_and_already_done_verdicts_count_as_success() {
        assert!(Verdict::AlreadyDone.counts_as_success());
        assert!(Verdict::Wait24h.counts_as_success());
        assert!(!Verdict::Transient.counts_as_success());
    }

    #[test]
    fn permanent_and_auth_failure_are_non_retryable() {
        assert!(Verdict::Permanent.is_non_retryable());
        assert!(Verdict::AuthFailure.is_non_retryable());
        assert!(!Verdict::Transient.is_non_retryable());
        assert!(!Verdict::QuotaExhausted.is_non_retryable());
    }
}
