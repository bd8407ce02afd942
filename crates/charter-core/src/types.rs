use crate::domain::stage::{ProviderId, StageType};
use crate::CoreError;
use serde::{Deserialize, Serialize};

/// Terminal outcome carried by a completion event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    /// The provider finished the stage successfully
    Completed,
    /// The provider rejected or failed the stage
    Failed,
}

/// Canonical event derived from a provider webhook or a simulated tick
///
/// Adapters normalize every provider's payload into this shape; the
/// orchestrator never sees provider-specific fields outside the raw snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionEvent {
    /// Provider-assigned request id used to resolve the stage record
    pub external_request_id: String,

    /// Provider that emitted the event
    pub provider_id: ProviderId,

    /// Stage the event belongs to
    pub stage_type: StageType,

    /// Normalized terminal outcome
    pub outcome: StageOutcome,

    /// The provider's own status string, kept for auditing and deduplication
    pub raw_status: String,

    /// Stage-specific documents (articles, EIN letter, account details)
    pub documents: serde_json::Value,

    /// Full webhook payload as received
    pub raw_payload: serde_json::Value,
}

impl CompletionEvent {
    /// Normalize a provider status string into a terminal outcome
    ///
    /// `None` means the status is a non-terminal acknowledgement (the request
    /// is still being processed), which ingestion treats as an InReview ack.
    pub fn outcome_for_status(raw_status: &str) -> Result<Option<StageOutcome>, CoreError> {
        match raw_status {
            "completed" | "incorporated" | "issued" | "approved" => {
                Ok(Some(StageOutcome::Completed))
            }
            "failed" | "rejected" => Ok(Some(StageOutcome::Failed)),
            "submitted" | "in_progress" | "pending" | "under_review" => Ok(None),
            other => Err(CoreError::Serialization(format!(
                "Unrecognized provider status: {}",
                other
            ))),
        }
    }
}

/// A parsed inbound webhook: either a terminal completion or a progress ack
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookEvent {
    /// The provider reports a terminal outcome for the request
    Completion(CompletionEvent),
    /// The provider acknowledges the request is still being processed
    Progress {
        /// Provider-assigned request id
        external_request_id: String,
        /// The provider's own status string
        raw_status: String,
    },
}

/// Outbound request built by a provider adapter
///
/// `BuildRequest` is pure: the same company and context always produce a
/// byte-identical payload, so retries resubmit exactly what was first sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundRequest {
    /// Target provider
    pub provider_id: ProviderId,

    /// Stage the request initiates
    pub stage_type: StageType,

    /// Provider resource to POST to (e.g. "formations", "accounts")
    pub resource: String,

    /// JSON payload
    pub payload: serde_json::Value,
}

/// Provider acceptance of an outbound request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderAck {
    /// Provider-assigned request id
    pub external_request_id: String,

    /// Raw response body
    pub raw_response: serde_json::Value,
}

/// Result of handing a webhook to ingestion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookAck {
    /// The event was applied
    Applied,
    /// The event was a duplicate and was dropped without reapplying
    Deduplicated,
    /// The event was a non-terminal acknowledgement (request under review)
    Acknowledged,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_normalization() {
        assert_eq!(
            CompletionEvent::outcome_for_status("completed").unwrap(),
            Some(StageOutcome::Completed)
        );
        assert_eq!(
            CompletionEvent::outcome_for_status("incorporated").unwrap(),
            Some(StageOutcome::Completed)
        );
        assert_eq!(
            CompletionEvent::outcome_for_status("issued").unwrap(),
            Some(StageOutcome::Completed)
        );
        assert_eq!(
            CompletionEvent::outcome_for_status("approved").unwrap(),
            Some(StageOutcome::Completed)
        );
        assert_eq!(
            CompletionEvent::outcome_for_status("rejected").unwrap(),
            Some(StageOutcome::Failed)
        );
        assert_eq!(CompletionEvent::outcome_for_status("in_progress").unwrap(), None);
        assert!(CompletionEvent::outcome_for_status("exploded").is_err());
    }
}
