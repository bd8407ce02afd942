//! Shared parsing for partner webhook bodies
//!
//! All current partners deliver the same envelope: a provider-assigned
//! request id (`request_id`, or `account_id` for banking), a `status`
//! string, and an optional `documents` map. Status vocabulary differs per
//! partner and is normalized by the core event type.

use charter_core::{CompletionEvent, CoreError, ProviderId, StageType, WebhookEvent};

/// Parse a partner webhook body into a canonical event
pub(crate) fn parse_partner_webhook(
    provider_id: &ProviderId,
    stage_type: StageType,
    raw_payload: &[u8],
) -> Result<WebhookEvent, CoreError> {
    let body: serde_json::Value = serde_json::from_slice(raw_payload)?;

    let external_request_id = ["request_id", "external_request_id", "account_id"]
        .iter()
        .find_map(|key| body.get(*key).and_then(|v| v.as_str()))
        .ok_or_else(|| {
            CoreError::Serialization(format!(
                "{} webhook from '{}' carries no request id",
                stage_type, provider_id
            ))
        })?
        .to_string();

    let raw_status = body
        .get("status")
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            CoreError::Serialization(format!(
                "{} webhook from '{}' carries no status",
                stage_type, provider_id
            ))
        })?
        .to_string();

    match CompletionEvent::outcome_for_status(&raw_status)? {
        Some(outcome) => Ok(WebhookEvent::Completion(CompletionEvent {
            external_request_id,
            provider_id: provider_id.clone(),
            stage_type,
            outcome,
            raw_status,
            documents: body.get("documents").cloned().unwrap_or(serde_json::Value::Null),
            raw_payload: body,
        })),
        None => Ok(WebhookEvent::Progress {
            external_request_id,
            raw_status,
        }),
    }
}
