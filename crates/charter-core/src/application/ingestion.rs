//! Webhook ingestion: verify, parse, deduplicate, apply
//!
//! One entry point per (stage, provider) webhook endpoint. Verification
//! happens against the raw body before any parsing, and nothing is mutated
//! until the signature checks out. Duplicate terminal events are dropped by
//! fingerprint before they reach the orchestrator.

use crate::application::orchestrator::WorkflowOrchestrator;
use crate::domain::repository::ProcessedEventRepository;
use crate::domain::stage::{ProviderId, StageType};
use crate::provider::ProviderRegistry;
use crate::types::{WebhookAck, WebhookEvent};
use crate::CoreError;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Receives raw provider webhooks and turns them into orchestrator calls
pub struct WebhookIngestion {
    registry: Arc<ProviderRegistry>,
    processed: Arc<dyn ProcessedEventRepository>,
    orchestrator: WorkflowOrchestrator,
}

impl WebhookIngestion {
    /// Create an ingestion front for the given orchestrator
    pub fn new(
        registry: Arc<ProviderRegistry>,
        processed: Arc<dyn ProcessedEventRepository>,
        orchestrator: WorkflowOrchestrator,
    ) -> Self {
        Self {
            registry,
            processed,
            orchestrator,
        }
    }

    /// Handle one inbound webhook delivery
    ///
    /// A missing or invalid signature rejects the delivery before any state
    /// changes. Terminal events are fingerprinted over (provider, external
    /// request id, raw status); redelivery of an already-applied fingerprint
    /// acknowledges without reapplying.
    pub async fn receive(
        &self,
        stage_type: StageType,
        provider_id: &ProviderId,
        raw_payload: &[u8],
        signature_header: Option<&str>,
    ) -> Result<WebhookAck, CoreError> {
        let adapter = self.registry.resolve(stage_type, provider_id)?;

        let signature = signature_header.ok_or_else(|| {
            CoreError::SignatureVerification(format!(
                "Missing signature header on {} webhook from '{}'",
                stage_type, provider_id
            ))
        })?;
        adapter.verify_signature(raw_payload, signature)?;

        match adapter.parse_webhook(raw_payload)? {
            WebhookEvent::Progress {
                external_request_id,
                raw_status,
            } => {
                debug!(
                    provider = %provider_id,
                    external_request_id = %external_request_id,
                    raw_status = %raw_status,
                    "Progress webhook"
                );
                self.orchestrator
                    .acknowledge_progress(provider_id, &external_request_id)
                    .await?;
                Ok(WebhookAck::Acknowledged)
            }
            WebhookEvent::Completion(event) => {
                let fingerprint = event_fingerprint(
                    provider_id,
                    &event.external_request_id,
                    &event.raw_status,
                );

                if self.processed.is_processed(&fingerprint).await? {
                    info!(
                        provider = %provider_id,
                        external_request_id = %event.external_request_id,
                        "Duplicate webhook dropped"
                    );
                    return Ok(WebhookAck::Deduplicated);
                }

                self.orchestrator.apply_completion(event.clone()).await?;

                // Marked only after a successful apply so a failed apply can
                // be redelivered
                if !self.processed.mark_processed(&fingerprint).await? {
                    warn!(
                        provider = %provider_id,
                        external_request_id = %event.external_request_id,
                        "Webhook fingerprint raced; event already marked"
                    );
                }
                Ok(WebhookAck::Applied)
            }
        }
    }
}

/// Stable fingerprint for terminal-event deduplication
fn event_fingerprint(provider_id: &ProviderId, external_request_id: &str, raw_status: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(provider_id.0.as_bytes());
    hasher.update(b"|");
    hasher.update(external_request_id.as_bytes());
    hasher.update(b"|");
    hasher.update(raw_status.as_bytes());
    hex::encode(hasher.finalize())
}
