//! Provider adapter abstraction and registry
//!
//! Each (stage type, provider) pair gets one adapter implementing the
//! capability set: build the outbound payload, parse inbound webhooks into
//! canonical completion events, and verify webhook authenticity. The registry
//! resolves adapters at startup and is read-only afterwards.

use crate::domain::company::{Company, Founder};
use crate::domain::stage::{ProviderId, StageType};
use crate::types::{OutboundRequest, ProviderAck, WebhookEvent};
use crate::CoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Data a stage request may need beyond the company record itself:
/// founders and the documents accumulated by earlier stages.
#[derive(Debug, Clone, Default)]
pub struct StageContext {
    /// Founders attached to the company
    pub founders: Vec<Founder>,

    /// Documents from previously completed stages, keyed by document name
    /// (articles_of_incorporation, formation_certificate, ein_letter, ...)
    pub documents: serde_json::Value,

    /// EIN issued by the tax partner, once known
    pub ein_number: Option<String>,
}

/// Per-provider translation layer
///
/// `build_request` must be pure given its inputs so retries produce
/// byte-identical payloads. `verify_signature` must fail closed: an adapter
/// that cannot verify rejects, never defaults to accept.
pub trait ProviderAdapter: Send + Sync + std::fmt::Debug {
    /// The provider this adapter speaks for
    fn provider_id(&self) -> &ProviderId;

    /// The stage this adapter serves
    fn stage_type(&self) -> StageType;

    /// Build the outbound payload from canonical company data
    fn build_request(
        &self,
        company: &Company,
        context: &StageContext,
    ) -> Result<OutboundRequest, CoreError>;

    /// Parse a raw webhook body into a canonical event
    fn parse_webhook(&self, raw_payload: &[u8]) -> Result<WebhookEvent, CoreError>;

    /// Verify webhook authenticity against the raw body and signature header
    fn verify_signature(&self, raw_payload: &[u8], signature_header: &str)
        -> Result<(), CoreError>;
}

/// Transport that delivers an outbound request to a provider
///
/// The production implementation POSTs over HTTPS with timeout and retry;
/// the simulation substitutes an implementation that acknowledges locally.
#[async_trait]
pub trait ProviderTransport: Send + Sync {
    /// Submit the request, returning the provider's acknowledgement
    async fn submit(&self, request: &OutboundRequest) -> Result<ProviderAck, CoreError>;
}

/// Startup-time registry of provider adapters
///
/// Built once during wiring and read-only thereafter; resolution of an
/// unregistered (stage, provider) pair is a configuration error.
pub struct ProviderRegistry {
    adapters: HashMap<(StageType, ProviderId), Arc<dyn ProviderAdapter>>,
    defaults: HashMap<StageType, ProviderId>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("adapters", &self.adapters.keys().collect::<Vec<_>>())
            .field("defaults", &self.defaults)
            .finish()
    }
}

impl ProviderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
            defaults: HashMap::new(),
        }
    }

    /// Register an adapter under its (stage, provider) key.
    /// The first adapter registered for a stage becomes its default.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        let key = (adapter.stage_type(), adapter.provider_id().clone());
        self.defaults
            .entry(adapter.stage_type())
            .or_insert_with(|| adapter.provider_id().clone());
        self.adapters.insert(key, adapter);
    }

    /// Override the default provider for a stage
    pub fn set_default(&mut self, stage_type: StageType, provider_id: ProviderId) {
        self.defaults.insert(stage_type, provider_id);
    }

    /// Resolve the adapter for a (stage, provider) pair
    pub fn resolve(
        &self,
        stage_type: StageType,
        provider_id: &ProviderId,
    ) -> Result<Arc<dyn ProviderAdapter>, CoreError> {
        self.adapters
            .get(&(stage_type, provider_id.clone()))
            .cloned()
            .ok_or_else(|| {
                CoreError::Configuration(format!(
                    "No provider '{}' registered for stage '{}'",
                    provider_id, stage_type
                ))
            })
    }

    /// Default provider for a stage, used when chaining auto-initiates the
    /// next stage with no previously recorded choice
    pub fn default_provider(&self, stage_type: StageType) -> Result<ProviderId, CoreError> {
        self.defaults.get(&stage_type).cloned().ok_or_else(|| {
            CoreError::Configuration(format!(
                "No providers registered for stage '{}'",
                stage_type
            ))
        })
    }

    /// Providers registered for a stage
    pub fn providers_for(&self, stage_type: StageType) -> Vec<ProviderId> {
        let mut providers: Vec<ProviderId> = self
            .adapters
            .keys()
            .filter(|(stage, _)| *stage == stage_type)
            .map(|(_, provider)| provider.clone())
            .collect();
        providers.sort_by(|a, b| a.0.cmp(&b.0));
        providers
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Informed of terminal pipeline completion to deliver credentials.
/// External collaborator: one method, content and delivery unspecified here.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Called once when a company reaches `bank_ready`
    async fn company_ready(&self, company: &Company) -> Result<(), CoreError>;
}

/// Notifier that only logs; used by the simulation and in tests
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn company_ready(&self, company: &Company) -> Result<(), CoreError> {
        tracing::info!(
            company_id = %company.id,
            company_name = %company.name,
            "Company pipeline complete; bank account ready"
        );
        Ok(())
    }
}
