//!
//! Charter Providers - Partner integrations for the Charter formation engine
//!
//! One adapter per (stage, partner) pair: Firstbase, Clerky, and ZenBusiness
//! for incorporation, Firstbase and Clerky for EIN issuance, Mercury for
//! business banking. Credentials load from the environment; `build_registry`
//! wires every configured partner into a core provider registry and fails
//! fast when a whole stage would be left without a provider.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Partner credentials and endpoints
pub mod config;

/// Webhook signature verification
pub mod signature;

/// Outbound HTTP transport
pub mod transport;

/// Incorporation stage adapters
pub mod incorporation;

/// EIN stage adapters
pub mod ein;

/// Banking stage adapter
pub mod bank;

mod webhook;

pub use config::{PartnerConfig, ProvidersConfig};
pub use signature::WebhookVerifier;
pub use transport::{HttpTransport, RetryPolicy};

use bank::MercuryBank;
use charter_core::{CoreError, ProviderRegistry, StageType};
use ein::{ClerkyEin, FirstbaseEin};
use incorporation::{ClerkyIncorporation, FirstbaseIncorporation, ZenBusinessIncorporation};
use std::sync::Arc;

/// Build the provider registry from loaded configuration
///
/// Registers an adapter for every configured partner that serves a stage.
/// Registration order fixes the per-stage defaults: Firstbase for
/// incorporation and EIN when configured, Mercury for banking. A stage with
/// no configured partner at all is a startup error.
pub fn build_registry(config: &ProvidersConfig) -> Result<ProviderRegistry, CoreError> {
    let mut registry = ProviderRegistry::new();

    if let Some(partner) = config.partner(config::FIRSTBASE) {
        registry.register(Arc::new(FirstbaseIncorporation::new(&partner.webhook_secret)?));
        registry.register(Arc::new(FirstbaseEin::new(&partner.webhook_secret)?));
    }
    if let Some(partner) = config.partner(config::CLERKY) {
        registry.register(Arc::new(ClerkyIncorporation::new(&partner.webhook_secret)?));
        registry.register(Arc::new(ClerkyEin::new(&partner.webhook_secret)?));
    }
    if let Some(partner) = config.partner(config::ZENBUSINESS) {
        registry.register(Arc::new(ZenBusinessIncorporation::new(&partner.webhook_secret)?));
    }
    if let Some(partner) = config.partner(config::MERCURY) {
        registry.register(Arc::new(MercuryBank::new(&partner.webhook_secret)?));
    }

    for stage in StageType::SEQUENCE {
        if registry.providers_for(stage).is_empty() {
            return Err(CoreError::Configuration(format!(
                "No partner configured for stage '{}'",
                stage
            )));
        }
    }

    Ok(registry)
}
