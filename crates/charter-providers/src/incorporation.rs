//! Incorporation stage adapters: Firstbase, Clerky, ZenBusiness
//!
//! All three partners take the same base payload (company identity plus
//! founder identity data) and differ only in formation-package fields.
//! Requests POST to the partner's `formations` resource.

use crate::signature::WebhookVerifier;
use crate::webhook::parse_partner_webhook;
use charter_core::{
    Company, CoreError, Founder, OutboundRequest, ProviderAdapter, ProviderId, StageContext,
    StageType, WebhookEvent,
};
use serde_json::{json, Value};

const RESOURCE: &str = "formations";

fn founder_identity(founder: &Founder) -> Value {
    json!({
        "legal_name": founder.legal_name,
        "date_of_birth": founder.date_of_birth,
        "address": founder.address,
        "id_type": founder.id_type,
        "id_number": founder.id_number,
    })
}

fn base_payload(company: &Company, context: &StageContext) -> Value {
    json!({
        "company_name": company.name,
        "entity_type": company.entity_kind,
        "state": company.jurisdiction,
        "company_details": company.details,
        "founders": context.founders.iter().map(founder_identity).collect::<Vec<_>>(),
    })
}

fn merge(mut base: Value, extra: Value) -> Value {
    if let (Some(base_map), Some(extra_map)) = (base.as_object_mut(), extra.as_object()) {
        for (key, value) in extra_map {
            base_map.insert(key.clone(), value.clone());
        }
    }
    base
}

/// Firstbase formation adapter
#[derive(Debug)]
pub struct FirstbaseIncorporation {
    provider_id: ProviderId,
    verifier: WebhookVerifier,
}

impl FirstbaseIncorporation {
    /// Create the adapter with the partner's webhook secret
    pub fn new(webhook_secret: impl AsRef<[u8]>) -> Result<Self, CoreError> {
        Ok(Self {
            provider_id: ProviderId::new(crate::config::FIRSTBASE),
            verifier: WebhookVerifier::new(webhook_secret)?,
        })
    }
}

impl ProviderAdapter for FirstbaseIncorporation {
    fn provider_id(&self) -> &ProviderId {
        &self.provider_id
    }

    fn stage_type(&self) -> StageType {
        StageType::Incorporation
    }

    fn build_request(
        &self,
        company: &Company,
        context: &StageContext,
    ) -> Result<OutboundRequest, CoreError> {
        let payload = merge(
            base_payload(company, context),
            json!({
                "formation_type": company.entity_kind,
                "registered_agent": { "use_partner": true },
            }),
        );
        Ok(OutboundRequest {
            provider_id: self.provider_id.clone(),
            stage_type: StageType::Incorporation,
            resource: RESOURCE.to_string(),
            payload,
        })
    }

    fn parse_webhook(&self, raw_payload: &[u8]) -> Result<WebhookEvent, CoreError> {
        parse_partner_webhook(&self.provider_id, StageType::Incorporation, raw_payload)
    }

    fn verify_signature(
        &self,
        raw_payload: &[u8],
        signature_header: &str,
    ) -> Result<(), CoreError> {
        self.verifier.verify(raw_payload, signature_header)
    }
}

/// Clerky formation adapter
#[derive(Debug)]
pub struct ClerkyIncorporation {
    provider_id: ProviderId,
    verifier: WebhookVerifier,
}

impl ClerkyIncorporation {
    /// Create the adapter with the partner's webhook secret
    pub fn new(webhook_secret: impl AsRef<[u8]>) -> Result<Self, CoreError> {
        Ok(Self {
            provider_id: ProviderId::new(crate::config::CLERKY),
            verifier: WebhookVerifier::new(webhook_secret)?,
        })
    }
}

impl ProviderAdapter for ClerkyIncorporation {
    fn provider_id(&self) -> &ProviderId {
        &self.provider_id
    }

    fn stage_type(&self) -> StageType {
        StageType::Incorporation
    }

    fn build_request(
        &self,
        company: &Company,
        context: &StageContext,
    ) -> Result<OutboundRequest, CoreError> {
        let payload = merge(
            base_payload(company, context),
            json!({
                "formation_package": "standard",
                "registered_agent_service": true,
            }),
        );
        Ok(OutboundRequest {
            provider_id: self.provider_id.clone(),
            stage_type: StageType::Incorporation,
            resource: RESOURCE.to_string(),
            payload,
        })
    }

    fn parse_webhook(&self, raw_payload: &[u8]) -> Result<WebhookEvent, CoreError> {
        parse_partner_webhook(&self.provider_id, StageType::Incorporation, raw_payload)
    }

    fn verify_signature(
        &self,
        raw_payload: &[u8],
        signature_header: &str,
    ) -> Result<(), CoreError> {
        self.verifier.verify(raw_payload, signature_header)
    }
}

/// ZenBusiness formation adapter
#[derive(Debug)]
pub struct ZenBusinessIncorporation {
    provider_id: ProviderId,
    verifier: WebhookVerifier,
}

impl ZenBusinessIncorporation {
    /// Create the adapter with the partner's webhook secret
    pub fn new(webhook_secret: impl AsRef<[u8]>) -> Result<Self, CoreError> {
        Ok(Self {
            provider_id: ProviderId::new(crate::config::ZENBUSINESS),
            verifier: WebhookVerifier::new(webhook_secret)?,
        })
    }
}

impl ProviderAdapter for ZenBusinessIncorporation {
    fn provider_id(&self) -> &ProviderId {
        &self.provider_id
    }

    fn stage_type(&self) -> StageType {
        StageType::Incorporation
    }

    fn build_request(
        &self,
        company: &Company,
        context: &StageContext,
    ) -> Result<OutboundRequest, CoreError> {
        let payload = merge(
            base_payload(company, context),
            json!({
                "formation_package": "starter",
                "registered_agent": true,
            }),
        );
        Ok(OutboundRequest {
            provider_id: self.provider_id.clone(),
            stage_type: StageType::Incorporation,
            resource: RESOURCE.to_string(),
            payload,
        })
    }

    fn parse_webhook(&self, raw_payload: &[u8]) -> Result<WebhookEvent, CoreError> {
        parse_partner_webhook(&self.provider_id, StageType::Incorporation, raw_payload)
    }

    fn verify_signature(
        &self,
        raw_payload: &[u8],
        signature_header: &str,
    ) -> Result<(), CoreError> {
        self.verifier.verify(raw_payload, signature_header)
    }
}
