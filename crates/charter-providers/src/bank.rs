//! Banking stage adapter: Mercury
//!
//! Bank applications carry the full KYC picture: the EIN issued by the tax
//! partner, the document trail from both earlier stages, founder identity
//! images, and expected-activity figures from the company's detail map.
//! Requests POST to the partner's `accounts` resource.

use crate::signature::WebhookVerifier;
use crate::webhook::parse_partner_webhook;
use charter_core::{
    Company, CoreError, Founder, OutboundRequest, ProviderAdapter, ProviderId, StageContext,
    StageType, WebhookEvent,
};
use serde_json::{json, Value};

const RESOURCE: &str = "accounts";

const DEFAULT_INDUSTRY: &str = "Technology";
const DEFAULT_MONTHLY_TRANSACTIONS: u64 = 10_000;
const DEFAULT_MONTHLY_VOLUME: u64 = 50_000;

fn founder_kyc(founder: &Founder) -> Value {
    json!({
        "legal_name": founder.legal_name,
        "date_of_birth": founder.date_of_birth,
        "address": founder.address,
        "id_type": founder.id_type,
        "id_number": founder.id_number,
        "id_front_image": founder.id_front_image_url,
        "id_back_image": founder.id_back_image_url,
        "selfie_image": founder.selfie_image_url,
    })
}

fn kyc_data(company: &Company) -> Value {
    json!({
        "business_type": company.entity_kind,
        "industry": company.detail("industry").cloned()
            .unwrap_or_else(|| json!(DEFAULT_INDUSTRY)),
        "expected_monthly_transactions": company.detail("expected_monthly_transactions").cloned()
            .unwrap_or_else(|| json!(DEFAULT_MONTHLY_TRANSACTIONS)),
        "expected_monthly_volume": company.detail("expected_monthly_volume").cloned()
            .unwrap_or_else(|| json!(DEFAULT_MONTHLY_VOLUME)),
    })
}

/// Mercury business banking adapter
#[derive(Debug)]
pub struct MercuryBank {
    provider_id: ProviderId,
    verifier: WebhookVerifier,
}

impl MercuryBank {
    /// Create the adapter with the partner's webhook secret
    pub fn new(webhook_secret: impl AsRef<[u8]>) -> Result<Self, CoreError> {
        Ok(Self {
            provider_id: ProviderId::new(crate::config::MERCURY),
            verifier: WebhookVerifier::new(webhook_secret)?,
        })
    }
}

impl ProviderAdapter for MercuryBank {
    fn provider_id(&self) -> &ProviderId {
        &self.provider_id
    }

    fn stage_type(&self) -> StageType {
        StageType::Bank
    }

    fn build_request(
        &self,
        company: &Company,
        context: &StageContext,
    ) -> Result<OutboundRequest, CoreError> {
        let payload = json!({
            "company_name": company.name,
            "entity_type": company.entity_kind,
            "state": company.jurisdiction,
            "ein_number": context.ein_number,
            "articles_of_incorporation": context.documents.get("articles_of_incorporation").cloned().unwrap_or(Value::Null),
            "formation_certificate": context.documents.get("formation_certificate").cloned().unwrap_or(Value::Null),
            "ein_letter": context.documents.get("ein_letter").cloned().unwrap_or(Value::Null),
            "account_type": "checking",
            "founders": context.founders.iter().map(founder_kyc).collect::<Vec<_>>(),
            "kyc_data": kyc_data(company),
        });

        Ok(OutboundRequest {
            provider_id: self.provider_id.clone(),
            stage_type: StageType::Bank,
            resource: RESOURCE.to_string(),
            payload,
        })
    }

    fn parse_webhook(&self, raw_payload: &[u8]) -> Result<WebhookEvent, CoreError> {
        parse_partner_webhook(&self.provider_id, StageType::Bank, raw_payload)
    }

    fn verify_signature(
        &self,
        raw_payload: &[u8],
        signature_header: &str,
    ) -> Result<(), CoreError> {
        self.verifier.verify(raw_payload, signature_header)
    }
}
