//! EIN stage adapters: Firstbase and Clerky
//!
//! EIN applications carry the incorporation documents produced by the
//! previous stage plus responsible-party details from the company's detail
//! map. Requests POST to the partner's `ein-applications` resource.

use crate::signature::WebhookVerifier;
use crate::webhook::parse_partner_webhook;
use charter_core::{
    Company, CoreError, OutboundRequest, ProviderAdapter, ProviderId, StageContext, StageType,
    WebhookEvent,
};
use serde_json::{json, Value};

const RESOURCE: &str = "ein-applications";

const DEFAULT_BUSINESS_PURPOSE: &str = "General business purposes";
const DEFAULT_FISCAL_YEAR_END: &str = "12/31";

fn detail_or<'a>(company: &'a Company, key: &str, default: &'a str) -> Value {
    company
        .detail(key)
        .cloned()
        .unwrap_or_else(|| Value::String(default.to_string()))
}

fn responsible_party(company: &Company) -> Value {
    json!({
        "name": company.detail("responsible_party_name").cloned().unwrap_or(Value::Null),
        "ssn": company.detail("responsible_party_ssn").cloned().unwrap_or(Value::Null),
        "address": company.detail("responsible_party_address").cloned().unwrap_or(Value::Null),
    })
}

fn base_payload(company: &Company, context: &StageContext) -> Value {
    json!({
        "company_name": company.name,
        "entity_type": company.entity_kind,
        "state": company.jurisdiction,
        "company_details": company.details,
        "articles_of_incorporation": context.documents.get("articles_of_incorporation").cloned().unwrap_or(Value::Null),
        "formation_certificate": context.documents.get("formation_certificate").cloned().unwrap_or(Value::Null),
        "business_purpose": detail_or(company, "business_purpose", DEFAULT_BUSINESS_PURPOSE),
        "fiscal_year_end": detail_or(company, "fiscal_year_end", DEFAULT_FISCAL_YEAR_END),
    })
}

/// Firstbase EIN adapter
#[derive(Debug)]
pub struct FirstbaseEin {
    provider_id: ProviderId,
    verifier: WebhookVerifier,
}

impl FirstbaseEin {
    /// Create the adapter with the partner's webhook secret
    pub fn new(webhook_secret: impl AsRef<[u8]>) -> Result<Self, CoreError> {
        Ok(Self {
            provider_id: ProviderId::new(crate::config::FIRSTBASE),
            verifier: WebhookVerifier::new(webhook_secret)?,
        })
    }
}

impl ProviderAdapter for FirstbaseEin {
    fn provider_id(&self) -> &ProviderId {
        &self.provider_id
    }

    fn stage_type(&self) -> StageType {
        StageType::Ein
    }

    fn build_request(
        &self,
        company: &Company,
        context: &StageContext,
    ) -> Result<OutboundRequest, CoreError> {
        let mut payload = base_payload(company, context);
        if let Some(map) = payload.as_object_mut() {
            map.insert("ein_type".to_string(), json!("business"));
            map.insert("responsible_party".to_string(), responsible_party(company));
        }
        Ok(OutboundRequest {
            provider_id: self.provider_id.clone(),
            stage_type: StageType::Ein,
            resource: RESOURCE.to_string(),
            payload,
        })
    }

    fn parse_webhook(&self, raw_payload: &[u8]) -> Result<WebhookEvent, CoreError> {
        parse_partner_webhook(&self.provider_id, StageType::Ein, raw_payload)
    }

    fn verify_signature(
        &self,
        raw_payload: &[u8],
        signature_header: &str,
    ) -> Result<(), CoreError> {
        self.verifier.verify(raw_payload, signature_header)
    }
}

/// Clerky EIN adapter (files an SS-4 on the company's behalf)
#[derive(Debug)]
pub struct ClerkyEin {
    provider_id: ProviderId,
    verifier: WebhookVerifier,
}

impl ClerkyEin {
    /// Create the adapter with the partner's webhook secret
    pub fn new(webhook_secret: impl AsRef<[u8]>) -> Result<Self, CoreError> {
        Ok(Self {
            provider_id: ProviderId::new(crate::config::CLERKY),
            verifier: WebhookVerifier::new(webhook_secret)?,
        })
    }
}

impl ProviderAdapter for ClerkyEin {
    fn provider_id(&self) -> &ProviderId {
        &self.provider_id
    }

    fn stage_type(&self) -> StageType {
        StageType::Ein
    }

    fn build_request(
        &self,
        company: &Company,
        context: &StageContext,
    ) -> Result<OutboundRequest, CoreError> {
        let mut payload = base_payload(company, context);
        if let Some(map) = payload.as_object_mut() {
            map.insert("application_type".to_string(), json!("ss4"));
            map.insert(
                "responsible_party_info".to_string(),
                responsible_party(company),
            );
        }
        Ok(OutboundRequest {
            provider_id: self.provider_id.clone(),
            stage_type: StageType::Ein,
            resource: RESOURCE.to_string(),
            payload,
        })
    }

    fn parse_webhook(&self, raw_payload: &[u8]) -> Result<WebhookEvent, CoreError> {
        parse_partner_webhook(&self.provider_id, StageType::Ein, raw_payload)
    }

    fn verify_signature(
        &self,
        raw_payload: &[u8],
        signature_header: &str,
    ) -> Result<(), CoreError> {
        self.verifier.verify(raw_payload, signature_header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use charter_core::EntityKind;
    use charter_core::StageOutcome;

    fn incorporated_company() -> (Company, StageContext) {
        let company = Company::new("Acme LLC", EntityKind::Llc, "DE").with_details(json!({
            "responsible_party_name": "Jordan Doe",
            "responsible_party_ssn": "123-45-6789",
            "responsible_party_address": "1 Market St",
        }));
        let context = StageContext {
            documents: json!({
                "articles_of_incorporation": "https://docs.example/articles.pdf",
                "formation_certificate": "https://docs.example/certificate.pdf",
            }),
            ..StageContext::default()
        };
        (company, context)
    }

    #[test]
    fn test_firstbase_payload_carries_documents_and_party() {
        let (company, context) = incorporated_company();
        let adapter = FirstbaseEin::new("secret").unwrap();

        let request = adapter.build_request(&company, &context).unwrap();
        assert_eq!(request.resource, "ein-applications");
        assert_eq!(request.payload["ein_type"], "business");
        assert_eq!(
            request.payload["articles_of_incorporation"],
            "https://docs.example/articles.pdf"
        );
        assert_eq!(request.payload["responsible_party"]["name"], "Jordan Doe");
        assert_eq!(request.payload["business_purpose"], "General business purposes");
        assert_eq!(request.payload["fiscal_year_end"], "12/31");
    }

    #[test]
    fn test_detail_overrides_win_over_defaults() {
        let (mut company, context) = incorporated_company();
        company.details["business_purpose"] = json!("Software consulting");
        company.details["fiscal_year_end"] = json!("06/30");

        let adapter = ClerkyEin::new("secret").unwrap();
        let request = adapter.build_request(&company, &context).unwrap();
        assert_eq!(request.payload["business_purpose"], "Software consulting");
        assert_eq!(request.payload["fiscal_year_end"], "06/30");
        assert_eq!(request.payload["application_type"], "ss4");
        assert_eq!(
            request.payload["responsible_party_info"]["ssn"],
            "123-45-6789"
        );
    }

    #[test]
    fn test_issued_webhook_parses_as_completion() {
        let adapter = FirstbaseEin::new("secret").unwrap();
        let event = adapter
            .parse_webhook(
                br#"{"request_id": "FB-EIN-1", "status": "issued", "ein_number": "12-3456789", "documents": {"ein_letter": "https://docs.example/cp575.pdf"}}"#,
            )
            .unwrap();

        match event {
            WebhookEvent::Completion(event) => {
                assert_eq!(event.outcome, StageOutcome::Completed);
                assert_eq!(event.raw_payload["ein_number"], "12-3456789");
            }
            other => panic!("Expected completion, got {:?}", other),
        }
    }
}
