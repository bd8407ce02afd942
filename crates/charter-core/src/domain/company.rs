use crate::domain::stage::StageType;
use crate::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Value object: Company ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompanyId(pub String);

impl CompanyId {
    /// Generate a fresh random ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for CompanyId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CompanyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Legal form of the business being created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Limited liability company
    Llc,
    /// C or S corporation
    Corporation,
    /// General partnership
    Partnership,
    /// Single-owner unincorporated business
    SoleProprietorship,
}

/// Lifecycle status of a company, derived from its stage records
///
/// The status is a projection: it is never set directly by callers, only
/// recomputed by the orchestrator when a stage record is finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompanyStatus {
    /// Created, incorporation not yet initiated
    PendingIncorporation,
    /// Incorporation request submitted to a formation provider
    IncorporationInProgress,
    /// Formation provider confirmed incorporation
    Incorporated,
    /// EIN application submitted
    PendingEin,
    /// EIN issued by the tax partner
    EinReady,
    /// Bank account application submitted
    PendingBankApproval,
    /// Bank account open; pipeline complete
    BankReady,
    /// A stage failed terminally; names the stage that failed
    Failed(StageType),
}

impl CompanyStatus {
    /// Wire representation (`pending_incorporation`, ..., `failed_<stage>`)
    pub fn as_str(&self) -> &'static str {
        match self {
            CompanyStatus::PendingIncorporation => "pending_incorporation",
            CompanyStatus::IncorporationInProgress => "incorporation_in_progress",
            CompanyStatus::Incorporated => "incorporated",
            CompanyStatus::PendingEin => "pending_ein",
            CompanyStatus::EinReady => "ein_ready",
            CompanyStatus::PendingBankApproval => "pending_bank_approval",
            CompanyStatus::BankReady => "bank_ready",
            CompanyStatus::Failed(StageType::Incorporation) => "failed_incorporation",
            CompanyStatus::Failed(StageType::Ein) => "failed_ein",
            CompanyStatus::Failed(StageType::Bank) => "failed_bank",
        }
    }

    /// Whether this status ends the pipeline
    pub fn is_terminal(&self) -> bool {
        matches!(self, CompanyStatus::BankReady | CompanyStatus::Failed(_))
    }
}

impl fmt::Display for CompanyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompanyStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_incorporation" => Ok(CompanyStatus::PendingIncorporation),
            "incorporation_in_progress" => Ok(CompanyStatus::IncorporationInProgress),
            "incorporated" => Ok(CompanyStatus::Incorporated),
            "pending_ein" => Ok(CompanyStatus::PendingEin),
            "ein_ready" => Ok(CompanyStatus::EinReady),
            "pending_bank_approval" => Ok(CompanyStatus::PendingBankApproval),
            "bank_ready" => Ok(CompanyStatus::BankReady),
            "failed_incorporation" => Ok(CompanyStatus::Failed(StageType::Incorporation)),
            "failed_ein" => Ok(CompanyStatus::Failed(StageType::Ein)),
            "failed_bank" => Ok(CompanyStatus::Failed(StageType::Bank)),
            other => Err(CoreError::Serialization(format!(
                "Unknown company status: {}",
                other
            ))),
        }
    }
}

impl Serialize for CompanyStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CompanyStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A founder attached to a company, with the identity data providers require
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Founder {
    /// Full legal name
    pub legal_name: String,
    /// Date of birth, ISO 8601 date string
    pub date_of_birth: String,
    /// Residential address
    pub address: String,
    /// Identity document type (passport, drivers_license, ...)
    pub id_type: String,
    /// Identity document number
    pub id_number: String,
    /// URL of the front image of the identity document, if collected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_front_image_url: Option<String>,
    /// URL of the back image of the identity document, if collected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_back_image_url: Option<String>,
    /// URL of the selfie captured for KYC, if collected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selfie_image_url: Option<String>,
}

/// Aggregate: one business being formed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    /// Unique identifier
    pub id: CompanyId,

    /// Display name (e.g. "Acme LLC")
    pub name: String,

    /// Legal form
    pub entity_kind: EntityKind,

    /// Jurisdiction code (US state, e.g. "CA")
    pub jurisdiction: String,

    /// Free-form detail map: industry, expected volumes, responsible-party info
    pub details: serde_json::Value,

    /// Founders, passed through to provider payloads
    pub founders: Vec<Founder>,

    /// Derived lifecycle status
    pub status: CompanyStatus,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl Company {
    /// Create a company at intake; every company starts pending incorporation
    pub fn new(
        name: impl Into<String>,
        entity_kind: EntityKind,
        jurisdiction: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: CompanyId::new(),
            name: name.into(),
            entity_kind,
            jurisdiction: jurisdiction.into(),
            details: serde_json::json!({}),
            founders: Vec::new(),
            status: CompanyStatus::PendingIncorporation,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach the free-form detail map
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    /// Attach founders
    pub fn with_founders(mut self, founders: Vec<Founder>) -> Self {
        self.founders = founders;
        self
    }

    /// Look up a detail value by key
    pub fn detail(&self, key: &str) -> Option<&serde_json::Value> {
        self.details.get(key)
    }

    /// Apply a recomputed status and bump the updated timestamp
    pub fn set_status(&mut self, status: CompanyStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}
