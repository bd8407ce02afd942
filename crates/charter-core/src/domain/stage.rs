use crate::domain::company::{CompanyId, CompanyStatus};
use crate::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Value object: Stage record ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageRecordId(pub String);

impl StageRecordId {
    /// Generate a fresh random ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for StageRecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StageRecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Value object: provider identifier ("firstbase", "clerky", "mercury", ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderId(pub String);

impl ProviderId {
    /// Build from any string-ish value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One step of the fixed formation pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageType {
    /// Legal incorporation with a formation provider
    Incorporation,
    /// Tax-ID issuance with an EIN partner
    Ein,
    /// Bank account opening with a banking partner
    Bank,
}

impl StageType {
    /// The fixed pipeline order
    pub const SEQUENCE: [StageType; 3] = [StageType::Incorporation, StageType::Ein, StageType::Bank];

    /// Company status required before this stage may be initiated
    pub fn prerequisite(&self) -> CompanyStatus {
        match self {
            StageType::Incorporation => CompanyStatus::PendingIncorporation,
            StageType::Ein => CompanyStatus::Incorporated,
            StageType::Bank => CompanyStatus::EinReady,
        }
    }

    /// Company status while this stage is in flight
    pub fn in_progress_status(&self) -> CompanyStatus {
        match self {
            StageType::Incorporation => CompanyStatus::IncorporationInProgress,
            StageType::Ein => CompanyStatus::PendingEin,
            StageType::Bank => CompanyStatus::PendingBankApproval,
        }
    }

    /// Company status once this stage completes
    pub fn completed_status(&self) -> CompanyStatus {
        match self {
            StageType::Incorporation => CompanyStatus::Incorporated,
            StageType::Ein => CompanyStatus::EinReady,
            StageType::Bank => CompanyStatus::BankReady,
        }
    }

    /// Next stage in the fixed sequence, if any
    pub fn next(&self) -> Option<StageType> {
        match self {
            StageType::Incorporation => Some(StageType::Ein),
            StageType::Ein => Some(StageType::Bank),
            StageType::Bank => None,
        }
    }

    /// Webhook route group for this stage (`/webhooks/{group}/{provider}`)
    pub fn stage_group(&self) -> &'static str {
        match self {
            StageType::Incorporation => "incorporation",
            StageType::Ein => "ein",
            StageType::Bank => "bank",
        }
    }
}

impl fmt::Display for StageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.stage_group())
    }
}

/// Status of one stage attempt
///
/// Transitions are monotonic: NotStarted → Pending → Submitted → InReview →
/// {Completed | Failed}. Failed is reachable from any non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Record exists but nothing has been sent
    NotStarted,
    /// Outbound request built, not yet accepted by the provider
    Pending,
    /// Provider accepted the request and assigned an external request id
    Submitted,
    /// Provider acknowledged the request is being processed
    InReview,
    /// Provider reported success; terminal
    Completed,
    /// Provider reported failure or retries were exhausted; terminal
    Failed,
}

impl StageStatus {
    /// Position in the state machine order, used to reject backward transitions
    fn rank(&self) -> u8 {
        match self {
            StageStatus::NotStarted => 0,
            StageStatus::Pending => 1,
            StageStatus::Submitted => 2,
            StageStatus::InReview => 3,
            StageStatus::Completed => 4,
            StageStatus::Failed => 4,
        }
    }

    /// Completed and Failed end the record; a fresh record is needed to retry
    pub fn is_terminal(&self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::Failed)
    }

    /// Pending, Submitted and InReview count as in flight
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            StageStatus::Pending | StageStatus::Submitted | StageStatus::InReview
        )
    }
}

/// Aggregate: one attempt to complete one pipeline stage for one company
///
/// Stage records are append-only: they are created at initiation, finalized by
/// a completion event, and never deleted, forming the audit trail per company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    /// Unique identifier
    pub id: StageRecordId,

    /// Back-reference to the owning company
    pub company_id: CompanyId,

    /// Which pipeline step this record belongs to
    pub stage_type: StageType,

    /// Provider the request was routed to
    pub provider_id: ProviderId,

    /// Provider-assigned request id; absent until submission is accepted
    pub external_request_id: Option<String>,

    /// Current status
    pub status: StageStatus,

    /// Snapshot of the outbound request payload
    pub request_snapshot: serde_json::Value,

    /// Snapshot of the most recent inbound response/webhook payload
    pub response_snapshot: Option<serde_json::Value>,

    /// Terminal failure message, if any
    pub error: Option<String>,

    /// When the provider accepted the request
    pub submitted_at: Option<DateTime<Utc>>,

    /// When the record reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl StageRecord {
    /// Create a pending record holding the outbound request snapshot
    pub fn new(
        company_id: CompanyId,
        stage_type: StageType,
        provider_id: ProviderId,
        request_snapshot: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: StageRecordId::new(),
            company_id,
            stage_type,
            provider_id,
            external_request_id: None,
            status: StageStatus::Pending,
            request_snapshot,
            response_snapshot: None,
            error: None,
            submitted_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Guard for monotonic transitions; rejects anything that moves backwards
    /// or out of a terminal status
    fn advance_to(&mut self, next: StageStatus) -> Result<(), CoreError> {
        if self.status.is_terminal() || next.rank() <= self.status.rank() {
            return Err(CoreError::IllegalTransition(format!(
                "stage {} cannot move {:?} -> {:?}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Provider accepted the outbound request: stamp the external id and the
    /// submission time
    pub fn mark_submitted(
        &mut self,
        external_request_id: impl Into<String>,
        response: serde_json::Value,
    ) -> Result<(), CoreError> {
        self.advance_to(StageStatus::Submitted)?;
        self.external_request_id = Some(external_request_id.into());
        self.response_snapshot = Some(response);
        self.submitted_at = Some(Utc::now());
        Ok(())
    }

    /// Provider acknowledged the request is under review
    pub fn mark_in_review(&mut self) -> Result<(), CoreError> {
        self.advance_to(StageStatus::InReview)
    }

    /// Finalize the record as completed, storing the inbound snapshot
    pub fn complete(&mut self, response: serde_json::Value) -> Result<(), CoreError> {
        self.advance_to(StageStatus::Completed)?;
        self.response_snapshot = Some(response);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Finalize the record as failed, storing the error and inbound snapshot
    pub fn fail(
        &mut self,
        error: impl Into<String>,
        response: Option<serde_json::Value>,
    ) -> Result<(), CoreError> {
        if self.status.is_terminal() {
            return Err(CoreError::IllegalTransition(format!(
                "stage {} is already terminal ({:?})",
                self.id, self.status
            )));
        }
        self.status = StageStatus::Failed;
        self.error = Some(error.into());
        if let Some(response) = response {
            self.response_snapshot = Some(response);
        }
        self.completed_at = Some(Utc::now());
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Document URLs captured on completion (articles, certificates, EIN letter)
    pub fn documents(&self) -> Option<&serde_json::Value> {
        self.response_snapshot
            .as_ref()
            .and_then(|r| r.get("documents"))
    }
}
