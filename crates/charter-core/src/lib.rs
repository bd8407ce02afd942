//!
//! Charter Core - Core runtime for the Charter formation engine
//!
//! This crate defines the domain model, provider abstraction, and
//! application services that drive a company through the fixed formation
//! pipeline: incorporation, EIN issuance, then bank account opening.
//! Each stage is executed by an external partner provider; progress is
//! driven entirely by the webhooks those providers deliver.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Domain layer - companies, stage records, repositories
pub mod domain;

/// Application services - orchestration and webhook ingestion
pub mod application;

/// Provider adapter abstraction and registry
pub mod provider;

/// Canonical cross-layer types
pub mod types;

/// Error types
pub mod error;

pub use error::CoreError;

// Re-export main API types for easy use
pub use application::{
    QueueSpawner, ReconcileSummary, TaskSpawner, TokioSpawner, WebhookIngestion,
    WorkflowOrchestrator,
};
pub use domain::company::{Company, CompanyId, CompanyStatus, EntityKind, Founder};
pub use domain::repository::{
    CompanyRepository, ProcessedEventRepository, StageRecordRepository,
};
pub use domain::stage::{ProviderId, StageRecord, StageRecordId, StageStatus, StageType};
pub use provider::{
    Notifier, ProviderAdapter, ProviderRegistry, ProviderTransport, StageContext,
    TracingNotifier,
};
pub use types::{
    CompletionEvent, OutboundRequest, ProviderAck, StageOutcome, WebhookAck, WebhookEvent,
};
