//! The workflow orchestrator: the state machine driving each company through
//! the fixed formation pipeline.
//!
//! All state-affecting operations for a single company are serialized through
//! a per-entity lock; webhook receipts for different companies proceed in
//! parallel. Chained next-stage initiation is dispatched through the
//! [`TaskSpawner`] seam and never blocks the caller of `apply_completion`.

use crate::application::spawner::TaskSpawner;
use crate::domain::company::{Company, CompanyId, CompanyStatus};
use crate::domain::repository::{CompanyRepository, StageRecordRepository};
use crate::domain::stage::{ProviderId, StageRecord, StageStatus, StageType};
use crate::provider::{Notifier, ProviderRegistry, ProviderTransport, StageContext};
use crate::types::{CompletionEvent, StageOutcome};
use crate::CoreError;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Outcome of a reconciliation sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Pending records whose outbound request was resubmitted
    pub resubmitted: usize,
    /// Completed stages whose successor initiation was re-dispatched
    pub rechained: usize,
}

/// Coordinates stage initiation, completion application, and chaining
#[derive(Clone)]
pub struct WorkflowOrchestrator {
    companies: Arc<dyn CompanyRepository>,
    stages: Arc<dyn StageRecordRepository>,
    registry: Arc<ProviderRegistry>,
    transport: Arc<dyn ProviderTransport>,
    notifier: Arc<dyn Notifier>,
    spawner: Arc<dyn TaskSpawner>,
    entity_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl WorkflowOrchestrator {
    /// Create a new orchestrator over the given collaborators
    pub fn new(
        companies: Arc<dyn CompanyRepository>,
        stages: Arc<dyn StageRecordRepository>,
        registry: Arc<ProviderRegistry>,
        transport: Arc<dyn ProviderTransport>,
        notifier: Arc<dyn Notifier>,
        spawner: Arc<dyn TaskSpawner>,
    ) -> Self {
        Self {
            companies,
            stages,
            registry,
            transport,
            notifier,
            spawner,
            entity_locks: Arc::new(DashMap::new()),
        }
    }

    /// Serialize state-affecting operations per company
    async fn lock_entity(&self, company_id: &CompanyId) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = self
            .entity_locks
            .entry(company_id.0.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Initiate a stage for a company
    ///
    /// Preconditions, checked in order: the company exists; no stage record
    /// for this (company, stage) is in flight; the company status satisfies
    /// the stage prerequisite. On success the stage record is Submitted and
    /// the company status moves to the stage's in-progress value. A transient
    /// transport failure leaves the record Pending for the reconciliation
    /// sweep to resubmit; a permanent failure finalizes the record as Failed.
    pub async fn initiate_stage(
        &self,
        company_id: &CompanyId,
        stage_type: StageType,
        provider_id: Option<ProviderId>,
    ) -> Result<StageRecord, CoreError> {
        let _guard = self.lock_entity(company_id).await;

        let mut company = self
            .companies
            .find_by_id(company_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("company {}", company_id)))?;

        if let Some(in_flight) = self.stages.find_in_flight(company_id, stage_type).await? {
            return Err(CoreError::InvalidState {
                subject: format!("{} initiation for company {}", stage_type, company_id),
                required: format!("no in-flight {} request", stage_type),
                actual: format!(
                    "request {} is {:?}",
                    in_flight.id, in_flight.status
                ),
            });
        }

        let required = stage_type.prerequisite();
        if company.status != required {
            return Err(CoreError::InvalidState {
                subject: format!("{} initiation for company {}", stage_type, company_id),
                required: required.as_str().to_string(),
                actual: company.status.as_str().to_string(),
            });
        }

        let provider_id = match provider_id {
            Some(provider_id) => provider_id,
            None => self.registry.default_provider(stage_type)?,
        };
        let adapter = self.registry.resolve(stage_type, &provider_id)?;

        let context = self.build_context(&company).await?;
        let request = adapter.build_request(&company, &context)?;

        // Persist the pending record before anything leaves the process
        let mut record = StageRecord::new(
            company_id.clone(),
            stage_type,
            provider_id.clone(),
            request.payload.clone(),
        );
        self.stages.save(&record).await?;

        info!(
            company_id = %company_id,
            stage = %stage_type,
            provider = %provider_id,
            record_id = %record.id,
            "Submitting stage request"
        );

        match self.transport.submit(&request).await {
            Ok(ack) => {
                record.mark_submitted(ack.external_request_id.clone(), ack.raw_response)?;
                self.stages.save(&record).await?;

                company.set_status(stage_type.in_progress_status());
                self.companies.save(&company).await?;

                info!(
                    company_id = %company_id,
                    stage = %stage_type,
                    external_request_id = %ack.external_request_id,
                    "Stage request accepted"
                );
                Ok(record)
            }
            Err(err @ CoreError::ProviderError { transient: false, .. }) => {
                // Permanent rejections are not retried; finalize the record
                record.fail(err.to_string(), None)?;
                self.stages.save(&record).await?;
                warn!(
                    company_id = %company_id,
                    stage = %stage_type,
                    error = %err,
                    "Stage request permanently rejected"
                );
                Err(err)
            }
            Err(err) => {
                // Transient failure: the record stays Pending and the
                // reconciliation sweep will resubmit the identical payload
                warn!(
                    company_id = %company_id,
                    stage = %stage_type,
                    error = %err,
                    "Stage request submission failed; record left pending"
                );
                Err(err)
            }
        }
    }

    /// Apply a completion event from a provider webhook or the simulation
    ///
    /// Resolves the event by external request id; applying an event to an
    /// already-terminal record is a successful no-op. On completion the
    /// company status is recomputed and, for non-terminal stages, the next
    /// stage is initiated through the spawner without blocking the caller.
    pub async fn apply_completion(&self, event: CompletionEvent) -> Result<(), CoreError> {
        let located = self
            .stages
            .find_by_external_id(&event.provider_id, &event.external_request_id)
            .await?
            .ok_or_else(|| {
                CoreError::NotFound(format!(
                    "stage record for external request {} ({})",
                    event.external_request_id, event.provider_id
                ))
            })?;

        let _guard = self.lock_entity(&located.company_id).await;

        // Reload under the lock; the record may have been finalized meanwhile
        let mut record = self
            .stages
            .find_by_id(&located.id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("stage record {}", located.id)))?;

        if record.status.is_terminal() {
            debug!(
                record_id = %record.id,
                status = ?record.status,
                "Completion event for terminal record; no-op"
            );
            return Ok(());
        }

        let mut company = self
            .companies
            .find_by_id(&record.company_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("company {}", record.company_id)))?;

        match event.outcome {
            StageOutcome::Completed => {
                record.complete(event.raw_payload.clone())?;
                // The completion must be durable before chaining is dispatched
                self.stages.save(&record).await?;

                company.set_status(record.stage_type.completed_status());
                self.companies.save(&company).await?;

                info!(
                    company_id = %company.id,
                    stage = %record.stage_type,
                    status = %company.status,
                    "Stage completed"
                );

                match record.stage_type.next() {
                    Some(_) => self.dispatch_chain(company.id.clone(), record.stage_type),
                    None => {
                        if let Err(err) = self.notifier.company_ready(&company).await {
                            warn!(
                                company_id = %company.id,
                                error = %err,
                                "Notifier failed after terminal completion"
                            );
                        }
                    }
                }
            }
            StageOutcome::Failed => {
                record.fail(
                    format!("provider reported '{}'", event.raw_status),
                    Some(event.raw_payload.clone()),
                )?;
                self.stages.save(&record).await?;

                company.set_status(CompanyStatus::Failed(record.stage_type));
                self.companies.save(&company).await?;

                warn!(
                    company_id = %company.id,
                    stage = %record.stage_type,
                    raw_status = %event.raw_status,
                    "Stage failed"
                );
            }
        }

        Ok(())
    }

    /// Record a provider's non-terminal acknowledgement (request under review)
    ///
    /// Idempotent: acknowledging a record already in review or terminal is a
    /// successful no-op.
    pub async fn acknowledge_progress(
        &self,
        provider_id: &ProviderId,
        external_request_id: &str,
    ) -> Result<(), CoreError> {
        let located = self
            .stages
            .find_by_external_id(provider_id, external_request_id)
            .await?
            .ok_or_else(|| {
                CoreError::NotFound(format!(
                    "stage record for external request {} ({})",
                    external_request_id, provider_id
                ))
            })?;

        let _guard = self.lock_entity(&located.company_id).await;

        let mut record = self
            .stages
            .find_by_id(&located.id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("stage record {}", located.id)))?;

        if record.status != StageStatus::Submitted {
            return Ok(());
        }

        record.mark_in_review()?;
        self.stages.save(&record).await?;
        debug!(record_id = %record.id, "Stage moved under review");
        Ok(())
    }

    /// Reconciliation sweep for crash recovery
    ///
    /// Resubmits Pending records whose outbound call never got an
    /// acknowledgement, and re-dispatches chaining for companies left with a
    /// completed stage but no successor stage record.
    pub async fn reconcile(&self) -> Result<ReconcileSummary, CoreError> {
        let mut summary = ReconcileSummary::default();

        for record in self.stages.list_in_flight().await? {
            if record.status == StageStatus::Pending {
                let company_id = record.company_id.clone();
                match self.resubmit_pending(&company_id, record).await {
                    Ok(true) => summary.resubmitted += 1,
                    Ok(false) => {}
                    Err(err) => warn!(error = %err, "Resubmission failed during reconcile"),
                }
            }
        }

        for company in self.companies.list_all().await? {
            for stage in StageType::SEQUENCE {
                let Some(next) = stage.next() else { continue };
                if company.status != stage.completed_status() {
                    continue;
                }
                if self.stages.find_latest(&company.id, next).await?.is_none() {
                    info!(
                        company_id = %company.id,
                        completed = %stage,
                        next = %next,
                        "Re-dispatching chained initiation"
                    );
                    self.dispatch_chain(company.id.clone(), stage);
                    summary.rechained += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Dispatch initiation of the stage after `completed` as detached work.
    /// Failures are recorded against the company, never propagated to the
    /// completion path that triggered them.
    fn dispatch_chain(&self, company_id: CompanyId, completed: StageType) {
        let orchestrator = self.clone();
        self.spawner.spawn(Box::pin(async move {
            if let Err(err) = orchestrator.run_chain(&company_id, completed).await {
                error!(
                    company_id = %company_id,
                    completed = %completed,
                    error = %err,
                    "Chained initiation failed"
                );
                if let Err(record_err) = orchestrator.record_chain_error(&company_id, &err).await {
                    error!(
                        company_id = %company_id,
                        error = %record_err,
                        "Failed to record chain error against company"
                    );
                }
            }
        }));
    }

    async fn run_chain(
        &self,
        company_id: &CompanyId,
        completed: StageType,
    ) -> Result<(), CoreError> {
        let next = completed
            .next()
            .ok_or_else(|| CoreError::Configuration(format!("{} has no successor", completed)))?;

        // Prefer the provider of a previous attempt at this stage; fall back
        // to the registry default
        let provider_id = match self.stages.find_latest(company_id, next).await? {
            Some(previous) => previous.provider_id,
            None => self.registry.default_provider(next)?,
        };

        self.initiate_stage(company_id, next, Some(provider_id))
            .await?;
        Ok(())
    }

    async fn record_chain_error(
        &self,
        company_id: &CompanyId,
        err: &CoreError,
    ) -> Result<(), CoreError> {
        let Some(mut company) = self.companies.find_by_id(company_id).await? else {
            return Ok(());
        };
        if let Some(details) = company.details.as_object_mut() {
            details.insert(
                "last_chain_error".to_string(),
                serde_json::Value::String(err.to_string()),
            );
        }
        company.updated_at = chrono::Utc::now();
        self.companies.save(&company).await
    }

    /// Assemble the request context: founders plus documents accumulated by
    /// earlier completed stages
    async fn build_context(&self, company: &Company) -> Result<StageContext, CoreError> {
        let mut documents = serde_json::Map::new();
        let mut ein_number = None;

        for record in self.stages.list_for_company(&company.id).await? {
            if record.status != StageStatus::Completed {
                continue;
            }
            if let Some(docs) = record.documents().and_then(|d| d.as_object()) {
                for (name, url) in docs {
                    documents.insert(name.clone(), url.clone());
                }
            }
            if record.stage_type == StageType::Ein {
                ein_number = record
                    .response_snapshot
                    .as_ref()
                    .and_then(|r| r.get("ein_number"))
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());
            }
        }

        Ok(StageContext {
            founders: company.founders.clone(),
            documents: serde_json::Value::Object(documents),
            ein_number,
        })
    }

    async fn resubmit_pending(
        &self,
        company_id: &CompanyId,
        stale: StageRecord,
    ) -> Result<bool, CoreError> {
        let _guard = self.lock_entity(company_id).await;

        // Reload under the lock; another path may have advanced it
        let Some(mut record) = self.stages.find_by_id(&stale.id).await? else {
            return Ok(false);
        };
        if record.status != StageStatus::Pending {
            return Ok(false);
        }

        let mut company = self
            .companies
            .find_by_id(company_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("company {}", company_id)))?;

        let adapter = self
            .registry
            .resolve(record.stage_type, &record.provider_id)?;
        let context = self.build_context(&company).await?;
        // build_request is pure, so this resubmits the identical payload
        let request = adapter.build_request(&company, &context)?;

        let ack = self.transport.submit(&request).await?;
        record.mark_submitted(ack.external_request_id, ack.raw_response)?;
        self.stages.save(&record).await?;

        company.set_status(record.stage_type.in_progress_status());
        self.companies.save(&company).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::spawner::QueueSpawner;
    use crate::domain::company::EntityKind;
    use crate::domain::repository::memory::{
        MemoryCompanyRepository, MemoryStageRecordRepository,
    };
    use crate::provider::ProviderAdapter;
    use crate::types::{OutboundRequest, ProviderAck, WebhookEvent};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Debug)]
    struct FakeAdapter {
        provider_id: ProviderId,
        stage_type: StageType,
    }

    impl FakeAdapter {
        fn new(provider: &str, stage_type: StageType) -> Arc<Self> {
            Arc::new(Self {
                provider_id: ProviderId::new(provider),
                stage_type,
            })
        }
    }

    impl ProviderAdapter for FakeAdapter {
        fn provider_id(&self) -> &ProviderId {
            &self.provider_id
        }

        fn stage_type(&self) -> StageType {
            self.stage_type
        }

        fn build_request(
            &self,
            company: &Company,
            context: &StageContext,
        ) -> Result<OutboundRequest, CoreError> {
            Ok(OutboundRequest {
                provider_id: self.provider_id.clone(),
                stage_type: self.stage_type,
                resource: "test".to_string(),
                payload: json!({
                    "company_name": company.name,
                    "stage": self.stage_type.stage_group(),
                    "documents": context.documents,
                }),
            })
        }

        fn parse_webhook(&self, _raw_payload: &[u8]) -> Result<WebhookEvent, CoreError> {
            unimplemented!("not exercised by orchestrator tests")
        }

        fn verify_signature(
            &self,
            _raw_payload: &[u8],
            _signature_header: &str,
        ) -> Result<(), CoreError> {
            Ok(())
        }
    }

    enum TransportMode {
        Accept,
        FailTransient,
        FailPermanent,
    }

    struct FakeTransport {
        mode: TransportMode,
        counter: AtomicUsize,
    }

    impl FakeTransport {
        fn accepting() -> Arc<Self> {
            Arc::new(Self {
                mode: TransportMode::Accept,
                counter: AtomicUsize::new(0),
            })
        }

        fn failing(transient: bool) -> Arc<Self> {
            Arc::new(Self {
                mode: if transient {
                    TransportMode::FailTransient
                } else {
                    TransportMode::FailPermanent
                },
                counter: AtomicUsize::new(0),
            })
        }

        fn submissions(&self) -> usize {
            self.counter.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl ProviderTransport for FakeTransport {
        async fn submit(&self, request: &OutboundRequest) -> Result<ProviderAck, CoreError> {
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            match self.mode {
                TransportMode::Accept => Ok(ProviderAck {
                    external_request_id: format!("EXT-{}-{}", request.stage_type, n),
                    raw_response: json!({"status": "submitted"}),
                }),
                TransportMode::FailTransient => {
                    Err(CoreError::provider_transient("gateway timeout"))
                }
                TransportMode::FailPermanent => {
                    Err(CoreError::provider_permanent("422 unprocessable"))
                }
            }
        }
    }

    struct CountingNotifier {
        notified: AtomicBool,
    }

    #[async_trait::async_trait]
    impl Notifier for CountingNotifier {
        async fn company_ready(&self, _company: &Company) -> Result<(), CoreError> {
            self.notified.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Fixture {
        orchestrator: WorkflowOrchestrator,
        companies: Arc<MemoryCompanyRepository>,
        stages: Arc<MemoryStageRecordRepository>,
        transport: Arc<FakeTransport>,
        spawner: Arc<QueueSpawner>,
        notifier: Arc<CountingNotifier>,
    }

    fn fixture_with(transport: Arc<FakeTransport>, registry: ProviderRegistry) -> Fixture {
        let companies = Arc::new(MemoryCompanyRepository::new());
        let stages = Arc::new(MemoryStageRecordRepository::new());
        let spawner = Arc::new(QueueSpawner::new());
        let notifier = Arc::new(CountingNotifier {
            notified: AtomicBool::new(false),
        });

        let orchestrator = WorkflowOrchestrator::new(
            companies.clone(),
            stages.clone(),
            Arc::new(registry),
            transport.clone(),
            notifier.clone(),
            spawner.clone(),
        );

        Fixture {
            orchestrator,
            companies,
            stages,
            transport,
            spawner,
            notifier,
        }
    }

    fn fixture_with_transport(transport: Arc<FakeTransport>) -> Fixture {
        let mut registry = ProviderRegistry::new();
        registry.register(FakeAdapter::new("firstbase", StageType::Incorporation));
        registry.register(FakeAdapter::new("firstbase", StageType::Ein));
        registry.register(FakeAdapter::new("mercury", StageType::Bank));
        fixture_with(transport, registry)
    }

    fn fixture() -> Fixture {
        fixture_with_transport(FakeTransport::accepting())
    }

    async fn seeded_company(fix: &Fixture) -> Company {
        let company = Company::new("Acme LLC", EntityKind::Llc, "CA");
        fix.companies.save(&company).await.unwrap();
        company
    }

    fn completion_for(record: &StageRecord, outcome: StageOutcome, raw_status: &str) -> CompletionEvent {
        CompletionEvent {
            external_request_id: record.external_request_id.clone().unwrap(),
            provider_id: record.provider_id.clone(),
            stage_type: record.stage_type,
            outcome,
            raw_status: raw_status.to_string(),
            documents: json!({}),
            raw_payload: json!({"status": raw_status, "documents": {}}),
        }
    }

    #[tokio::test]
    async fn test_initiate_unknown_company() {
        let fix = fixture();
        let err = fix
            .orchestrator
            .initiate_stage(&CompanyId::new(), StageType::Incorporation, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_initiate_submits_and_marks_in_progress() {
        let fix = fixture();
        let company = seeded_company(&fix).await;

        let record = fix
            .orchestrator
            .initiate_stage(&company.id, StageType::Incorporation, None)
            .await
            .unwrap();

        assert_eq!(record.status, StageStatus::Submitted);
        assert!(record.external_request_id.is_some());
        assert!(record.submitted_at.is_some());
        assert_eq!(record.request_snapshot["company_name"], "Acme LLC");

        let company = fix.companies.find_by_id(&company.id).await.unwrap().unwrap();
        assert_eq!(company.status, CompanyStatus::IncorporationInProgress);
    }

    #[tokio::test]
    async fn test_precondition_enforced_for_ein() {
        let fix = fixture();
        let company = seeded_company(&fix).await;

        let err = fix
            .orchestrator
            .initiate_stage(&company.id, StageType::Ein, None)
            .await
            .unwrap_err();

        match err {
            CoreError::InvalidState { required, actual, .. } => {
                assert_eq!(required, "incorporated");
                assert_eq!(actual, "pending_incorporation");
            }
            other => panic!("Expected InvalidState, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_single_in_flight_stage() {
        let fix = fixture();
        let company = seeded_company(&fix).await;

        fix.orchestrator
            .initiate_stage(&company.id, StageType::Incorporation, None)
            .await
            .unwrap();

        let err = fix
            .orchestrator
            .initiate_stage(&company.id, StageType::Incorporation, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_transient_failure_leaves_record_pending() {
        let fix = fixture_with_transport(FakeTransport::failing(true));
        let company = seeded_company(&fix).await;

        let err = fix
            .orchestrator
            .initiate_stage(&company.id, StageType::Incorporation, None)
            .await
            .unwrap_err();
        assert!(err.is_transient());

        let record = fix
            .stages
            .find_in_flight(&company.id, StageType::Incorporation)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, StageStatus::Pending);

        // Company status untouched until a submission is accepted
        let company = fix.companies.find_by_id(&company.id).await.unwrap().unwrap();
        assert_eq!(company.status, CompanyStatus::PendingIncorporation);
    }

    #[tokio::test]
    async fn test_permanent_failure_finalizes_record() {
        let fix = fixture_with_transport(FakeTransport::failing(false));
        let company = seeded_company(&fix).await;

        let err = fix
            .orchestrator
            .initiate_stage(&company.id, StageType::Incorporation, None)
            .await
            .unwrap_err();
        assert!(!err.is_transient());

        let record = fix
            .stages
            .find_latest(&company.id, StageType::Incorporation)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, StageStatus::Failed);

        // A fresh attempt is allowed: the failed record is not in flight
        assert!(fix
            .stages
            .find_in_flight(&company.id, StageType::Incorporation)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_apply_completion_unknown_request() {
        let fix = fixture();
        let event = CompletionEvent {
            external_request_id: "NOPE".to_string(),
            provider_id: ProviderId::new("firstbase"),
            stage_type: StageType::Incorporation,
            outcome: StageOutcome::Completed,
            raw_status: "completed".to_string(),
            documents: json!({}),
            raw_payload: json!({}),
        };

        let err = fix.orchestrator.apply_completion(event).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_completion_chains_next_stage() {
        let fix = fixture();
        let company = seeded_company(&fix).await;

        let record = fix
            .orchestrator
            .initiate_stage(&company.id, StageType::Incorporation, None)
            .await
            .unwrap();

        fix.orchestrator
            .apply_completion(completion_for(&record, StageOutcome::Completed, "completed"))
            .await
            .unwrap();

        // Status recomputed before the chain runs
        let loaded = fix.companies.find_by_id(&company.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, CompanyStatus::Incorporated);
        assert_eq!(fix.spawner.pending(), 1);

        fix.spawner.drain().await;

        let ein = fix
            .stages
            .find_latest(&company.id, StageType::Ein)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ein.status, StageStatus::Submitted);

        let loaded = fix.companies.find_by_id(&company.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, CompanyStatus::PendingEin);
    }

    #[tokio::test]
    async fn test_completion_is_idempotent() {
        let fix = fixture();
        let company = seeded_company(&fix).await;

        let record = fix
            .orchestrator
            .initiate_stage(&company.id, StageType::Incorporation, None)
            .await
            .unwrap();

        let event = completion_for(&record, StageOutcome::Completed, "completed");
        fix.orchestrator.apply_completion(event.clone()).await.unwrap();
        fix.spawner.drain().await;

        let submissions_before = fix.transport.submissions();

        // Reapplying the same event is a successful no-op
        fix.orchestrator.apply_completion(event).await.unwrap();
        fix.spawner.drain().await;

        assert_eq!(fix.transport.submissions(), submissions_before);
        let trail = fix.stages.list_for_company(&company.id).await.unwrap();
        assert_eq!(trail.len(), 2); // incorporation + one chained EIN
    }

    #[tokio::test]
    async fn test_failure_event_stops_pipeline() {
        let fix = fixture();
        let company = seeded_company(&fix).await;

        let record = fix
            .orchestrator
            .initiate_stage(&company.id, StageType::Incorporation, None)
            .await
            .unwrap();
        fix.orchestrator
            .apply_completion(completion_for(&record, StageOutcome::Completed, "completed"))
            .await
            .unwrap();
        fix.spawner.drain().await;

        let ein = fix
            .stages
            .find_latest(&company.id, StageType::Ein)
            .await
            .unwrap()
            .unwrap();
        fix.orchestrator
            .apply_completion(completion_for(&ein, StageOutcome::Failed, "rejected"))
            .await
            .unwrap();
        fix.spawner.drain().await;

        let loaded = fix.companies.find_by_id(&company.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, CompanyStatus::Failed(StageType::Ein));

        // No bank stage was created
        assert!(fix
            .stages
            .find_latest(&company.id, StageType::Bank)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_chain_failure_recorded_against_company() {
        // No EIN provider registered: the chained initiation after
        // incorporation cannot resolve an adapter
        let mut registry = ProviderRegistry::new();
        registry.register(FakeAdapter::new("firstbase", StageType::Incorporation));
        let fix = fixture_with(FakeTransport::accepting(), registry);
        let company = seeded_company(&fix).await;

        let record = fix
            .orchestrator
            .initiate_stage(&company.id, StageType::Incorporation, None)
            .await
            .unwrap();
        fix.orchestrator
            .apply_completion(completion_for(&record, StageOutcome::Completed, "completed"))
            .await
            .unwrap();
        fix.spawner.drain().await;

        // The completed stage is not rolled back
        let loaded = fix.companies.find_by_id(&company.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, CompanyStatus::Incorporated);

        // The chain failure lands on the company record
        let chain_error = loaded
            .detail("last_chain_error")
            .and_then(|v| v.as_str())
            .unwrap();
        assert!(chain_error.contains("No providers registered for stage 'ein'"));

        assert!(fix
            .stages
            .find_latest(&company.id, StageType::Ein)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_terminal_completion_notifies() {
        let fix = fixture();
        let company = seeded_company(&fix).await;

        let record = fix
            .orchestrator
            .initiate_stage(&company.id, StageType::Incorporation, None)
            .await
            .unwrap();
        fix.orchestrator
            .apply_completion(completion_for(&record, StageOutcome::Completed, "completed"))
            .await
            .unwrap();
        fix.spawner.drain().await;

        let ein = fix
            .stages
            .find_latest(&company.id, StageType::Ein)
            .await
            .unwrap()
            .unwrap();
        fix.orchestrator
            .apply_completion(completion_for(&ein, StageOutcome::Completed, "issued"))
            .await
            .unwrap();
        fix.spawner.drain().await;

        let bank = fix
            .stages
            .find_latest(&company.id, StageType::Bank)
            .await
            .unwrap()
            .unwrap();
        fix.orchestrator
            .apply_completion(completion_for(&bank, StageOutcome::Completed, "approved"))
            .await
            .unwrap();
        fix.spawner.drain().await;

        let loaded = fix.companies.find_by_id(&company.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, CompanyStatus::BankReady);
        assert!(fix.notifier.notified.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_acknowledge_progress_moves_under_review() {
        let fix = fixture();
        let company = seeded_company(&fix).await;

        let record = fix
            .orchestrator
            .initiate_stage(&company.id, StageType::Incorporation, None)
            .await
            .unwrap();
        let external_id = record.external_request_id.clone().unwrap();

        fix.orchestrator
            .acknowledge_progress(&record.provider_id, &external_id)
            .await
            .unwrap();

        let loaded = fix.stages.find_by_id(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, StageStatus::InReview);

        // Second ack is a no-op
        fix.orchestrator
            .acknowledge_progress(&record.provider_id, &external_id)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_reconcile_rechains_completed_without_successor() {
        let fix = fixture();
        let company = seeded_company(&fix).await;

        // Simulate a crash after completion but before chaining: completed
        // incorporation record, no EIN record
        let mut record = StageRecord::new(
            company.id.clone(),
            StageType::Incorporation,
            ProviderId::new("firstbase"),
            json!({}),
        );
        record.mark_submitted("FB-CRASH", json!({})).unwrap();
        record.complete(json!({"status": "completed"})).unwrap();
        fix.stages.save(&record).await.unwrap();

        let mut stored = fix.companies.find_by_id(&company.id).await.unwrap().unwrap();
        stored.set_status(CompanyStatus::Incorporated);
        fix.companies.save(&stored).await.unwrap();

        let summary = fix.orchestrator.reconcile().await.unwrap();
        assert_eq!(summary.rechained, 1);

        fix.spawner.drain().await;

        let ein = fix
            .stages
            .find_latest(&company.id, StageType::Ein)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ein.status, StageStatus::Submitted);
    }

    #[tokio::test]
    async fn test_reconcile_resubmits_pending_records() {
        let fix = fixture();
        let company = seeded_company(&fix).await;

        // A record stranded at Pending by an earlier transport failure
        let record = StageRecord::new(
            company.id.clone(),
            StageType::Incorporation,
            ProviderId::new("firstbase"),
            json!({"company_name": "Acme LLC"}),
        );
        fix.stages.save(&record).await.unwrap();

        let summary = fix.orchestrator.reconcile().await.unwrap();
        assert_eq!(summary.resubmitted, 1);

        let loaded = fix.stages.find_by_id(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, StageStatus::Submitted);

        let loaded_company = fix.companies.find_by_id(&company.id).await.unwrap().unwrap();
        assert_eq!(loaded_company.status, CompanyStatus::IncorporationInProgress);
    }
}
