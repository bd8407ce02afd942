//! Repository traits for the orchestration engine
//!
//! External crates implement these traits to provide persistent storage; the
//! in-memory implementations below back tests and the simulation engine.

use async_trait::async_trait;

use super::company::{Company, CompanyId, CompanyStatus};
use super::stage::{ProviderId, StageRecord, StageRecordId, StageType};
use crate::CoreError;

/// Repository for companies
#[async_trait]
pub trait CompanyRepository: Send + Sync {
    /// Find a company by ID
    async fn find_by_id(&self, id: &CompanyId) -> Result<Option<Company>, CoreError>;

    /// Save a company
    async fn save(&self, company: &Company) -> Result<(), CoreError>;

    /// List companies currently in a given status
    async fn list_by_status(&self, status: CompanyStatus) -> Result<Vec<Company>, CoreError>;

    /// List all companies
    async fn list_all(&self) -> Result<Vec<Company>, CoreError>;
}

/// Repository for stage records
///
/// Implementations must enforce that an external request id is unique per
/// provider: saving a record whose (provider, external id) pair is already
/// held by a different record is a state-store error.
#[async_trait]
pub trait StageRecordRepository: Send + Sync {
    /// Find a stage record by ID
    async fn find_by_id(&self, id: &StageRecordId) -> Result<Option<StageRecord>, CoreError>;

    /// Resolve a record by the provider-assigned external request id
    async fn find_by_external_id(
        &self,
        provider_id: &ProviderId,
        external_request_id: &str,
    ) -> Result<Option<StageRecord>, CoreError>;

    /// The in-flight record for a (company, stage), if one exists
    async fn find_in_flight(
        &self,
        company_id: &CompanyId,
        stage_type: StageType,
    ) -> Result<Option<StageRecord>, CoreError>;

    /// Most recently created record for a (company, stage), terminal or not
    async fn find_latest(
        &self,
        company_id: &CompanyId,
        stage_type: StageType,
    ) -> Result<Option<StageRecord>, CoreError>;

    /// Full audit trail for a company, oldest first
    async fn list_for_company(&self, company_id: &CompanyId) -> Result<Vec<StageRecord>, CoreError>;

    /// All in-flight records across companies (simulation and reconciliation)
    async fn list_in_flight(&self) -> Result<Vec<StageRecord>, CoreError>;

    /// Save a stage record
    async fn save(&self, record: &StageRecord) -> Result<(), CoreError>;
}

/// Tracks which completion events have already been applied
#[async_trait]
pub trait ProcessedEventRepository: Send + Sync {
    /// Whether an event with this hash has already been applied
    async fn is_processed(&self, event_hash: &str) -> Result<bool, CoreError>;

    /// Record an event hash; returns false if the hash was already present
    async fn mark_processed(&self, event_hash: &str) -> Result<bool, CoreError>;
}

/// Memory implementations backing tests and the simulation engine
#[cfg(feature = "memory")]
pub mod memory {
    use super::*;
    use chrono::{DateTime, Utc};
    use dashmap::DashMap;

    /// In-memory company repository using a concurrent map
    pub struct MemoryCompanyRepository {
        companies: DashMap<String, Company>,
    }

    impl MemoryCompanyRepository {
        /// Create a new memory company repository
        pub fn new() -> Self {
            Self {
                companies: DashMap::with_capacity(16),
            }
        }
    }

    impl Default for MemoryCompanyRepository {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl CompanyRepository for MemoryCompanyRepository {
        async fn find_by_id(&self, id: &CompanyId) -> Result<Option<Company>, CoreError> {
            Ok(self.companies.get(&id.0).map(|c| c.clone()))
        }

        async fn save(&self, company: &Company) -> Result<(), CoreError> {
            self.companies.insert(company.id.0.clone(), company.clone());
            Ok(())
        }

        async fn list_by_status(&self, status: CompanyStatus) -> Result<Vec<Company>, CoreError> {
            Ok(self
                .companies
                .iter()
                .filter(|c| c.status == status)
                .map(|c| c.clone())
                .collect())
        }

        async fn list_all(&self) -> Result<Vec<Company>, CoreError> {
            let mut companies: Vec<Company> =
                self.companies.iter().map(|c| c.clone()).collect();
            companies.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            Ok(companies)
        }
    }

    /// In-memory stage record repository with an external-id index
    pub struct MemoryStageRecordRepository {
        records: DashMap<String, StageRecord>,
        // (provider, external_request_id) -> record id
        external_ids: DashMap<(String, String), String>,
    }

    impl MemoryStageRecordRepository {
        /// Create a new memory stage record repository
        pub fn new() -> Self {
            Self {
                records: DashMap::with_capacity(64),
                external_ids: DashMap::with_capacity(64),
            }
        }

        fn records_for(&self, company_id: &CompanyId, stage_type: StageType) -> Vec<StageRecord> {
            let mut records: Vec<StageRecord> = self
                .records
                .iter()
                .filter(|r| r.company_id == *company_id && r.stage_type == stage_type)
                .map(|r| r.clone())
                .collect();
            records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            records
        }
    }

    impl Default for MemoryStageRecordRepository {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl StageRecordRepository for MemoryStageRecordRepository {
        async fn find_by_id(&self, id: &StageRecordId) -> Result<Option<StageRecord>, CoreError> {
            Ok(self.records.get(&id.0).map(|r| r.clone()))
        }

        async fn find_by_external_id(
            &self,
            provider_id: &ProviderId,
            external_request_id: &str,
        ) -> Result<Option<StageRecord>, CoreError> {
            let key = (provider_id.0.clone(), external_request_id.to_string());
            let record_id = match self.external_ids.get(&key) {
                Some(id) => id.clone(),
                None => return Ok(None),
            };
            Ok(self.records.get(&record_id).map(|r| r.clone()))
        }

        async fn find_in_flight(
            &self,
            company_id: &CompanyId,
            stage_type: StageType,
        ) -> Result<Option<StageRecord>, CoreError> {
            Ok(self
                .records_for(company_id, stage_type)
                .into_iter()
                .find(|r| r.status.is_in_flight()))
        }

        async fn find_latest(
            &self,
            company_id: &CompanyId,
            stage_type: StageType,
        ) -> Result<Option<StageRecord>, CoreError> {
            Ok(self.records_for(company_id, stage_type).into_iter().last())
        }

        async fn list_for_company(
            &self,
            company_id: &CompanyId,
        ) -> Result<Vec<StageRecord>, CoreError> {
            let mut records: Vec<StageRecord> = self
                .records
                .iter()
                .filter(|r| r.company_id == *company_id)
                .map(|r| r.clone())
                .collect();
            records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            Ok(records)
        }

        async fn list_in_flight(&self) -> Result<Vec<StageRecord>, CoreError> {
            let mut records: Vec<StageRecord> = self
                .records
                .iter()
                .filter(|r| r.status.is_in_flight())
                .map(|r| r.clone())
                .collect();
            records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            Ok(records)
        }

        async fn save(&self, record: &StageRecord) -> Result<(), CoreError> {
            // Enforce per-provider uniqueness of external request ids
            if let Some(external_id) = &record.external_request_id {
                let key = (record.provider_id.0.clone(), external_id.clone());
                if let Some(existing) = self.external_ids.get(&key) {
                    if *existing != record.id.0 {
                        return Err(CoreError::StateStore(format!(
                            "External request id '{}' already assigned for provider '{}'",
                            external_id, record.provider_id
                        )));
                    }
                } else {
                    self.external_ids.insert(key, record.id.0.clone());
                }
            }

            self.records.insert(record.id.0.clone(), record.clone());
            Ok(())
        }
    }

    /// In-memory processed-event set
    pub struct MemoryProcessedEventRepository {
        processed: DashMap<String, DateTime<Utc>>,
    }

    impl MemoryProcessedEventRepository {
        /// Create a new memory processed-event repository
        pub fn new() -> Self {
            Self {
                processed: DashMap::with_capacity(64),
            }
        }
    }

    impl Default for MemoryProcessedEventRepository {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ProcessedEventRepository for MemoryProcessedEventRepository {
        async fn is_processed(&self, event_hash: &str) -> Result<bool, CoreError> {
            Ok(self.processed.contains_key(event_hash))
        }

        async fn mark_processed(&self, event_hash: &str) -> Result<bool, CoreError> {
            let mut newly_inserted = false;
            self.processed
                .entry(event_hash.to_string())
                .or_insert_with(|| {
                    newly_inserted = true;
                    Utc::now()
                });
            Ok(newly_inserted)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::domain::company::EntityKind;
        use serde_json::json;

        #[tokio::test]
        async fn test_company_round_trip() {
            let repo = MemoryCompanyRepository::new();
            let company = Company::new("Acme LLC", EntityKind::Llc, "CA");

            repo.save(&company).await.unwrap();
            let loaded = repo.find_by_id(&company.id).await.unwrap().unwrap();
            assert_eq!(loaded, company);

            let missing = repo.find_by_id(&CompanyId::new()).await.unwrap();
            assert!(missing.is_none());
        }

        #[tokio::test]
        async fn test_list_by_status() {
            let repo = MemoryCompanyRepository::new();
            let mut a = Company::new("A", EntityKind::Llc, "CA");
            let b = Company::new("B", EntityKind::Corporation, "DE");
            a.set_status(CompanyStatus::Incorporated);

            repo.save(&a).await.unwrap();
            repo.save(&b).await.unwrap();

            let incorporated = repo
                .list_by_status(CompanyStatus::Incorporated)
                .await
                .unwrap();
            assert_eq!(incorporated.len(), 1);
            assert_eq!(incorporated[0].name, "A");
        }

        #[tokio::test]
        async fn test_external_id_lookup() {
            let repo = MemoryStageRecordRepository::new();
            let company_id = CompanyId::new();
            let mut record = StageRecord::new(
                company_id.clone(),
                StageType::Incorporation,
                ProviderId::new("firstbase"),
                json!({}),
            );
            record.mark_submitted("FB123", json!({})).unwrap();
            repo.save(&record).await.unwrap();

            let found = repo
                .find_by_external_id(&ProviderId::new("firstbase"), "FB123")
                .await
                .unwrap()
                .unwrap();
            assert_eq!(found.id, record.id);

            // Same external id under a different provider is a different namespace
            let other = repo
                .find_by_external_id(&ProviderId::new("clerky"), "FB123")
                .await
                .unwrap();
            assert!(other.is_none());
        }

        #[tokio::test]
        async fn test_external_id_uniqueness_per_provider() {
            let repo = MemoryStageRecordRepository::new();
            let mut first = StageRecord::new(
                CompanyId::new(),
                StageType::Incorporation,
                ProviderId::new("firstbase"),
                json!({}),
            );
            first.mark_submitted("FB123", json!({})).unwrap();
            repo.save(&first).await.unwrap();

            let mut second = StageRecord::new(
                CompanyId::new(),
                StageType::Incorporation,
                ProviderId::new("firstbase"),
                json!({}),
            );
            second.mark_submitted("FB123", json!({})).unwrap();

            let err = repo.save(&second).await.unwrap_err();
            assert!(matches!(err, CoreError::StateStore(_)));
        }

        #[tokio::test]
        async fn test_in_flight_filtering() {
            let repo = MemoryStageRecordRepository::new();
            let company_id = CompanyId::new();

            let mut done = StageRecord::new(
                company_id.clone(),
                StageType::Incorporation,
                ProviderId::new("firstbase"),
                json!({}),
            );
            done.mark_submitted("FB1", json!({})).unwrap();
            done.complete(json!({})).unwrap();
            repo.save(&done).await.unwrap();

            assert!(repo
                .find_in_flight(&company_id, StageType::Incorporation)
                .await
                .unwrap()
                .is_none());

            let open = StageRecord::new(
                company_id.clone(),
                StageType::Ein,
                ProviderId::new("firstbase"),
                json!({}),
            );
            repo.save(&open).await.unwrap();

            let in_flight = repo
                .find_in_flight(&company_id, StageType::Ein)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(in_flight.id, open.id);

            let all = repo.list_in_flight().await.unwrap();
            assert_eq!(all.len(), 1);
        }

        #[tokio::test]
        async fn test_audit_trail_is_ordered() {
            let repo = MemoryStageRecordRepository::new();
            let company_id = CompanyId::new();

            for stage in StageType::SEQUENCE {
                let record = StageRecord::new(
                    company_id.clone(),
                    stage,
                    ProviderId::new("p"),
                    json!({}),
                );
                repo.save(&record).await.unwrap();
            }

            let trail = repo.list_for_company(&company_id).await.unwrap();
            assert_eq!(trail.len(), 3);
            assert!(trail.windows(2).all(|w| w[0].created_at <= w[1].created_at));
        }

        #[tokio::test]
        async fn test_processed_event_dedup() {
            let repo = MemoryProcessedEventRepository::new();
            assert!(repo.mark_processed("abc").await.unwrap());
            assert!(!repo.mark_processed("abc").await.unwrap());
            assert!(repo.mark_processed("def").await.unwrap());
        }
    }
}
