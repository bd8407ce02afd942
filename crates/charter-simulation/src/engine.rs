//! Seed-controlled simulation of partner behavior
//!
//! Each tick takes a snapshot of the in-flight stage records, sorted by
//! creation time, and advances each record at most one step: Submitted moves
//! under review, InReview reaches a terminal outcome. Probabilities come
//! from the transition table; with both pinned to 1.0 and no failure
//! injection, a fresh company reaches `bank_ready` in exactly six ticks
//! (two per stage). All randomness flows through one seeded generator, so a
//! given seed replays the identical run.

use charter_core::{
    CompletionEvent, CoreError, CompanyRepository, QueueSpawner, StageOutcome, StageRecord,
    StageRecordRepository, StageStatus, StageType, WorkflowOrchestrator,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Per-tick transition probabilities
#[derive(Debug, Clone, Copy)]
pub struct TransitionTable {
    /// Probability a Submitted record moves under review
    pub submitted_to_review: f64,
    /// Probability an InReview record reaches a terminal outcome
    pub review_to_terminal: f64,
    /// Probability a terminal outcome is a failure
    pub failure: f64,
}

impl Default for TransitionTable {
    fn default() -> Self {
        Self {
            submitted_to_review: 0.3,
            review_to_terminal: 0.45,
            failure: 0.0,
        }
    }
}

impl TransitionTable {
    /// Pin both advance probabilities to `p`, with no failure injection
    pub fn pinned(p: f64) -> Self {
        Self {
            submitted_to_review: p,
            review_to_terminal: p,
            failure: 0.0,
        }
    }

    /// Set the failure probability
    pub fn with_failure(mut self, failure: f64) -> Self {
        self.failure = failure;
        self
    }
}

/// What one tick did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// Records moved under review
    pub reviewed: usize,
    /// Records completed successfully
    pub completed: usize,
    /// Records failed
    pub failed: usize,
}

/// Drives in-flight stage records through simulated partner behavior
pub struct SimulationEngine {
    orchestrator: WorkflowOrchestrator,
    stages: Arc<dyn StageRecordRepository>,
    companies: Arc<dyn CompanyRepository>,
    spawner: Arc<QueueSpawner>,
    table: TransitionTable,
    rng: StdRng,
}

impl SimulationEngine {
    /// Create an engine with an explicit seed
    pub fn with_seed(
        orchestrator: WorkflowOrchestrator,
        stages: Arc<dyn StageRecordRepository>,
        companies: Arc<dyn CompanyRepository>,
        spawner: Arc<QueueSpawner>,
        table: TransitionTable,
        seed: u64,
    ) -> Self {
        Self {
            orchestrator,
            stages,
            companies,
            spawner,
            table,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Advance every in-flight record at most one step
    pub async fn tick(&mut self) -> Result<TickReport, CoreError> {
        let mut in_flight = self.stages.list_in_flight().await?;
        // Stable processing order regardless of store iteration order
        in_flight.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.0.cmp(&b.id.0))
        });

        let mut report = TickReport::default();

        for record in in_flight {
            let Some(external_request_id) = record.external_request_id.clone() else {
                continue; // still pending submission; the reconcile sweep owns it
            };

            match record.status {
                StageStatus::Submitted => {
                    if self.roll(self.table.submitted_to_review) {
                        self.orchestrator
                            .acknowledge_progress(&record.provider_id, &external_request_id)
                            .await?;
                        report.reviewed += 1;
                    }
                }
                StageStatus::InReview => {
                    if self.roll(self.table.review_to_terminal) {
                        let failed = self.roll(self.table.failure);
                        let event = self.synthesize_completion(&record, &external_request_id, failed);
                        debug!(
                            external_request_id = %external_request_id,
                            stage = %record.stage_type,
                            raw_status = %event.raw_status,
                            "Simulated terminal webhook"
                        );
                        self.orchestrator.apply_completion(event).await?;
                        if failed {
                            report.failed += 1;
                        } else {
                            report.completed += 1;
                        }
                    }
                }
                _ => {}
            }
        }

        // Chained initiations land inside the same tick
        self.spawner.drain().await;

        Ok(report)
    }

    /// Tick until nothing is in flight and no chain work is queued
    ///
    /// Errors if the pipeline has not settled within `max_ticks`.
    pub async fn run_until_settled(&mut self, max_ticks: usize) -> Result<usize, CoreError> {
        for ticks in 1..=max_ticks {
            self.tick().await?;
            if self.settled().await? {
                info!(ticks, "Simulation settled");
                return Ok(ticks);
            }
        }
        let still_in_flight = self.stages.list_in_flight().await?.len();
        Err(CoreError::InvalidState {
            subject: "simulation run".to_string(),
            required: "settled pipeline".to_string(),
            actual: format!(
                "{} records still in flight after {} ticks",
                still_in_flight, max_ticks
            ),
        })
    }

    /// Tick on an interval until shutdown is signalled
    pub async fn run(
        &mut self,
        tick_interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), CoreError> {
        let mut interval = tokio::time::interval(tick_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await?;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Simulation shutting down");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// True when no record is in flight and no chain work is queued
    pub async fn settled(&self) -> Result<bool, CoreError> {
        Ok(self.stages.list_in_flight().await?.is_empty() && self.spawner.pending() == 0)
    }

    /// Companies whose pipeline finished, either way
    pub async fn terminal_companies(&self) -> Result<usize, CoreError> {
        let companies = self.companies.list_all().await?;
        Ok(companies.iter().filter(|c| c.status.is_terminal()).count())
    }

    fn roll(&mut self, probability: f64) -> bool {
        self.rng.gen::<f64>() < probability
    }

    fn synthesize_completion(
        &mut self,
        record: &StageRecord,
        external_request_id: &str,
        failed: bool,
    ) -> CompletionEvent {
        let docs_base = format!(
            "https://documents.simulation.charter/{}",
            external_request_id
        );

        let (raw_status, documents, extra): (&str, Value, Value) = if failed {
            let status = match record.stage_type {
                StageType::Incorporation => "failed",
                StageType::Ein | StageType::Bank => "rejected",
            };
            (status, json!({}), json!({}))
        } else {
            match record.stage_type {
                StageType::Incorporation => (
                    "incorporated",
                    json!({
                        "articles_of_incorporation": format!("{}/articles_of_incorporation.pdf", docs_base),
                        "formation_certificate": format!("{}/formation_certificate.pdf", docs_base),
                    }),
                    json!({}),
                ),
                StageType::Ein => {
                    let ein_number = format!(
                        "{:02}-{:07}",
                        self.rng.gen_range(10..100),
                        self.rng.gen_range(0..10_000_000)
                    );
                    (
                        "issued",
                        json!({"ein_letter": format!("{}/ein_letter.pdf", docs_base)}),
                        json!({"ein_number": ein_number}),
                    )
                }
                StageType::Bank => (
                    "approved",
                    json!({}),
                    json!({
                        "account_number": format!("{:010}", self.rng.gen_range(0u64..10_000_000_000)),
                        "routing_number": "026013356",
                    }),
                ),
            }
        };

        let mut raw_payload = json!({
            "request_id": external_request_id,
            "status": raw_status,
            "documents": documents,
        });
        if let (Some(payload), Some(extra)) = (raw_payload.as_object_mut(), extra.as_object()) {
            for (key, value) in extra {
                payload.insert(key.clone(), value.clone());
            }
        }

        CompletionEvent {
            external_request_id: external_request_id.to_string(),
            provider_id: record.provider_id.clone(),
            stage_type: record.stage_type,
            outcome: if failed {
                StageOutcome::Failed
            } else {
                StageOutcome::Completed
            },
            raw_status: raw_status.to_string(),
            documents,
            raw_payload,
        }
    }
}
