//! Application services driving the formation pipeline

pub mod ingestion;
pub mod orchestrator;
pub mod spawner;

pub use ingestion::WebhookIngestion;
pub use orchestrator::{ReconcileSummary, WorkflowOrchestrator};
pub use spawner::{QueueSpawner, TaskSpawner, TokioSpawner};
