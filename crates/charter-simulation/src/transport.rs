//! Local transport standing in for partner APIs
//!
//! Acknowledges every outbound request immediately with a deterministic
//! external request id, so a seeded simulation run assigns the same ids
//! every time.

use async_trait::async_trait;
use charter_core::{CoreError, OutboundRequest, ProviderAck, ProviderTransport};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Transport that accepts everything locally
pub struct SimulatedTransport {
    counter: AtomicU64,
    submissions: Mutex<Vec<OutboundRequest>>,
}

impl SimulatedTransport {
    /// Create an empty transport
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
            submissions: Mutex::new(Vec::new()),
        }
    }

    /// Requests accepted so far, in acceptance order
    pub fn submissions(&self) -> Vec<OutboundRequest> {
        self.submissions
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderTransport for SimulatedTransport {
    async fn submit(&self, request: &OutboundRequest) -> Result<ProviderAck, CoreError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let external_request_id = format!("SIM-{}-{:04}", request.stage_type, n);

        self.submissions
            .lock()
            .map_err(|_| CoreError::StateStore("submission log poisoned".to_string()))?
            .push(request.clone());

        Ok(ProviderAck {
            external_request_id,
            raw_response: json!({"status": "submitted"}),
        })
    }
}
