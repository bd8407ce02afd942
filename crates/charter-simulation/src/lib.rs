//!
//! Charter Simulation - Deterministic partner simulation for the Charter
//! formation engine
//!
//! Replaces the real partners end to end: a local transport acknowledges
//! outbound requests, and a seeded engine advances in-flight stage records
//! through the same orchestrator entry points the production webhook path
//! uses. A given seed and transition table replay the identical run, which
//! makes full-pipeline behavior testable without network access.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// The tick-driven simulation engine
pub mod engine;

/// Local stand-in for the partner HTTP transport
pub mod transport;

pub use engine::{SimulationEngine, TickReport, TransitionTable};
pub use transport::SimulatedTransport;
