//! Domain model: companies, stage records, and their repositories

/// Companies, founders, and the derived lifecycle status
pub mod company;

/// Repository traits and in-memory implementations
pub mod repository;

/// Stage types, statuses, and stage records
pub mod stage;
