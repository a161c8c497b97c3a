//! micacheck - MiCA compliance checks for token documents
//!
//! This library acquires text from PDFs and websites, chunks it, asks an
//! LLM to assess each requirement of a compliance template, aggregates the
//! answers into a score and stores every run as a versioned check.

pub mod acquire;
pub mod analysis;
pub mod catalog;
pub mod chunk;
pub mod cli;
pub mod config;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod scoring;
pub mod storage;
pub mod versions;

/// Re-export commonly used types
pub use analysis::{AnalysisMode, AnalysisOutcome, AnalysisResult, Analyzer, ComplianceStatus};
pub use catalog::{RequirementTemplate, ScoringRegime};
pub use error::ComplianceError;
pub use ingest::Ingestor;
pub use storage::{ComplianceStore, Database};

/// Application-wide error type
pub use anyhow::Result;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const APP_NAME: &str = "micacheck";
