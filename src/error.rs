//! Typed errors for conditions callers need to tell apart
//!
//! Everything else travels as a plain `anyhow::Error`; these variants are
//! wrapped in `anyhow` too and recovered with `downcast_ref`.

use thiserror::Error;

/// Domain errors surfaced to callers
#[derive(Debug, Error)]
pub enum ComplianceError {
    /// No usable text could be acquired for a source
    #[error("content unavailable for {origin}: {reason}")]
    ContentUnavailable { origin: String, reason: String },

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("compliance check not found: {0}")]
    CheckNotFound(String),

    #[error("analysis result not found: {0}")]
    ResultNotFound(String),

    #[error("version {version} does not exist for this document and template")]
    VersionNotFound { version: u32 },

    /// A risk-scored requirement was given something other than one of its options
    #[error("'{answer}' is not an answer option for '{requirement}' (options: {options})")]
    InvalidAnswer {
        requirement: String,
        answer: String,
        options: String,
    },

    /// A document cannot be removed while checks reference it
    #[error("document {0} is referenced by compliance checks")]
    DocumentInUse(String),
}

impl ComplianceError {
    /// Build a content-unavailable error
    pub fn unavailable(origin: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ContentUnavailable {
            origin: origin.into(),
            reason: reason.into(),
        }
    }
}

/// Check whether an `anyhow` error carries a content-unavailable condition
pub fn is_content_unavailable(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<ComplianceError>(),
        Some(ComplianceError::ContentUnavailable { .. })
    )
}
