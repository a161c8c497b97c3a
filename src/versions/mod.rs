//! Versioned persistence of analysis runs
//!
//! Every (document, template) pair has its own version sequence starting at
//! 1. A save either appends the next version or overwrites an existing one
//! in place. The check record is written first and is the only fatal step;
//! a failure writing its results is reported back as a partial save.

use crate::analysis::{AnalysisOutcome, AnalysisResult, CheckStatus};
use crate::error::ComplianceError;
use crate::scoring::Summary;
use crate::storage::{CheckRecord, ComplianceStore};
use anyhow::Result;
use chrono::Utc;
use serde::Serialize;

/// What to save and how
#[derive(Debug, Clone)]
pub struct SaveRequest {
    pub document_id: String,
    pub template_id: String,
    pub results: Vec<AnalysisResult>,
    pub summary: Summary,
    pub status: CheckStatus,
    /// Content hash the results were produced from; the document's current
    /// hash is used when unset
    pub document_hash: Option<String>,
    pub model: Option<String>,
    /// Replace an existing version instead of appending a new one
    pub overwrite: bool,
    /// Version to overwrite; the latest when unset
    pub target_version: Option<u32>,
}

impl SaveRequest {
    /// Request that appends the outcome as a new version
    pub fn from_outcome(outcome: &AnalysisOutcome) -> Self {
        Self {
            document_id: outcome.document_id.clone(),
            template_id: outcome.template_id.clone(),
            results: outcome.results.clone(),
            summary: outcome.summary.clone(),
            status: outcome.status,
            document_hash: outcome.document_hash.clone(),
            model: Some(outcome.model.clone()),
            overwrite: false,
            target_version: None,
        }
    }

    /// Overwrite `target_version`, or the latest version when `None`
    pub fn overwriting(mut self, target_version: Option<u32>) -> Self {
        self.overwrite = true;
        self.target_version = target_version;
        self
    }
}

/// Result of a save
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaveOutcome {
    pub check_id: String,
    pub version: u32,
    pub results_saved: usize,
    /// Set when the check was stored but its results were not
    pub results_error: Option<String>,
}

impl SaveOutcome {
    pub fn is_partial(&self) -> bool {
        self.results_error.is_some()
    }
}

/// A stored check with its results
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRecord {
    pub check: CheckRecord,
    pub template_name: String,
    pub results: Vec<AnalysisResult>,
}

/// Save an analysis run
pub fn save_analysis(store: &dyn ComplianceStore, request: SaveRequest) -> Result<SaveOutcome> {
    let document = store
        .get_document(&request.document_id)?
        .ok_or_else(|| ComplianceError::DocumentNotFound(request.document_id.clone()))?;
    let document_hash = request.document_hash.clone().or(document.content_hash);

    let existing = store.list_checks(&request.document_id, &request.template_id)?;

    if request.target_version.is_some() && !request.overwrite {
        tracing::warn!("Target version ignored for a new-version save");
    }

    let target = if request.overwrite {
        match request.target_version {
            Some(version) => Some(
                existing
                    .iter()
                    .find(|c| c.version == version)
                    .ok_or(ComplianceError::VersionNotFound { version })?,
            ),
            // Newest first
            None => existing.first(),
        }
    } else {
        None
    };

    let check = match target {
        Some(existing_check) => {
            let mut check = existing_check.clone();
            check.summary = request.summary.clone();
            check.status = request.status;
            check.document_hash = document_hash;
            check.model = request.model.clone();
            check.updated_at = Utc::now();
            store.update_check_summary(&check)?;
            tracing::info!(check_id = %check.id, version = check.version, "Overwrote compliance check");
            check
        }
        None => {
            let version = existing.iter().map(|c| c.version).max().unwrap_or(0) + 1;
            let mut check = CheckRecord::new(&request.document_id, &request.template_id, version, request.summary.clone());
            check.status = request.status;
            check.document_hash = document_hash;
            check.model = request.model.clone();
            store.insert_check(&check)?;
            tracing::info!(check_id = %check.id, version, "Created compliance check");
            check
        }
    };

    let results: Vec<AnalysisResult> = request
        .results
        .into_iter()
        .map(|mut result| {
            result.id = uuid::Uuid::new_v4().to_string();
            result.check_id = Some(check.id.clone());
            result
        })
        .collect();

    let (results_saved, results_error) = match store.replace_results(&check.id, &results) {
        Ok(()) => (results.len(), None),
        Err(e) => {
            tracing::warn!(check_id = %check.id, "Check saved but results were not: {:#}", e);
            (0, Some(format!("{:#}", e)))
        }
    };

    Ok(SaveOutcome {
        check_id: check.id,
        version: check.version,
        results_saved,
        results_error,
    })
}

/// Versions stored for a pair, newest first
pub fn list_versions(store: &dyn ComplianceStore, document_id: &str, template_id: &str) -> Result<Vec<CheckRecord>> {
    store.list_checks(document_id, template_id)
}

/// Load a stored check with its results
pub fn get_analysis(store: &dyn ComplianceStore, check_id: &str) -> Result<AnalysisRecord> {
    let check = store
        .get_check(check_id)?
        .ok_or_else(|| ComplianceError::CheckNotFound(check_id.to_string()))?;

    let template_name = store
        .get_template(&check.template_id)?
        .map(|t| t.name)
        .unwrap_or_else(|| check.template_id.clone());

    let results = store.get_results(check_id)?;

    Ok(AnalysisRecord {
        check,
        template_name,
        results,
    })
}

/// Delete a stored check and its results
pub fn delete_analysis(store: &dyn ComplianceStore, check_id: &str) -> Result<()> {
    if !store.delete_check(check_id)? {
        return Err(ComplianceError::CheckNotFound(check_id.to_string()).into());
    }
    tracing::info!(check_id, "Deleted compliance check");
    Ok(())
}

/// Whether the document changed since the check was saved.
///
/// `None` when either side has no recorded hash.
pub fn source_changed(store: &dyn ComplianceStore, check: &CheckRecord) -> Result<Option<bool>> {
    let document = store
        .get_document(&check.document_id)?
        .ok_or_else(|| ComplianceError::DocumentNotFound(check.document_id.clone()))?;

    Ok(match (&check.document_hash, &document.content_hash) {
        (Some(saved), Some(current)) => Some(saved != current),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquire::SourceKind;
    use crate::analysis::ComplianceStatus;
    use crate::catalog::{builtin_templates, RequirementTemplate};
    use crate::chunk::TextChunk;
    use crate::scoring;
    use crate::storage::{Database, DocumentRecord};

    /// Store that can fail check or result writes on demand
    struct FlakyStore {
        inner: Database,
        fail_checks: bool,
        fail_results: bool,
    }

    impl ComplianceStore for FlakyStore {
        fn insert_document(&self, document: &DocumentRecord) -> Result<()> {
            self.inner.insert_document(document)
        }
        fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>> {
            self.inner.get_document(id)
        }
        fn find_document_by_source(&self, source: &str) -> Result<Option<DocumentRecord>> {
            self.inner.find_document_by_source(source)
        }
        fn list_documents(&self) -> Result<Vec<DocumentRecord>> {
            self.inner.list_documents()
        }
        fn set_document_hash(&self, id: &str, content_hash: &str) -> Result<()> {
            self.inner.set_document_hash(id, content_hash)
        }
        fn delete_document(&self, id: &str) -> Result<bool> {
            self.inner.delete_document(id)
        }
        fn replace_chunks(&self, document_id: &str, chunks: &[TextChunk]) -> Result<()> {
            self.inner.replace_chunks(document_id, chunks)
        }
        fn get_chunks(&self, document_id: &str) -> Result<Vec<TextChunk>> {
            self.inner.get_chunks(document_id)
        }
        fn upsert_template(&self, template: &RequirementTemplate) -> Result<()> {
            self.inner.upsert_template(template)
        }
        fn get_template(&self, id: &str) -> Result<Option<RequirementTemplate>> {
            self.inner.get_template(id)
        }
        fn list_templates(&self) -> Result<Vec<RequirementTemplate>> {
            self.inner.list_templates()
        }
        fn list_checks(&self, document_id: &str, template_id: &str) -> Result<Vec<CheckRecord>> {
            self.inner.list_checks(document_id, template_id)
        }
        fn get_check(&self, id: &str) -> Result<Option<CheckRecord>> {
            self.inner.get_check(id)
        }
        fn insert_check(&self, check: &CheckRecord) -> Result<()> {
            if self.fail_checks {
                anyhow::bail!("disk full");
            }
            self.inner.insert_check(check)
        }
        fn update_check_summary(&self, check: &CheckRecord) -> Result<()> {
            if self.fail_checks {
                anyhow::bail!("disk full");
            }
            self.inner.update_check_summary(check)
        }
        fn delete_check(&self, id: &str) -> Result<bool> {
            self.inner.delete_check(id)
        }
        fn replace_results(&self, check_id: &str, results: &[AnalysisResult]) -> Result<()> {
            if self.fail_results {
                anyhow::bail!("connection reset while inserting results");
            }
            self.inner.replace_results(check_id, results)
        }
        fn get_results(&self, check_id: &str) -> Result<Vec<AnalysisResult>> {
            self.inner.get_results(check_id)
        }
        fn get_result(&self, id: &str) -> Result<Option<AnalysisResult>> {
            self.inner.get_result(id)
        }
        fn update_result_status(
            &self,
            id: &str,
            status: ComplianceStatus,
            coverage_score: f64,
            selected_answer: Option<&str>,
        ) -> Result<bool> {
            self.inner
                .update_result_status(id, status, coverage_score, selected_answer)
        }
    }

    struct Fixture {
        store: FlakyStore,
        document_id: String,
        template: RequirementTemplate,
    }

    fn fixture() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let template = builtin_templates().unwrap().remove(0);
        db.upsert_template(&template).unwrap();

        let mut doc = DocumentRecord::new("paper.pdf", "/tmp/paper.pdf", SourceKind::Pdf);
        doc.content_hash = Some("hash-1".to_string());
        db.insert_document(&doc).unwrap();

        Fixture {
            store: FlakyStore {
                inner: db,
                fail_checks: false,
                fail_results: false,
            },
            document_id: doc.id,
            template,
        }
    }

    fn request(f: &Fixture, status: ComplianceStatus) -> SaveRequest {
        let results: Vec<AnalysisResult> = f
            .template
            .items
            .iter()
            .map(|item| AnalysisResult::draft(item, status, status.default_coverage(), "r"))
            .collect();

        SaveRequest {
            document_id: f.document_id.clone(),
            template_id: f.template.id.clone(),
            summary: scoring::aggregate(&f.template, &results),
            results,
            status: CheckStatus::Completed,
            document_hash: None,
            model: Some("mock".to_string()),
            overwrite: false,
            target_version: None,
        }
    }

    #[test]
    fn test_new_versions_increment_by_one() {
        let f = fixture();

        let first = save_analysis(&f.store, request(&f, ComplianceStatus::Missing)).unwrap();
        assert_eq!(first.version, 1);
        assert!(!first.is_partial());
        assert_eq!(first.results_saved, f.template.items.len());

        let second = save_analysis(&f.store, request(&f, ComplianceStatus::Found)).unwrap();
        assert_eq!(second.version, 2);
        assert_ne!(second.check_id, first.check_id);

        let versions: Vec<u32> = list_versions(&f.store, &f.document_id, &f.template.id)
            .unwrap()
            .iter()
            .map(|c| c.version)
            .collect();
        assert_eq!(versions, vec![2, 1]);

        // History is untouched.
        let v1 = get_analysis(&f.store, &first.check_id).unwrap();
        assert!(v1.results.iter().all(|r| r.status == ComplianceStatus::Missing));
        assert!(v1.results.iter().all(|r| !r.is_temporary()));
        assert_eq!(v1.template_name, f.template.name);
        assert_eq!(v1.check.document_hash.as_deref(), Some("hash-1"));
    }

    #[test]
    fn test_overwrite_keeps_version_and_replaces_results() {
        let f = fixture();
        save_analysis(&f.store, request(&f, ComplianceStatus::Missing)).unwrap();
        let latest = save_analysis(&f.store, request(&f, ComplianceStatus::Missing)).unwrap();

        let overwritten = save_analysis(
            &f.store,
            request(&f, ComplianceStatus::Found).overwriting(None),
        )
        .unwrap();
        assert_eq!(overwritten.version, 2);
        assert_eq!(overwritten.check_id, latest.check_id);

        let record = get_analysis(&f.store, &latest.check_id).unwrap();
        assert_eq!(record.results.len(), f.template.items.len());
        assert!(record.results.iter().all(|r| r.status == ComplianceStatus::Found));
        assert_eq!(record.check.summary.overall_score, 100);

        let targeted = save_analysis(
            &f.store,
            request(&f, ComplianceStatus::NotApplicable).overwriting(Some(1)),
        )
        .unwrap();
        assert_eq!(targeted.version, 1);
        assert_eq!(list_versions(&f.store, &f.document_id, &f.template.id).unwrap().len(), 2);
    }

    #[test]
    fn test_overwrite_missing_version_fails() {
        let f = fixture();
        save_analysis(&f.store, request(&f, ComplianceStatus::Found)).unwrap();

        let err = save_analysis(&f.store, request(&f, ComplianceStatus::Found).overwriting(Some(7)))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ComplianceError>(),
            Some(ComplianceError::VersionNotFound { version: 7 })
        ));
    }

    #[test]
    fn test_overwrite_without_history_creates_first_version() {
        let f = fixture();
        let outcome = save_analysis(&f.store, request(&f, ComplianceStatus::Found).overwriting(None)).unwrap();
        assert_eq!(outcome.version, 1);
    }

    #[test]
    fn test_result_failure_is_partial_success() {
        let mut f = fixture();
        f.store.fail_results = true;

        let outcome = save_analysis(&f.store, request(&f, ComplianceStatus::Found)).unwrap();
        assert!(outcome.is_partial());
        assert_eq!(outcome.results_saved, 0);
        assert!(outcome.results_error.unwrap().contains("connection reset"));

        // The check itself was committed.
        let record = get_analysis(&f.store, &outcome.check_id).unwrap();
        assert_eq!(record.check.version, 1);
        assert!(record.results.is_empty());
    }

    #[test]
    fn test_check_failure_is_fatal() {
        let mut f = fixture();
        f.store.fail_checks = true;

        assert!(save_analysis(&f.store, request(&f, ComplianceStatus::Found)).is_err());
        assert!(list_versions(&f.store, &f.document_id, &f.template.id).unwrap().is_empty());
        assert_eq!(f.store.inner.get_stats().unwrap().results, 0);
    }

    #[test]
    fn test_source_changed() {
        let f = fixture();
        let outcome = save_analysis(&f.store, request(&f, ComplianceStatus::Found)).unwrap();
        let check = f.store.get_check(&outcome.check_id).unwrap().unwrap();

        assert_eq!(source_changed(&f.store, &check).unwrap(), Some(false));
        f.store.set_document_hash(&f.document_id, "hash-2").unwrap();
        assert_eq!(source_changed(&f.store, &check).unwrap(), Some(true));
    }

    #[test]
    fn test_delete_analysis() {
        let f = fixture();
        let outcome = save_analysis(&f.store, request(&f, ComplianceStatus::Found)).unwrap();

        delete_analysis(&f.store, &outcome.check_id).unwrap();
        assert!(get_analysis(&f.store, &outcome.check_id).is_err());
        assert!(delete_analysis(&f.store, &outcome.check_id).is_err());
        assert_eq!(f.store.inner.get_stats().unwrap().results, 0);
    }

    #[test]
    fn test_unknown_document() {
        let f = fixture();
        let mut req = request(&f, ComplianceStatus::Found);
        req.document_id = "missing".to_string();

        let err = save_analysis(&f.store, req).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ComplianceError>(),
            Some(ComplianceError::DocumentNotFound(_))
        ));
    }
}
