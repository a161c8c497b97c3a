//! Compliance analysis
//!
//! This module handles:
//! - Driving LLM assessments of a template against a document's chunks
//! - Parsing and reconciling the model's JSON answers
//! - Client-side request throttling
//! - Manual overrides of individual results

mod orchestrator;
mod response;
mod throttle;

pub use orchestrator::{build_context, AnalysisSettings, Analyzer, Reingest, TIMEOUT_REASONING};
pub use response::{extract_json_array, parse_assessments, Assessment};
pub use throttle::Throttle;

use crate::catalog::{RequirementItem, ScoringRegime};
use crate::error::ComplianceError;
use crate::scoring::{self, Summary};
use crate::storage::ComplianceStore;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Prefix marking results that have not been saved yet
pub const TEMP_ID_PREFIX: &str = "temp-";

/// Classification of a single requirement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplianceStatus {
    Found,
    NeedsClarification,
    Missing,
    NotApplicable,
}

impl ComplianceStatus {
    pub const ALL: [ComplianceStatus; 4] = [
        ComplianceStatus::Found,
        ComplianceStatus::NeedsClarification,
        ComplianceStatus::Missing,
        ComplianceStatus::NotApplicable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ComplianceStatus::Found => "FOUND",
            ComplianceStatus::NeedsClarification => "NEEDS_CLARIFICATION",
            ComplianceStatus::Missing => "MISSING",
            ComplianceStatus::NotApplicable => "NOT_APPLICABLE",
        }
    }

    /// Parse loosely: case, spaces and hyphens are ignored
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_uppercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "FOUND" => Some(ComplianceStatus::Found),
            "NEEDS_CLARIFICATION" | "CLARIFICATION" => Some(ComplianceStatus::NeedsClarification),
            "MISSING" | "NOT_FOUND" => Some(ComplianceStatus::Missing),
            "NOT_APPLICABLE" | "N/A" | "NA" => Some(ComplianceStatus::NotApplicable),
            _ => None,
        }
    }

    /// Coverage written alongside the status when no explicit score is given
    pub fn default_coverage(&self) -> f64 {
        match self {
            ComplianceStatus::Found => 100.0,
            ComplianceStatus::NeedsClarification => 50.0,
            ComplianceStatus::Missing => 0.0,
            ComplianceStatus::NotApplicable => 0.0,
        }
    }
}

impl std::fmt::Display for ComplianceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ComplianceStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s).ok_or_else(|| anyhow::anyhow!("Unknown compliance status: {}", s))
    }
}

/// How requirements are batched into LLM calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    /// One call covering every requirement
    Fast,
    /// One call per category
    #[default]
    Normal,
}

impl std::fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisMode::Fast => write!(f, "fast"),
            AnalysisMode::Normal => write!(f, "normal"),
        }
    }
}

/// Whether a run assessed every requirement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Completed,
    /// Stopped at the time ceiling; some items were not assessed
    Partial,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Completed => "completed",
            CheckStatus::Partial => "partial",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "completed" => Some(CheckStatus::Completed),
            "partial" => Some(CheckStatus::Partial),
            _ => None,
        }
    }
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of assessing one requirement in one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Result id; starts with [`TEMP_ID_PREFIX`] until saved
    pub id: String,
    /// Owning check, once saved
    pub check_id: Option<String>,
    pub requirement_id: String,
    pub item_name: String,
    pub category: String,
    pub status: ComplianceStatus,
    /// Coverage percentage, or risk points for point-scored items
    pub coverage_score: f64,
    pub reasoning: String,
    pub evidence_snippets: Vec<String>,
    pub selected_answer: Option<String>,
    /// Set when a person edited the automated classification
    pub manual_override: bool,
}

impl AnalysisResult {
    /// Unsaved result for a requirement
    pub fn draft(item: &RequirementItem, status: ComplianceStatus, coverage_score: f64, reasoning: impl Into<String>) -> Self {
        Self {
            id: format!("{}{}", TEMP_ID_PREFIX, uuid::Uuid::new_v4()),
            check_id: None,
            requirement_id: item.id.clone(),
            item_name: item.item_name.clone(),
            category: item.category.clone(),
            status,
            coverage_score,
            reasoning: reasoning.into(),
            evidence_snippets: Vec::new(),
            selected_answer: None,
            manual_override: false,
        }
    }

    /// Placeholder used when the model's answer could not be used.
    ///
    /// It carries no score and no selected answer, so it never adds risk
    /// points.
    pub fn needs_clarification(item: &RequirementItem, reasoning: impl Into<String>) -> Self {
        Self::draft(item, ComplianceStatus::NeedsClarification, 0.0, reasoning)
    }

    pub fn is_temporary(&self) -> bool {
        is_temporary_id(&self.id)
    }
}

pub fn is_temporary_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

/// Everything produced by one analysis run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    pub document_id: String,
    pub template_id: String,
    pub template_name: String,
    pub mode: AnalysisMode,
    pub results: Vec<AnalysisResult>,
    pub summary: Summary,
    pub status: CheckStatus,
    /// Content hash of the document the run was based on
    pub document_hash: Option<String>,
    pub model: String,
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Result of a manual status change
#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    /// Unsaved result; the caller keeps the edit in its draft state
    Draft {
        id: String,
        status: ComplianceStatus,
        coverage_score: f64,
        selected_answer: Option<String>,
    },
    /// Stored result after the edit
    Persisted(AnalysisResult),
}

/// Manually override a result's status.
///
/// Temporary ids are answered without touching the store. Stored results
/// get the override flag, and their check's summary is recomputed.
///
/// On point-scored items of a risk-point template the score must come from
/// one of the item's answer options, given as `answer` (a label or a points
/// value) or as `score`. `NEEDS_CLARIFICATION` without either leaves the
/// item unscored.
pub fn update_result_status(
    store: &dyn ComplianceStore,
    result_id: &str,
    status: ComplianceStatus,
    score: Option<f64>,
    answer: Option<&str>,
) -> Result<StatusUpdate> {
    if is_temporary_id(result_id) {
        tracing::debug!(result_id, %status, "Draft status override");
        return Ok(StatusUpdate::Draft {
            id: result_id.to_string(),
            status,
            coverage_score: score.unwrap_or_else(|| status.default_coverage()),
            selected_answer: answer.map(str::to_string),
        });
    }

    let current = store
        .get_result(result_id)?
        .ok_or_else(|| ComplianceError::ResultNotFound(result_id.to_string()))?;

    let (coverage_score, selected_answer) = match risk_item(store, &current)? {
        Some(item) => answer_override(&item, status, score, answer)?,
        None => (
            score.unwrap_or_else(|| status.default_coverage()),
            answer.map(str::to_string).or(current.selected_answer),
        ),
    };

    if !store.update_result_status(result_id, status, coverage_score, selected_answer.as_deref())? {
        return Err(ComplianceError::ResultNotFound(result_id.to_string()).into());
    }

    let result = store
        .get_result(result_id)?
        .ok_or_else(|| ComplianceError::ResultNotFound(result_id.to_string()))?;

    if let Some(check_id) = result.check_id.as_deref() {
        refresh_check_summary(store, check_id)?;
    }

    tracing::info!(result_id, %status, coverage_score, "Result overridden");
    Ok(StatusUpdate::Persisted(result))
}

/// The requirement behind a stored result, when it is point-scored under a risk-point template
fn risk_item(store: &dyn ComplianceStore, result: &AnalysisResult) -> Result<Option<RequirementItem>> {
    let Some(check_id) = result.check_id.as_deref() else {
        return Ok(None);
    };
    let Some(check) = store.get_check(check_id)? else {
        return Ok(None);
    };
    let Some(template) = store.get_template(&check.template_id)? else {
        return Ok(None);
    };
    if template.regime != ScoringRegime::RiskPoints {
        return Ok(None);
    }

    Ok(template
        .item(&result.requirement_id)
        .filter(|item| item.scoring.is_scored())
        .cloned())
}

fn answer_override(
    item: &RequirementItem,
    status: ComplianceStatus,
    score: Option<f64>,
    answer: Option<&str>,
) -> Result<(f64, Option<String>)> {
    if status == ComplianceStatus::NotApplicable {
        return Ok((0.0, None));
    }

    let requested = answer
        .map(str::to_string)
        .or_else(|| score.map(|s| s.to_string()));

    match requested.as_deref().and_then(|a| item.scoring.match_answer(a)) {
        Some(outcome) => Ok((outcome.points, Some(outcome.label.clone()))),
        None if requested.is_none() && status == ComplianceStatus::NeedsClarification => Ok((0.0, None)),
        None => Err(ComplianceError::InvalidAnswer {
            requirement: item.item_name.clone(),
            answer: requested.unwrap_or_else(|| "nothing".to_string()),
            options: item.scoring.option_labels(),
        }
        .into()),
    }
}

fn refresh_check_summary(store: &dyn ComplianceStore, check_id: &str) -> Result<()> {
    let Some(mut check) = store.get_check(check_id)? else {
        return Ok(());
    };
    let Some(template) = store.get_template(&check.template_id)? else {
        tracing::warn!(check_id, template_id = %check.template_id, "Template gone; summary not refreshed");
        return Ok(());
    };

    let results = store.get_results(check_id)?;
    check.summary = scoring::aggregate(&template, &results);
    check.updated_at = chrono::Utc::now();
    store.update_check_summary(&check)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::builtin_templates;
    use crate::storage::{CheckRecord, Database};

    #[test]
    fn test_status_parsing() {
        assert_eq!(ComplianceStatus::parse("found"), Some(ComplianceStatus::Found));
        assert_eq!(
            ComplianceStatus::parse("Needs clarification"),
            Some(ComplianceStatus::NeedsClarification)
        );
        assert_eq!(
            ComplianceStatus::parse("not-applicable"),
            Some(ComplianceStatus::NotApplicable)
        );
        assert_eq!(ComplianceStatus::parse("maybe"), None);
        assert!("bogus".parse::<ComplianceStatus>().is_err());
    }

    #[test]
    fn test_status_serde_uses_wire_names() {
        let json = serde_json::to_string(&ComplianceStatus::NeedsClarification).unwrap();
        assert_eq!(json, "\"NEEDS_CLARIFICATION\"");
    }

    #[test]
    fn test_temporary_override_never_touches_store() {
        // An empty in-memory database without the id would reject a real write.
        let db = Database::open_in_memory().unwrap();

        let update = update_result_status(&db, "temp-123", ComplianceStatus::Found, None, None).unwrap();
        assert_eq!(
            update,
            StatusUpdate::Draft {
                id: "temp-123".to_string(),
                status: ComplianceStatus::Found,
                coverage_score: 100.0,
                selected_answer: None,
            }
        );
    }

    #[test]
    fn test_override_unknown_result_fails() {
        let db = Database::open_in_memory().unwrap();
        let err = update_result_status(&db, "missing", ComplianceStatus::Missing, None, None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ComplianceError>(),
            Some(ComplianceError::ResultNotFound(_))
        ));
    }

    #[test]
    fn test_persisted_override_sets_flag_and_refreshes_summary() {
        let db = Database::open_in_memory().unwrap();
        let template = builtin_templates()
            .unwrap()
            .into_iter()
            .find(|t| t.id == "mica-whitepaper")
            .unwrap();
        db.upsert_template(&template).unwrap();

        let doc = crate::storage::DocumentRecord::new("doc.pdf", "/tmp/doc.pdf", crate::acquire::SourceKind::Pdf);
        db.insert_document(&doc).unwrap();

        let mut results: Vec<AnalysisResult> = template
            .items
            .iter()
            .map(|item| AnalysisResult::draft(item, ComplianceStatus::Missing, 0.0, "absent"))
            .collect();
        let check = CheckRecord::new(&doc.id, &template.id, 1, scoring::aggregate(&template, &results));
        db.insert_check(&check).unwrap();
        for result in &mut results {
            result.id = uuid::Uuid::new_v4().to_string();
            result.check_id = Some(check.id.clone());
        }
        db.replace_results(&check.id, &results).unwrap();

        let target = results[0].id.clone();
        let update = update_result_status(&db, &target, ComplianceStatus::Found, None, None).unwrap();

        let StatusUpdate::Persisted(result) = update else {
            panic!("expected a persisted update");
        };
        assert!(result.manual_override);
        assert_eq!(result.status, ComplianceStatus::Found);
        assert_eq!(result.coverage_score, 100.0);

        let refreshed = db.get_check(&check.id).unwrap().unwrap();
        assert_eq!(refreshed.summary.found, 1);
        assert_eq!(refreshed.version, 1);
    }

    #[test]
    fn test_placeholder_carries_no_score() {
        let template = builtin_templates().unwrap().remove(0);
        let result = AnalysisResult::needs_clarification(&template.items[0], "LLM request failed");
        assert_eq!(result.status, ComplianceStatus::NeedsClarification);
        assert_eq!(result.coverage_score, 0.0);
        assert!(result.selected_answer.is_none());
    }

    fn saved_legal_check(db: &Database) -> (crate::catalog::RequirementTemplate, Vec<AnalysisResult>, String) {
        let legal = builtin_templates()
            .unwrap()
            .into_iter()
            .find(|t| t.id == "mica-legal")
            .unwrap();
        db.upsert_template(&legal).unwrap();

        let doc = crate::storage::DocumentRecord::new("token", "https://token.example/", crate::acquire::SourceKind::Url);
        db.insert_document(&doc).unwrap();

        let mut results: Vec<AnalysisResult> = legal
            .items
            .iter()
            .map(|item| AnalysisResult::needs_clarification(item, "LLM request failed"))
            .collect();
        let check = CheckRecord::new(&doc.id, &legal.id, 1, scoring::aggregate(&legal, &results));
        db.insert_check(&check).unwrap();
        for result in &mut results {
            result.id = uuid::Uuid::new_v4().to_string();
            result.check_id = Some(check.id.clone());
        }
        db.replace_results(&check.id, &results).unwrap();

        (legal, results, check.id)
    }

    #[test]
    fn test_risk_override_requires_answer_option() {
        let db = Database::open_in_memory().unwrap();
        let (legal, results, check_id) = saved_legal_check(&db);
        assert_eq!(legal.items[0].scoring_logic, "Yes = 1000, No = 0");
        let target = results[0].id.clone();

        // A bare status, or a score that is not one of the outcomes, is refused.
        for (status, score, answer) in [
            (ComplianceStatus::Found, None, None),
            (ComplianceStatus::Missing, Some(50.0), None),
            (ComplianceStatus::Found, None, Some("Maybe")),
        ] {
            let err = update_result_status(&db, &target, status, score, answer).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<ComplianceError>(),
                Some(ComplianceError::InvalidAnswer { .. })
            ));
        }
        assert!(!db.get_result(&target).unwrap().unwrap().manual_override);

        let StatusUpdate::Persisted(result) =
            update_result_status(&db, &target, ComplianceStatus::Found, None, Some("yes")).unwrap()
        else {
            panic!("expected a persisted update");
        };
        assert_eq!(result.coverage_score, 1000.0);
        assert_eq!(result.selected_answer.as_deref(), Some("Yes"));

        let risk = db.get_check(&check_id).unwrap().unwrap().summary.risk.unwrap();
        assert_eq!(risk.aggregate, 1000.0);
        assert_eq!(risk.maximum, 1000.0);

        // A points value picks the matching option.
        let StatusUpdate::Persisted(result) =
            update_result_status(&db, &target, ComplianceStatus::Missing, Some(0.0), None).unwrap()
        else {
            panic!("expected a persisted update");
        };
        assert_eq!(result.selected_answer.as_deref(), Some("No"));

        // Clarification without an answer takes the item out of the totals.
        update_result_status(&db, &target, ComplianceStatus::NeedsClarification, None, None).unwrap();
        let risk = db.get_check(&check_id).unwrap().unwrap().summary.risk.unwrap();
        assert_eq!(risk.aggregate, 0.0);
        assert_eq!(risk.maximum, 0.0);
    }
}
