//! Analysis orchestration
//!
//! Drives one analysis run: load the document's chunks (re-ingesting once if
//! none are stored), build a bounded context shared by every requirement,
//! then ask the model either once for everything ("fast") or once per
//! category ("normal"). Failures never escape a unit of work; they become
//! `NEEDS_CLARIFICATION` results that say what went wrong.

use super::response::{parse_assessments, Assessment};
use super::throttle::Throttle;
use super::{AnalysisMode, AnalysisOutcome, AnalysisResult, CheckStatus, ComplianceStatus};
use crate::catalog::{RequirementItem, RequirementTemplate, ScoringRegime};
use crate::chunk::TextChunk;
use crate::error::{is_content_unavailable, ComplianceError};
use crate::llm::{LlmProvider, RequirementPrompt};
use crate::scoring;
use crate::storage::ComplianceStore;
use anyhow::Result;
use std::time::Duration;
use tokio::time::Instant;

/// Reasoning recorded for items skipped at the time ceiling
pub const TIMEOUT_REASONING: &str =
    "Analysis stopped due to timeout protection before this requirement was assessed";

/// Tunables for an analysis run
#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    /// Leading chunks included in the shared context
    pub max_context_chunks: usize,
    /// LLM call ceiling; zero disables throttling
    pub requests_per_minute: u32,
    /// Wall-clock budget, consulted between categories
    pub time_ceiling: Duration,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            max_context_chunks: 40,
            requests_per_minute: 15,
            time_ceiling: Duration::from_secs(280),
        }
    }
}

/// Rebuilds a document's chunks from its original source
#[async_trait::async_trait(?Send)]
pub trait Reingest {
    /// Re-acquire and store chunks, returning how many were stored
    async fn reingest(&self, document_id: &str) -> Result<usize>;
}

/// Runs templates against documents
pub struct Analyzer<'a> {
    store: &'a dyn ComplianceStore,
    llm: &'a dyn LlmProvider,
    reingest: Option<&'a dyn Reingest>,
    settings: AnalysisSettings,
}

impl<'a> Analyzer<'a> {
    pub fn new(store: &'a dyn ComplianceStore, llm: &'a dyn LlmProvider, settings: AnalysisSettings) -> Self {
        Self {
            store,
            llm,
            reingest: None,
            settings,
        }
    }

    /// Allow re-ingestion when a document has no stored chunks
    pub fn with_reingest(mut self, reingest: &'a dyn Reingest) -> Self {
        self.reingest = Some(reingest);
        self
    }

    /// Analyze a document against a template.
    ///
    /// `categories` restricts the run to those categories; empty means all.
    pub async fn analyze(
        &self,
        document_id: &str,
        template_id: &str,
        mode: AnalysisMode,
        categories: &[String],
    ) -> Result<AnalysisOutcome> {
        let started = Instant::now();

        let document = self
            .store
            .get_document(document_id)?
            .ok_or_else(|| ComplianceError::DocumentNotFound(document_id.to_string()))?;
        let template = self
            .store
            .get_template(template_id)?
            .ok_or_else(|| ComplianceError::TemplateNotFound(template_id.to_string()))?;

        let items = template.items_in(categories);
        if items.is_empty() {
            anyhow::bail!(
                "Template '{}' has no requirements in categories: {}",
                template.id,
                categories.join(", ")
            );
        }

        let chunks = self.load_chunks(document_id).await?;
        let context = build_context(&chunks, self.settings.max_context_chunks);

        tracing::info!(
            document = %document.name,
            template = %template.name,
            %mode,
            requirements = items.len(),
            chunks = chunks.len(),
            "Starting analysis"
        );

        let (results, timed_out) = match mode {
            AnalysisMode::Fast => (self.assess_batch(&template, &items, &context).await, false),
            AnalysisMode::Normal => self.run_by_category(&template, &items, &context, started).await,
        };

        let summary = scoring::aggregate(&template, &results);
        let status = if timed_out {
            CheckStatus::Partial
        } else {
            CheckStatus::Completed
        };

        tracing::info!(
            overall_score = summary.overall_score,
            found = summary.found,
            needs_clarification = summary.needs_clarification,
            missing = summary.missing,
            not_applicable = summary.not_applicable,
            %status,
            "Analysis finished"
        );

        Ok(AnalysisOutcome {
            document_id: document.id,
            template_id: template.id.clone(),
            template_name: template.name.clone(),
            mode,
            results,
            summary,
            status,
            document_hash: document.content_hash,
            model: self.llm.model_name().to_string(),
            elapsed: started.elapsed(),
        })
    }

    async fn load_chunks(&self, document_id: &str) -> Result<Vec<TextChunk>> {
        let chunks = self.store.get_chunks(document_id)?;
        if !chunks.is_empty() {
            return Ok(chunks);
        }

        let Some(reingest) = self.reingest else {
            return Err(ComplianceError::unavailable(document_id, "document has no stored chunks").into());
        };

        tracing::warn!(document_id, "No chunks stored, re-ingesting from source");
        if let Err(e) = reingest.reingest(document_id).await {
            if is_content_unavailable(&e) {
                return Err(e);
            }
            return Err(ComplianceError::unavailable(document_id, format!("re-ingestion failed: {:#}", e)).into());
        }

        let chunks = self.store.get_chunks(document_id)?;
        if chunks.is_empty() {
            return Err(ComplianceError::unavailable(document_id, "re-ingestion produced no chunks").into());
        }
        Ok(chunks)
    }

    /// One call per category, in declaration order, until the time ceiling
    async fn run_by_category(
        &self,
        template: &RequirementTemplate,
        items: &[&RequirementItem],
        context: &str,
        started: Instant,
    ) -> (Vec<AnalysisResult>, bool) {
        let groups = group_by_category(items);
        let throttle = Throttle::per_minute(self.settings.requests_per_minute);
        let mut results = Vec::with_capacity(items.len());
        let mut timed_out = false;

        for (category, group) in groups {
            if timed_out || started.elapsed() >= self.settings.time_ceiling {
                if !timed_out {
                    tracing::warn!(
                        elapsed_secs = started.elapsed().as_secs(),
                        category,
                        "Time ceiling reached, skipping remaining categories"
                    );
                }
                timed_out = true;
                results.extend(
                    group
                        .iter()
                        .map(|item| AnalysisResult::needs_clarification(item, TIMEOUT_REASONING)),
                );
                continue;
            }

            throttle.wait().await;
            tracing::debug!(category, requirements = group.len(), "Assessing category");
            results.extend(self.assess_batch(template, &group, context).await);
        }

        (results, timed_out)
    }

    /// Assess requirements with a single call, mapping answers by position
    async fn assess_batch(
        &self,
        template: &RequirementTemplate,
        items: &[&RequirementItem],
        context: &str,
    ) -> Vec<AnalysisResult> {
        let prompt = RequirementPrompt::generate(&template.name, template.regime, items, context);

        let response = match self.llm.complete(&prompt).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("LLM call failed for {} requirement(s): {:#}", items.len(), e);
                let reason = format!("LLM request failed: {:#}", e);
                return items
                    .iter()
                    .map(|item| AnalysisResult::needs_clarification(item, reason.clone()))
                    .collect();
            }
        };

        let assessments = match parse_assessments(&response.content) {
            Ok(assessments) => assessments,
            Err(e) => {
                tracing::warn!("Unusable LLM response: {:#}", e);
                let reason = format!("Could not parse model response: {:#}", e);
                return items
                    .iter()
                    .map(|item| AnalysisResult::needs_clarification(item, reason.clone()))
                    .collect();
            }
        };

        // Answers are matched by position only, so one missing or unreadable
        // element makes every position in the batch suspect.
        if assessments.len() != items.len() {
            tracing::warn!(
                expected = items.len(),
                received = assessments.len(),
                "Model returned a different number of assessments"
            );
            let reason = format!(
                "Model returned {} of {} assessments; positions cannot be matched to requirements",
                assessments.len(),
                items.len()
            );
            return items
                .iter()
                .map(|item| AnalysisResult::needs_clarification(item, reason.clone()))
                .collect();
        }

        if let Some((position, reason)) = assessments
            .iter()
            .enumerate()
            .find_map(|(i, a)| a.as_ref().err().map(|reason| (i + 1, reason)))
        {
            tracing::warn!(position, "Malformed assessment in model response: {}", reason);
            let reason = format!("Malformed assessment at position {}: {}", position, reason);
            return items
                .iter()
                .map(|item| AnalysisResult::needs_clarification(item, reason.clone()))
                .collect();
        }

        items
            .iter()
            .zip(assessments.into_iter().flatten())
            .map(|(item, assessment)| reconcile(item, template.regime, assessment))
            .collect()
    }
}

/// Join the leading chunks into one labelled context blob
pub fn build_context(chunks: &[TextChunk], max_chunks: usize) -> String {
    chunks
        .iter()
        .take(max_chunks)
        .enumerate()
        .map(|(i, chunk)| match chunk.page_number {
            Some(page) => format!("[Excerpt {} (page {})]\n{}", i + 1, page, chunk.content),
            None => format!("[Excerpt {}]\n{}", i + 1, chunk.content),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Group items by category, keeping first-seen category order
fn group_by_category<'t>(items: &[&'t RequirementItem]) -> Vec<(&'t str, Vec<&'t RequirementItem>)> {
    let mut groups: Vec<(&'t str, Vec<&'t RequirementItem>)> = Vec::new();

    for &item in items {
        match groups.iter_mut().find(|(category, _)| *category == item.category) {
            Some((_, group)) => group.push(item),
            None => groups.push((item.category.as_str(), vec![item])),
        }
    }

    groups
}

/// Turn a parsed assessment into a result, keeping status and score consistent.
///
/// Point-scored items of a risk-point template take their score from the
/// selected answer alone; an answer matching none of the options leaves the
/// item unscored and in need of clarification.
fn reconcile(item: &RequirementItem, regime: ScoringRegime, assessment: Assessment) -> AnalysisResult {
    let reasoning = if assessment.reasoning.is_empty() {
        "No reasoning provided".to_string()
    } else {
        assessment.reasoning
    };

    let risk_scored = regime == ScoringRegime::RiskPoints && item.scoring.is_scored();

    let mut result = if assessment.status == ComplianceStatus::NotApplicable {
        let mut result = AnalysisResult::draft(item, assessment.status, 0.0, reasoning);
        result.selected_answer = assessment.selected_answer;
        result
    } else if risk_scored {
        let matched = assessment
            .selected_answer
            .as_deref()
            .and_then(|answer| item.scoring.match_answer(answer));

        match matched {
            Some(outcome) => {
                let mut result = AnalysisResult::draft(item, assessment.status, outcome.points, reasoning);
                result.selected_answer = Some(outcome.label.clone());
                result
            }
            None => {
                let given = assessment.selected_answer.as_deref().unwrap_or("none");
                AnalysisResult::needs_clarification(
                    item,
                    format!(
                        "Answer did not match any option ({}; answer given: {}). Model reasoning: {}",
                        item.scoring.option_labels(),
                        given,
                        reasoning
                    ),
                )
            }
        }
    } else {
        let score = assessment
            .coverage_score
            .unwrap_or_else(|| assessment.status.default_coverage())
            .clamp(0.0, 100.0);
        let mut result = AnalysisResult::draft(item, assessment.status, score, reasoning);
        result.selected_answer = assessment.selected_answer;
        result
    };

    result.evidence_snippets = assessment.evidence_snippets;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquire::SourceKind;
    use crate::catalog::{builtin_templates, TemplateDefinition};
    use crate::llm::MockLlmClient;
    use crate::storage::{Database, DocumentRecord};
    use std::cell::Cell;

    const TEMPLATE: &str = r#"
id = "test-template"
name = "Test Whitepaper"

[[items]]
id = "issuer-name"
category = "Issuer"
name = "Issuer legal name"
description = "Registered name of the issuer"

[[items]]
id = "issuer-address"
category = "Issuer"
name = "Issuer registered address"
description = "Registered office"

[[items]]
id = "risk-market"
category = "Risks"
name = "Market risk disclosure"
description = "Describes market risks"

[[items]]
id = "tech-dlt"
category = "Technology"
name = "Distributed ledger description"
description = "Describes the DLT used"

[[items]]
id = "risk-tech"
category = "Risks"
name = "Technology risk disclosure"
description = "Describes technology risks"
"#;

    fn settings() -> AnalysisSettings {
        AnalysisSettings {
            max_context_chunks: 40,
            requests_per_minute: 0,
            time_ceiling: Duration::from_secs(280),
        }
    }

    fn seeded_db(template_toml: &str) -> (Database, String, String) {
        let db = Database::open_in_memory().unwrap();
        let template = TemplateDefinition::from_toml(template_toml)
            .unwrap()
            .into_template()
            .unwrap();
        db.upsert_template(&template).unwrap();

        let doc = DocumentRecord::new("whitepaper.pdf", "/tmp/whitepaper.pdf", SourceKind::Pdf);
        db.insert_document(&doc).unwrap();
        db.replace_chunks(
            &doc.id,
            &[
                TextChunk::new(0, "Acme GmbH, Hauptstrasse 1, Berlin.", Some(1), Some(0), Some(34)),
                TextChunk::new(1, "Token prices may be volatile.", Some(2), Some(0), Some(29)),
            ],
        )
        .unwrap();

        (db, doc.id, template.id)
    }

    fn element(status: &str, score: u32) -> String {
        format!(
            r#"{{"status": "{}", "coverage_score": {}, "reasoning": "checked", "evidence_snippets": ["Acme GmbH"]}}"#,
            status, score
        )
    }

    #[tokio::test]
    async fn test_fast_mode_single_call() {
        let (db, doc_id, template_id) = seeded_db(TEMPLATE);
        let llm = MockLlmClient::new();
        llm.push_response(&format!(
            "Sure! [{}, {}, {}, {}, {}]",
            element("FOUND", 100),
            element("FOUND", 90),
            element("MISSING", 0),
            element("NOT_APPLICABLE", 0),
            element("NEEDS_CLARIFICATION", 40),
        ));

        let analyzer = Analyzer::new(&db, &llm, settings());
        let outcome = analyzer
            .analyze(&doc_id, &template_id, AnalysisMode::Fast, &[])
            .await
            .unwrap();

        assert_eq!(llm.call_count(), 1);
        assert_eq!(outcome.results.len(), 5);
        assert_eq!(outcome.results[0].requirement_id, "issuer-name");
        assert_eq!(outcome.results[0].evidence_snippets, vec!["Acme GmbH"]);
        assert!(outcome.results.iter().all(|r| r.is_temporary()));
        assert_eq!(outcome.status, CheckStatus::Completed);
        assert_eq!(outcome.summary.found, 2);
        assert_eq!(outcome.summary.not_applicable, 1);
        // 2 found of 4 applicable
        assert_eq!(outcome.summary.overall_score, 50);

        let prompt = &llm.prompts()[0];
        assert!(prompt.contains("[Excerpt 1 (page 1)]"));
        assert!(prompt.contains("Technology risk disclosure"));
    }

    #[tokio::test]
    async fn test_fast_mode_partial_array_keeps_every_item() {
        let (db, doc_id, template_id) = seeded_db(TEMPLATE);
        let llm = MockLlmClient::new();
        llm.push_response(&format!("[{}, {}]", element("FOUND", 100), element("MISSING", 0)));

        let outcome = Analyzer::new(&db, &llm, settings())
            .analyze(&doc_id, &template_id, AnalysisMode::Fast, &[])
            .await
            .unwrap();

        // Without the missing elements no position can be trusted.
        assert_eq!(outcome.results.len(), 5);
        for result in &outcome.results {
            assert_eq!(result.status, ComplianceStatus::NeedsClarification);
            assert!(result.reasoning.contains("returned 2 of 5 assessments"));
            assert_eq!(result.coverage_score, 0.0);
        }
        assert_eq!(outcome.summary.found, 0);
        assert_eq!(outcome.summary.needs_clarification, 5);
    }

    #[tokio::test]
    async fn test_fast_mode_malformed_element_degrades_batch() {
        let (db, doc_id, template_id) = seeded_db(TEMPLATE);
        let llm = MockLlmClient::new();
        llm.push_response(&format!(
            "[{}, {}, {{\"status\": \"PERHAPS\"}}, {}, {}]",
            element("FOUND", 100),
            element("FOUND", 100),
            element("MISSING", 0),
            element("FOUND", 100),
        ));

        let outcome = Analyzer::new(&db, &llm, settings())
            .analyze(&doc_id, &template_id, AnalysisMode::Fast, &[])
            .await
            .unwrap();

        assert!(outcome.results.iter().all(|r| {
            r.status == ComplianceStatus::NeedsClarification && r.reasoning.contains("position 3")
        }));
    }

    #[tokio::test]
    async fn test_fast_mode_unparseable_response() {
        let (db, doc_id, template_id) = seeded_db(TEMPLATE);
        let llm = MockLlmClient::new();
        llm.push_response("I am unable to help with that.");

        let outcome = Analyzer::new(&db, &llm, settings())
            .analyze(&doc_id, &template_id, AnalysisMode::Fast, &[])
            .await
            .unwrap();

        assert_eq!(outcome.results.len(), 5);
        assert!(outcome.results.iter().all(|r| {
            r.status == ComplianceStatus::NeedsClarification && r.reasoning.contains("no JSON array")
        }));
        assert_eq!(outcome.summary.found, 0);
    }

    #[tokio::test]
    async fn test_normal_mode_isolates_failing_category() {
        let (db, doc_id, template_id) = seeded_db(TEMPLATE);
        let mut llm = MockLlmClient::new();
        llm.add_response(
            "Issuer legal name",
            &format!("[{}, {}]", element("FOUND", 100), element("FOUND", 100)),
        );
        llm.add_failure("Market risk disclosure", "HTTP 500 Internal Server Error");
        llm.add_response("Distributed ledger description", &format!("[{}]", element("MISSING", 0)));

        let outcome = Analyzer::new(&db, &llm, settings())
            .analyze(&doc_id, &template_id, AnalysisMode::Normal, &[])
            .await
            .unwrap();

        assert_eq!(llm.call_count(), 3);
        let prompts = llm.prompts();
        assert!(prompts[0].contains("Issuer legal name"));
        assert!(prompts[1].contains("Market risk disclosure"));
        assert!(prompts[1].contains("Technology risk disclosure"));
        assert!(!prompts[1].contains("Issuer legal name"));
        assert!(prompts[2].contains("Distributed ledger description"));

        let by_id = |id: &str| outcome.results.iter().find(|r| r.requirement_id == id).unwrap();
        assert_eq!(by_id("issuer-name").status, ComplianceStatus::Found);
        assert_eq!(by_id("tech-dlt").status, ComplianceStatus::Missing);
        for id in ["risk-market", "risk-tech"] {
            let result = by_id(id);
            assert_eq!(result.status, ComplianceStatus::NeedsClarification);
            assert!(result.reasoning.contains("HTTP 500"));
        }
        assert_eq!(outcome.status, CheckStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_normal_mode_stops_at_time_ceiling() {
        let (db, doc_id, template_id) = seeded_db(TEMPLATE);
        let mut llm = MockLlmClient::new().with_delay(Duration::from_secs(2));
        llm.add_response(
            "Issuer legal name",
            &format!("[{}, {}]", element("FOUND", 100), element("FOUND", 100)),
        );

        let settings = AnalysisSettings {
            time_ceiling: Duration::from_secs(1),
            ..settings()
        };
        let outcome = Analyzer::new(&db, &llm, settings)
            .analyze(&doc_id, &template_id, AnalysisMode::Normal, &[])
            .await
            .unwrap();

        assert_eq!(llm.call_count(), 1);
        assert_eq!(outcome.results.len(), 5);
        assert_eq!(outcome.status, CheckStatus::Partial);

        let skipped: Vec<_> = outcome
            .results
            .iter()
            .filter(|r| r.reasoning == TIMEOUT_REASONING)
            .collect();
        assert_eq!(skipped.len(), 3);
        assert!(skipped.iter().all(|r| r.status == ComplianceStatus::NeedsClarification));
    }

    #[tokio::test]
    async fn test_category_filter() {
        let (db, doc_id, template_id) = seeded_db(TEMPLATE);
        let llm = MockLlmClient::new();

        let outcome = Analyzer::new(&db, &llm, settings())
            .analyze(&doc_id, &template_id, AnalysisMode::Normal, &["risks".to_string()])
            .await
            .unwrap();

        assert_eq!(llm.call_count(), 1);
        assert_eq!(outcome.results.len(), 2);
        assert!(outcome.results.iter().all(|r| r.category == "Risks"));

        let err = Analyzer::new(&db, &llm, settings())
            .analyze(&doc_id, &template_id, AnalysisMode::Normal, &["Nope".to_string()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no requirements"));
    }

    fn legal_db() -> (Database, RequirementTemplate, String) {
        let db = Database::open_in_memory().unwrap();
        let legal = builtin_templates()
            .unwrap()
            .into_iter()
            .find(|t| t.id == "mica-legal")
            .unwrap();
        db.upsert_template(&legal).unwrap();
        let doc = DocumentRecord::new("token", "https://token.example/", SourceKind::Url);
        db.insert_document(&doc).unwrap();
        db.replace_chunks(&doc.id, &[TextChunk::new(0, "A utility token.", Some(1), None, None)])
            .unwrap();
        (db, legal, doc.id)
    }

    fn answer(status: &str, selected: Option<&str>) -> String {
        let selected = selected
            .map(|s| format!("\"{}\"", s))
            .unwrap_or_else(|| "null".to_string());
        format!(
            r#"{{"status": "{}", "coverage_score": 75, "reasoning": "r", "evidence_snippets": [], "selected_answer": {}}}"#,
            status, selected
        )
    }

    #[tokio::test]
    async fn test_risk_points_use_selected_answer() {
        let (db, legal, doc_id) = legal_db();
        let first = &legal.items[0];
        assert_eq!(first.scoring_logic, "Yes = 1000, No = 0");

        // Every scored item answers "No" except the first, which picks no option.
        let elements: Vec<String> = legal
            .items
            .iter()
            .enumerate()
            .map(|(i, item)| match (i, item.scoring.is_scored()) {
                (0, _) => answer("FOUND", None),
                (_, true) => answer("MISSING", Some("No, not at all")),
                (_, false) => answer("FOUND", None),
            })
            .collect();
        let llm = MockLlmClient::new();
        llm.push_response(&format!("[{}]", elements.join(",")));

        let outcome = Analyzer::new(&db, &llm, settings())
            .analyze(&doc_id, &legal.id, AnalysisMode::Fast, &[])
            .await
            .unwrap();

        let unanswered = &outcome.results[0];
        assert_eq!(unanswered.status, ComplianceStatus::NeedsClarification);
        assert_eq!(unanswered.coverage_score, 0.0);
        assert!(unanswered.reasoning.contains("did not match any option"));

        for (item, result) in legal.items.iter().zip(&outcome.results).skip(1) {
            if item.scoring.is_scored() {
                assert_eq!(result.selected_answer.as_deref(), Some("No"));
                assert_eq!(Some(result.coverage_score), item.scoring.points_for("No"));
            }
        }

        // The unanswered 1000-point item is out of both totals.
        let risk = outcome.summary.risk.as_ref().unwrap();
        assert_eq!(risk.aggregate, 1250.0);
        assert_eq!(risk.maximum, 3550.0);
        assert_eq!(risk.percentage, 35);
    }

    #[tokio::test]
    async fn test_failed_legal_run_adds_no_risk() {
        let (db, legal, doc_id) = legal_db();
        let llm = MockLlmClient::new();
        llm.push_response("sorry, no json");

        let outcome = Analyzer::new(&db, &llm, settings())
            .analyze(&doc_id, &legal.id, AnalysisMode::Fast, &[])
            .await
            .unwrap();

        assert!(outcome
            .results
            .iter()
            .all(|r| r.status == ComplianceStatus::NeedsClarification && r.coverage_score == 0.0));
        let risk = outcome.summary.risk.as_ref().unwrap();
        assert_eq!(risk.aggregate, 0.0);
        assert_eq!(risk.percentage, 0);
    }

    #[tokio::test]
    async fn test_normal_mode_spaces_calls() {
        let (db, doc_id, template_id) = seeded_db(TEMPLATE);
        let llm = MockLlmClient::new();

        // Three categories at 50ms spacing
        let settings = AnalysisSettings {
            requests_per_minute: 1200,
            ..settings()
        };
        let start = std::time::Instant::now();
        Analyzer::new(&db, &llm, settings)
            .analyze(&doc_id, &template_id, AnalysisMode::Normal, &[])
            .await
            .unwrap();

        assert_eq!(llm.call_count(), 3);
        assert!(start.elapsed() >= Duration::from_millis(90));
    }

    struct StubReingest<'a> {
        db: &'a Database,
        chunks: Vec<TextChunk>,
        calls: Cell<usize>,
    }

    #[async_trait::async_trait(?Send)]
    impl<'a> Reingest for StubReingest<'a> {
        async fn reingest(&self, document_id: &str) -> Result<usize> {
            self.calls.set(self.calls.get() + 1);
            self.db.replace_chunks(document_id, &self.chunks)?;
            Ok(self.chunks.len())
        }
    }

    #[tokio::test]
    async fn test_missing_chunks_trigger_single_reingest() {
        let (db, doc_id, template_id) = seeded_db(TEMPLATE);
        db.replace_chunks(&doc_id, &[]).unwrap();
        let llm = MockLlmClient::new();

        let err = Analyzer::new(&db, &llm, settings())
            .analyze(&doc_id, &template_id, AnalysisMode::Fast, &[])
            .await
            .unwrap_err();
        assert!(is_content_unavailable(&err));

        let empty = StubReingest {
            db: &db,
            chunks: Vec::new(),
            calls: Cell::new(0),
        };
        let err = Analyzer::new(&db, &llm, settings())
            .with_reingest(&empty)
            .analyze(&doc_id, &template_id, AnalysisMode::Fast, &[])
            .await
            .unwrap_err();
        assert!(is_content_unavailable(&err));
        assert_eq!(empty.calls.get(), 1);
        assert_eq!(llm.call_count(), 0);

        let working = StubReingest {
            db: &db,
            chunks: vec![TextChunk::new(0, "Recovered text.", Some(1), None, None)],
            calls: Cell::new(0),
        };
        let outcome = Analyzer::new(&db, &llm, settings())
            .with_reingest(&working)
            .analyze(&doc_id, &template_id, AnalysisMode::Fast, &[])
            .await
            .unwrap();
        assert_eq!(working.calls.get(), 1);
        assert_eq!(outcome.results.len(), 5);
        assert!(llm.prompts()[0].contains("Recovered text."));
    }

    #[test]
    fn test_build_context_caps_and_labels() {
        let chunks: Vec<TextChunk> = (0..50)
            .map(|i| TextChunk::new(i, &format!("chunk {}", i), if i == 0 { None } else { Some(i) }, None, None))
            .collect();

        let context = build_context(&chunks, 40);
        assert!(context.starts_with("[Excerpt 1]\nchunk 0"));
        assert!(context.contains("[Excerpt 2 (page 1)]\nchunk 1"));
        assert!(context.contains("[Excerpt 40 (page 39)]"));
        assert!(!context.contains("chunk 40"));
    }

    #[test]
    fn test_group_by_category_keeps_declaration_order() {
        let template = TemplateDefinition::from_toml(TEMPLATE)
            .unwrap()
            .into_template()
            .unwrap();
        let items: Vec<&RequirementItem> = template.items.iter().collect();
        let groups = group_by_category(&items);

        let names: Vec<&str> = groups.iter().map(|(c, _)| *c).collect();
        assert_eq!(names, vec!["Issuer", "Risks", "Technology"]);
        assert_eq!(groups[1].1.len(), 2);
    }
}
