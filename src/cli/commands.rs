//! Command implementations

use super::{AnalyzeArgs, IngestArgs, OutputFormat, OverrideArgs};
use crate::acquire::{HttpFetcher, Source};
use crate::analysis::{
    update_result_status, AnalysisOutcome, AnalysisResult, Analyzer, ComplianceStatus, StatusUpdate,
};
use crate::catalog::{builtin_templates, load_template_file, ScoringRegime};
use crate::config::{AppConfig, CONFIG_FILE, DATA_DIR};
use crate::error::ComplianceError;
use crate::ingest::{IngestReport, Ingestor};
use crate::llm::LlmClient;
use crate::scoring::Summary;
use crate::storage::{ComplianceStore, Database};
use crate::versions::{self, SaveOutcome, SaveRequest};
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use url::Url;

/// Database file inside the workspace data directory
pub const DB_FILE: &str = "micacheck.db";

/// An initialized workspace: configuration plus open database
pub struct Workspace {
    pub root: PathBuf,
    pub config: AppConfig,
    pub db: Database,
}

impl Workspace {
    /// Open the workspace under `home`; fails if `init` has not run
    pub fn open(home: &Path, config_path: Option<&Path>, api_key: Option<&str>) -> Result<Self> {
        let data_dir = home.join(DATA_DIR);
        if !data_dir.exists() {
            anyhow::bail!("micacheck not initialized. Run 'micacheck init' first.");
        }

        let mut config = AppConfig::load_or_default(config_path, home)?;
        if let Some(key) = api_key {
            config.llm.api_key = Some(key.to_string());
        }

        let db = Database::open(data_dir.join(DB_FILE))?;

        Ok(Self {
            root: home.to_path_buf(),
            config,
            db,
        })
    }

    fn fetcher(&self) -> Result<HttpFetcher> {
        HttpFetcher::new(self.config.fetch_timeout(), &self.config.crawl.user_agent)
    }

    fn ingestor<'a>(&'a self, fetcher: &'a HttpFetcher) -> Ingestor<'a> {
        Ingestor::new(&self.db, fetcher)
            .with_crawl_options(self.config.crawl_options())
            .with_chunker(self.config.chunker())
            .with_min_document_chars(self.config.chunking.min_document_chars)
    }
}

/// Create the workspace directory, database, config and built-in templates
pub fn init(home: &Path, force: bool) -> Result<()> {
    let data_dir = home.join(DATA_DIR);
    if data_dir.join(CONFIG_FILE).exists() && !force {
        anyhow::bail!("micacheck already initialized. Use --force to re-initialize.");
    }

    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create {:?}", data_dir))?;

    let db_path = data_dir.join(DB_FILE);
    let db = Database::open(&db_path)?;

    let templates = builtin_templates()?;
    for template in &templates {
        db.upsert_template(template)?;
    }

    let config_path = AppConfig::default().save(home)?;

    println!("✓ Initialized micacheck in {:?}", home);
    println!("  Database: {:?}", db_path);
    println!("  Config: {:?}", config_path);
    println!(
        "  Templates: {}",
        templates
            .iter()
            .map(|t| t.id.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    Ok(())
}

/// Ingest a PDF or website
pub async fn ingest(ws: &Workspace, args: &IngestArgs, format: OutputFormat) -> Result<IngestReport> {
    let source = if let Some(path) = &args.pdf {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {:?}", path))?;
        let path = std::fs::canonicalize(path).unwrap_or_else(|_| path.clone());
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".to_string());
        Source::Pdf {
            name,
            bytes,
            path: Some(path.to_string_lossy().into_owned()),
        }
    } else if let Some(url) = &args.url {
        Source::Url(Url::parse(url).with_context(|| format!("Invalid URL: {}", url))?)
    } else {
        anyhow::bail!("Provide either --pdf or --url");
    };

    let fetcher = ws.fetcher()?;
    let report = ws
        .ingestor(&fetcher)
        .ingest(&source, args.name.as_deref())
        .await?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => {
            println!("✓ Ingested {}", report.name);
            println!("  ID: {}", report.document_id);
            println!("  Strategy: {}", report.strategy);
            println!("  Pages: {}", report.page_count);
            println!("  Chunks: {}", report.chunk_count);
            if report.reused {
                let note = if report.changed { "content changed" } else { "content unchanged" };
                println!("  Existing document re-crawled ({})", note);
            }
        }
    }

    Ok(report)
}

/// List stored documents
pub fn list_documents(ws: &Workspace, format: OutputFormat) -> Result<()> {
    let documents = ws.db.list_documents()?;

    if format == OutputFormat::Json {
        return print_json(&documents);
    }

    if documents.is_empty() {
        println!("No documents. Ingest one with 'micacheck ingest'.");
        return Ok(());
    }

    for doc in &documents {
        println!("{}  [{}] {}", doc.id, doc.kind, doc.name);
        println!("   Source: {}", doc.source);
        println!("   Updated: {}", doc.updated_at.format("%Y-%m-%d %H:%M"));
    }

    Ok(())
}

/// Remove a document and its chunks
pub fn remove_document(ws: &Workspace, document_id: &str) -> Result<()> {
    if !ws.db.delete_document(document_id)? {
        return Err(ComplianceError::DocumentNotFound(document_id.to_string()).into());
    }
    println!("✓ Removed document {}", document_id);
    Ok(())
}

/// Show a document's chunks
pub fn show_chunks(ws: &Workspace, document_id: &str, limit: Option<usize>, format: OutputFormat) -> Result<()> {
    let document = ws
        .db
        .get_document(document_id)?
        .ok_or_else(|| ComplianceError::DocumentNotFound(document_id.to_string()))?;

    let mut chunks = ws.db.get_chunks(document_id)?;
    if let Some(limit) = limit {
        chunks.truncate(limit);
    }

    if format == OutputFormat::Json {
        return print_json(&chunks);
    }

    println!("Chunks of {}", document.name);
    println!("==========\n");

    for chunk in &chunks {
        let page = chunk
            .page_number
            .map(|p| format!("page {}", p))
            .unwrap_or_else(|| "no page".to_string());
        println!("#{} ({}, {} words)", chunk.index, page, chunk.word_count);
        println!("{}\n", preview(&chunk.content, 240));
    }

    Ok(())
}

/// List templates
pub fn list_templates(ws: &Workspace, format: OutputFormat) -> Result<()> {
    let templates = ws.db.list_templates()?;

    if format == OutputFormat::Json {
        return print_json(&templates);
    }

    if templates.is_empty() {
        println!("No templates. Run 'micacheck init' to install the built-in templates.");
        return Ok(());
    }

    for template in &templates {
        println!(
            "{}  {} ({} requirements, {})",
            template.id,
            template.name,
            template.items.len(),
            template.regime
        );
    }

    Ok(())
}

/// Show a template's requirements by category
pub fn show_template(ws: &Workspace, template_id: &str, format: OutputFormat) -> Result<()> {
    let template = ws
        .db
        .get_template(template_id)?
        .ok_or_else(|| ComplianceError::TemplateNotFound(template_id.to_string()))?;

    if format == OutputFormat::Json {
        return print_json(&template);
    }

    println!("{} ({})", template.name, template.regime);
    if let Some(description) = &template.description {
        println!("{}", description);
    }

    for category in template.categories() {
        println!("\n{}", category);
        println!("{}", "-".repeat(category.chars().count()));
        for item in template.items.iter().filter(|i| i.category == category) {
            println!("  {}  {}", item.id, item.item_name);
            if item.scoring.is_scored() && template.regime == ScoringRegime::RiskPoints {
                println!("     Scoring: {}", item.scoring_logic);
            }
        }
    }

    Ok(())
}

/// Import a template definition file
pub fn import_template(ws: &Workspace, path: &Path) -> Result<()> {
    let template = load_template_file(path)?;
    ws.db.upsert_template(&template)?;

    println!(
        "✓ Imported template {} ({} requirements, {})",
        template.id,
        template.items.len(),
        template.regime
    );
    Ok(())
}

#[derive(Serialize)]
struct AnalyzeOutput<'a> {
    #[serde(flatten)]
    outcome: &'a AnalysisOutcome,
    saved: Option<&'a SaveOutcome>,
}

/// Run a template against a document, optionally saving the run
pub async fn analyze(ws: &Workspace, args: &AnalyzeArgs, format: OutputFormat) -> Result<AnalysisOutcome> {
    let mode = args.mode.unwrap_or(ws.config.analysis.default_mode);

    let llm = LlmClient::new(ws.config.llm_config())?;
    let fetcher = ws.fetcher()?;
    let ingestor = ws.ingestor(&fetcher);
    let analyzer = Analyzer::new(&ws.db, &llm, ws.config.analysis_settings()).with_reingest(&ingestor);

    let outcome = analyzer
        .analyze(&args.document_id, &args.template_id, mode, &args.categories)
        .await?;

    let saved = if args.save {
        let mut request = SaveRequest::from_outcome(&outcome);
        if args.overwrite {
            request = request.overwriting(args.target_version);
        }
        Some(versions::save_analysis(&ws.db, request)?)
    } else {
        None
    };

    match format {
        OutputFormat::Json => print_json(&AnalyzeOutput {
            outcome: &outcome,
            saved: saved.as_ref(),
        })?,
        OutputFormat::Text => {
            println!("{} ({} mode, {})", outcome.template_name, outcome.mode, outcome.model);
            println!("==========\n");
            print_results(&outcome.results, false);
            print_summary(&outcome.summary);
            println!("  Status: {} in {:.1}s", outcome.status, outcome.elapsed.as_secs_f64());

            match &saved {
                Some(saved) => {
                    println!("\n✓ Saved as version {} ({})", saved.version, saved.check_id);
                    if let Some(err) = &saved.results_error {
                        println!("⚠ Results were not stored: {}", err);
                    }
                }
                None => println!("\nNot saved. Re-run with --save to keep this result."),
            }
        }
    }

    Ok(outcome)
}

#[derive(Serialize)]
struct VersionEntry<'a> {
    #[serde(flatten)]
    check: &'a crate::storage::CheckRecord,
    source_changed: Option<bool>,
}

/// List saved versions for a document and template
pub fn list_versions(ws: &Workspace, document_id: &str, template_id: &str, format: OutputFormat) -> Result<()> {
    let checks = versions::list_versions(&ws.db, document_id, template_id)?;

    let mut entries = Vec::with_capacity(checks.len());
    for check in &checks {
        entries.push(VersionEntry {
            check,
            source_changed: versions::source_changed(&ws.db, check)?,
        });
    }

    if format == OutputFormat::Json {
        return print_json(&entries);
    }

    if entries.is_empty() {
        println!("No saved versions.");
        return Ok(());
    }

    for entry in &entries {
        let check = entry.check;
        let changed = match entry.source_changed {
            Some(true) => "  (document changed since)",
            _ => "",
        };
        println!(
            "v{}  {}  score {}  [{}]  {}{}",
            check.version,
            check.id,
            check.summary.overall_score,
            check.status,
            check.updated_at.format("%Y-%m-%d %H:%M"),
            changed
        );
    }

    Ok(())
}

/// Show a saved check
pub fn show_check(ws: &Workspace, check_id: &str, detailed: bool, format: OutputFormat) -> Result<()> {
    let record = versions::get_analysis(&ws.db, check_id)?;

    if format == OutputFormat::Json {
        return print_json(&record);
    }

    println!("{} - version {}", record.template_name, record.check.version);
    println!("==========\n");
    println!("Document: {}", record.check.document_id);
    if let Some(model) = &record.check.model {
        println!("Model: {}", model);
    }
    println!();

    print_results(&record.results, detailed);
    print_summary(&record.check.summary);
    println!("  Status: {}", record.check.status);

    if versions::source_changed(&ws.db, &record.check)? == Some(true) {
        println!("\n⚠ The document changed after this check was saved.");
    }

    Ok(())
}

/// Delete a saved check
pub fn delete_check(ws: &Workspace, check_id: &str) -> Result<()> {
    versions::delete_analysis(&ws.db, check_id)?;
    println!("✓ Deleted compliance check {}", check_id);
    Ok(())
}

/// Manually override a result
pub fn override_result(ws: &Workspace, args: &OverrideArgs, format: OutputFormat) -> Result<()> {
    let update = update_result_status(
        &ws.db,
        &args.result_id,
        args.status,
        args.score,
        args.answer.as_deref(),
    )?;

    match (&update, format) {
        (StatusUpdate::Persisted(result), OutputFormat::Json) => print_json(result)?,
        (
            StatusUpdate::Draft {
                id,
                status,
                coverage_score,
                selected_answer,
            },
            OutputFormat::Json,
        ) => {
            print_json(&serde_json::json!({
                "id": id,
                "status": status,
                "coverage_score": coverage_score,
                "selected_answer": selected_answer,
                "draft": true,
            }))?
        }
        (StatusUpdate::Persisted(result), OutputFormat::Text) => {
            match &result.selected_answer {
                Some(answer) => println!(
                    "✓ {} set to {} (answer {}, score {})",
                    result.item_name, result.status, answer, result.coverage_score
                ),
                None => println!(
                    "✓ {} set to {} (score {})",
                    result.item_name, result.status, result.coverage_score
                ),
            }
        }
        (StatusUpdate::Draft { id, status, .. }, OutputFormat::Text) => {
            println!("Draft result {} set to {} (nothing stored)", id, status);
        }
    }

    Ok(())
}

/// Show workspace status
pub async fn status(ws: &Workspace, check_llm: bool, format: OutputFormat) -> Result<()> {
    let stats = ws.db.get_stats()?;

    let llm_available = if check_llm {
        Some(LlmClient::new(ws.config.llm_config())?.is_available().await)
    } else {
        None
    };

    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({
            "workspace": ws.root,
            "stats": stats,
            "llm": {
                "endpoint": ws.config.llm.endpoint,
                "model": ws.config.llm.model,
                "available": llm_available,
            },
        }));
    }

    println!("micacheck Status");
    println!("================\n");

    println!("Workspace: {:?}", ws.root);
    println!("Documents: {}", stats.documents);
    println!("Chunks: {}", stats.chunks);
    println!("Templates: {}", stats.templates);
    println!("Saved checks: {}", stats.checks);
    println!("Results: {}", stats.results);

    println!("\nLLM endpoint: {}", ws.config.llm.endpoint);
    println!("LLM model: {}", ws.config.llm.model);
    match llm_available {
        Some(true) => println!("LLM: reachable"),
        Some(false) => println!("LLM: not reachable"),
        None => {}
    }

    Ok(())
}

/// Print any serializable value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}

fn print_results(results: &[AnalysisResult], detailed: bool) {
    let mut category = "";
    for result in results {
        if result.category != category {
            category = &result.category;
            println!("{}", category);
        }

        let icon = match result.status {
            ComplianceStatus::Found => "🟢",
            ComplianceStatus::NeedsClarification => "🟡",
            ComplianceStatus::Missing => "🔴",
            ComplianceStatus::NotApplicable => "⚪",
        };
        let overridden = if result.manual_override { " (manual)" } else { "" };

        println!(
            "{} [{}] {} - {}{}",
            icon, result.status, result.item_name, result.coverage_score, overridden
        );
        println!("   ID: {}", short_id(&result.id));

        if detailed {
            if let Some(answer) = &result.selected_answer {
                println!("   Answer: {}", answer);
            }
            println!("   Reasoning: {}", result.reasoning);
            for snippet in &result.evidence_snippets {
                println!("   > {}", preview(snippet, 200));
            }
        }
    }
    println!();
}

fn print_summary(summary: &Summary) {
    match (&summary.regime, &summary.risk) {
        (ScoringRegime::RiskPoints, Some(risk)) => println!(
            "Risk: {}% ({:.0} of {:.0} points, lower is better)",
            risk.percentage, risk.aggregate, risk.maximum
        ),
        _ => println!(
            "Overall score: {}% ({} of {} applicable requirements found)",
            summary.overall_score,
            summary.found,
            summary.applicable()
        ),
    }
    println!(
        "  Found: {}  Needs clarification: {}  Missing: {}  Not applicable: {}",
        summary.found, summary.needs_clarification, summary.missing, summary.not_applicable
    );
}

fn short_id(id: &str) -> &str {
    id.get(..13).unwrap_or(id)
}

fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}…", cut)
    }
}
