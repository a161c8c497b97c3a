//! SQLite storage layer for micacheck
//!
//! This module handles persistent storage of:
//! - Documents and their extracted chunks
//! - Requirement templates
//! - Versioned compliance checks and their per-requirement results
//!
//! Everything above this layer talks to the [`ComplianceStore`] trait so
//! tests can substitute their own store.

mod schema;

pub use schema::SCHEMA;

use crate::acquire::SourceKind;
use crate::analysis::{AnalysisResult, CheckStatus, ComplianceStatus};
use crate::catalog::{RequirementItem, RequirementTemplate, ScoringRegime};
use crate::chunk::TextChunk;
use crate::error::ComplianceError;
use crate::scoring::{RiskScore, Summary};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A stored source document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub name: String,
    /// File path or URL the content was acquired from
    pub source: String,
    pub kind: SourceKind,
    /// Hash of the extracted text, unset until the first ingestion
    pub content_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DocumentRecord {
    pub fn new(name: &str, source: &str, kind: SourceKind) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            source: source.to_string(),
            kind,
            content_hash: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A stored analysis run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckRecord {
    pub id: String,
    pub document_id: String,
    pub template_id: String,
    /// Starts at 1 per (document, template) pair
    pub version: u32,
    pub summary: Summary,
    pub status: CheckStatus,
    /// Document content hash the run was based on
    pub document_hash: Option<String>,
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CheckRecord {
    pub fn new(document_id: &str, template_id: &str, version: u32, summary: Summary) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            template_id: template_id.to_string(),
            version,
            summary,
            status: CheckStatus::Completed,
            document_hash: None,
            model: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Storage operations the pipeline depends on
pub trait ComplianceStore {
    // Documents
    fn insert_document(&self, document: &DocumentRecord) -> Result<()>;
    fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>>;
    fn find_document_by_source(&self, source: &str) -> Result<Option<DocumentRecord>>;
    fn list_documents(&self) -> Result<Vec<DocumentRecord>>;
    fn set_document_hash(&self, id: &str, content_hash: &str) -> Result<()>;
    /// Delete a document and its chunks; fails while checks reference it
    fn delete_document(&self, id: &str) -> Result<bool>;

    // Chunks
    /// Replace every chunk of a document; all or nothing
    fn replace_chunks(&self, document_id: &str, chunks: &[TextChunk]) -> Result<()>;
    /// Chunks ordered by index
    fn get_chunks(&self, document_id: &str) -> Result<Vec<TextChunk>>;

    // Templates
    fn upsert_template(&self, template: &RequirementTemplate) -> Result<()>;
    fn get_template(&self, id: &str) -> Result<Option<RequirementTemplate>>;
    fn list_templates(&self) -> Result<Vec<RequirementTemplate>>;

    // Checks
    /// Checks for a pair, newest version first
    fn list_checks(&self, document_id: &str, template_id: &str) -> Result<Vec<CheckRecord>>;
    fn get_check(&self, id: &str) -> Result<Option<CheckRecord>>;
    fn insert_check(&self, check: &CheckRecord) -> Result<()>;
    /// Rewrite summary, status, hash and model; the version is left alone
    fn update_check_summary(&self, check: &CheckRecord) -> Result<()>;
    /// Delete a check and its results
    fn delete_check(&self, id: &str) -> Result<bool>;

    // Results
    /// Replace every result of a check; all or nothing
    fn replace_results(&self, check_id: &str, results: &[AnalysisResult]) -> Result<()>;
    /// Results in the order they were saved
    fn get_results(&self, check_id: &str) -> Result<Vec<AnalysisResult>>;
    fn get_result(&self, id: &str) -> Result<Option<AnalysisResult>>;
    /// Set status, score and selected answer together and flag the manual override
    fn update_result_status(
        &self,
        id: &str,
        status: ComplianceStatus,
        coverage_score: f64,
        selected_answer: Option<&str>,
    ) -> Result<bool>;
}

/// Database connection wrapper
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", path.as_ref()))?;

        let db = Self { conn };
        db.initialize()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;

        let db = Self { conn };
        db.initialize()?;

        Ok(db)
    }

    /// Initialize the database schema
    fn initialize(&self) -> Result<()> {
        self.conn
            .execute_batch(SCHEMA)
            .context("Failed to initialize database schema")?;
        Ok(())
    }

    // ==================== Statistics ====================

    /// Get database statistics
    pub fn get_stats(&self) -> Result<DatabaseStats> {
        let count = |table: &str| -> Result<usize> {
            let n: i64 = self
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
                .with_context(|| format!("Failed to count {}", table))?;
            Ok(n as usize)
        };

        Ok(DatabaseStats {
            documents: count("documents")?,
            chunks: count("document_chunks")?,
            templates: count("compliance_templates")?,
            checks: count("compliance_checks")?,
            results: count("analysis_results")?,
        })
    }

    fn get_template_items(&self, template_id: &str) -> Result<Vec<RequirementItem>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, category, item_name, description, weight, scoring_logic
            FROM template_items WHERE template_id = ?1
            ORDER BY position
            "#,
        )?;

        let rows = stmt.query_map(params![template_id], |row| {
            Ok(RequirementItem::new(
                &row.get::<_, String>(0)?,
                &row.get::<_, String>(1)?,
                &row.get::<_, String>(2)?,
                &row.get::<_, String>(3)?,
                row.get(4)?,
                &row.get::<_, String>(5)?,
            ))
        })?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    fn template_from_header(&self, header: TemplateRow) -> Result<RequirementTemplate> {
        let regime = ScoringRegime::parse(&header.regime)
            .unwrap_or_else(|| ScoringRegime::infer_from_name(&header.name));
        let items = self.get_template_items(&header.id)?;

        Ok(RequirementTemplate {
            id: header.id,
            name: header.name,
            description: header.description,
            regime,
            items,
        })
    }
}

const DOCUMENT_COLUMNS: &str = "id, name, source, mime_type, content_hash, created_at, updated_at";

const CHECK_COLUMNS: &str = r#"
    id, document_id, template_id, version, regime, total_items, found_count,
    clarification_count, missing_count, not_applicable_count, overall_score,
    risk_points, max_points, status, document_hash, model, created_at, updated_at
"#;

const RESULT_COLUMNS: &str = r#"
    id, check_id, requirement_id, item_name, category, status, coverage_score,
    reasoning, evidence_snippets, selected_answer, manual_override
"#;

impl ComplianceStore for Database {
    // ==================== Documents ====================

    fn insert_document(&self, document: &DocumentRecord) -> Result<()> {
        self.conn
            .execute(
                &format!(
                    "INSERT INTO documents ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    DOCUMENT_COLUMNS
                ),
                params![
                    document.id,
                    document.name,
                    document.source,
                    document.kind.mime_type(),
                    document.content_hash,
                    document.created_at.to_rfc3339(),
                    document.updated_at.to_rfc3339(),
                ],
            )
            .context("Failed to insert document")?;
        Ok(())
    }

    fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM documents WHERE id = ?1", DOCUMENT_COLUMNS),
                params![id],
                DocumentRow::from_row,
            )
            .optional()
            .context("Failed to get document")?;

        row.map(DocumentRow::into_record).transpose()
    }

    fn find_document_by_source(&self, source: &str) -> Result<Option<DocumentRecord>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM documents WHERE source = ?1 ORDER BY created_at DESC LIMIT 1",
                    DOCUMENT_COLUMNS
                ),
                params![source],
                DocumentRow::from_row,
            )
            .optional()
            .context("Failed to find document by source")?;

        row.map(DocumentRow::into_record).transpose()
    }

    fn list_documents(&self) -> Result<Vec<DocumentRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM documents ORDER BY created_at",
            DOCUMENT_COLUMNS
        ))?;

        let rows = stmt.query_map([], DocumentRow::from_row)?;

        let mut documents = Vec::new();
        for row in rows {
            documents.push(row?.into_record()?);
        }
        Ok(documents)
    }

    fn set_document_hash(&self, id: &str, content_hash: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE documents SET content_hash = ?1, updated_at = ?2 WHERE id = ?3",
                params![content_hash, Utc::now().to_rfc3339(), id],
            )
            .context("Failed to update document hash")?;
        Ok(())
    }

    fn delete_document(&self, id: &str) -> Result<bool> {
        let checks: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM compliance_checks WHERE document_id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        if checks > 0 {
            return Err(ComplianceError::DocumentInUse(id.to_string()).into());
        }

        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM document_chunks WHERE document_id = ?1", params![id])
            .context("Failed to delete document chunks")?;
        let deleted = tx
            .execute("DELETE FROM documents WHERE id = ?1", params![id])
            .context("Failed to delete document")?;
        tx.commit()?;

        Ok(deleted > 0)
    }

    // ==================== Chunks ====================

    fn replace_chunks(&self, document_id: &str, chunks: &[TextChunk]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            "DELETE FROM document_chunks WHERE document_id = ?1",
            params![document_id],
        )
        .context("Failed to clear document chunks")?;

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO document_chunks (
                    document_id, chunk_index, content, word_count,
                    page_number, start_offset, end_offset
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )?;

            for chunk in chunks {
                stmt.execute(params![
                    document_id,
                    chunk.index as i64,
                    chunk.content,
                    chunk.word_count as i64,
                    chunk.page_number.map(|n| n as i64),
                    chunk.start_offset.map(|n| n as i64),
                    chunk.end_offset.map(|n| n as i64),
                ])
                .with_context(|| format!("Failed to insert chunk {}", chunk.index))?;
            }
        }

        tx.commit().context("Failed to commit chunk replacement")?;
        Ok(())
    }

    fn get_chunks(&self, document_id: &str) -> Result<Vec<TextChunk>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT chunk_index, content, word_count, page_number, start_offset, end_offset
            FROM document_chunks WHERE document_id = ?1
            ORDER BY chunk_index
            "#,
        )?;

        let rows = stmt.query_map(params![document_id], |row| {
            Ok(TextChunk {
                index: row.get::<_, i64>(0)? as usize,
                content: row.get(1)?,
                word_count: row.get::<_, i64>(2)? as usize,
                page_number: row.get::<_, Option<i64>>(3)?.map(|n| n as usize),
                start_offset: row.get::<_, Option<i64>>(4)?.map(|n| n as usize),
                end_offset: row.get::<_, Option<i64>>(5)?.map(|n| n as usize),
            })
        })?;

        let mut chunks = Vec::new();
        for row in rows {
            chunks.push(row?);
        }
        Ok(chunks)
    }

    // ==================== Templates ====================

    fn upsert_template(&self, template: &RequirementTemplate) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            r#"
            INSERT INTO compliance_templates (id, name, description, regime, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                regime = excluded.regime,
                updated_at = excluded.updated_at
            "#,
            params![
                template.id,
                template.name,
                template.description,
                template.regime.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )
        .context("Failed to upsert template")?;

        tx.execute(
            "DELETE FROM template_items WHERE template_id = ?1",
            params![template.id],
        )?;

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO template_items (
                    template_id, id, position, category, item_name,
                    description, weight, scoring_logic
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )?;

            for (position, item) in template.items.iter().enumerate() {
                stmt.execute(params![
                    template.id,
                    item.id,
                    position as i64,
                    item.category,
                    item.item_name,
                    item.description,
                    item.weight,
                    item.scoring_logic,
                ])
                .with_context(|| format!("Failed to insert template item {}", item.id))?;
            }
        }

        tx.commit().context("Failed to commit template")?;
        Ok(())
    }

    fn get_template(&self, id: &str) -> Result<Option<RequirementTemplate>> {
        let header = self
            .conn
            .query_row(
                "SELECT id, name, description, regime FROM compliance_templates WHERE id = ?1",
                params![id],
                TemplateRow::from_row,
            )
            .optional()
            .context("Failed to get template")?;

        header.map(|h| self.template_from_header(h)).transpose()
    }

    fn list_templates(&self) -> Result<Vec<RequirementTemplate>> {
        let headers = {
            let mut stmt = self
                .conn
                .prepare("SELECT id, name, description, regime FROM compliance_templates ORDER BY name")?;
            let rows = stmt.query_map([], TemplateRow::from_row)?;

            let mut headers = Vec::new();
            for row in rows {
                headers.push(row?);
            }
            headers
        };

        headers
            .into_iter()
            .map(|h| self.template_from_header(h))
            .collect()
    }

    // ==================== Checks ====================

    fn list_checks(&self, document_id: &str, template_id: &str) -> Result<Vec<CheckRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM compliance_checks WHERE document_id = ?1 AND template_id = ?2 ORDER BY version DESC",
            CHECK_COLUMNS
        ))?;

        let rows = stmt.query_map(params![document_id, template_id], CheckRow::from_row)?;

        let mut checks = Vec::new();
        for row in rows {
            checks.push(row?.into_record()?);
        }
        Ok(checks)
    }

    fn get_check(&self, id: &str) -> Result<Option<CheckRecord>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM compliance_checks WHERE id = ?1", CHECK_COLUMNS),
                params![id],
                CheckRow::from_row,
            )
            .optional()
            .context("Failed to get compliance check")?;

        row.map(CheckRow::into_record).transpose()
    }

    fn insert_check(&self, check: &CheckRecord) -> Result<()> {
        let summary = &check.summary;
        self.conn
            .execute(
                &format!(
                    "INSERT INTO compliance_checks ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
                    CHECK_COLUMNS
                ),
                params![
                    check.id,
                    check.document_id,
                    check.template_id,
                    check.version as i64,
                    summary.regime.as_str(),
                    summary.total as i64,
                    summary.found as i64,
                    summary.needs_clarification as i64,
                    summary.missing as i64,
                    summary.not_applicable as i64,
                    summary.overall_score as i64,
                    summary.risk.as_ref().map(|r| r.aggregate),
                    summary.risk.as_ref().map(|r| r.maximum),
                    check.status.as_str(),
                    check.document_hash,
                    check.model,
                    check.created_at.to_rfc3339(),
                    check.updated_at.to_rfc3339(),
                ],
            )
            .context("Failed to insert compliance check")?;
        Ok(())
    }

    fn update_check_summary(&self, check: &CheckRecord) -> Result<()> {
        let summary = &check.summary;
        let updated = self
            .conn
            .execute(
                r#"
                UPDATE compliance_checks SET
                    regime = ?1, total_items = ?2, found_count = ?3,
                    clarification_count = ?4, missing_count = ?5,
                    not_applicable_count = ?6, overall_score = ?7,
                    risk_points = ?8, max_points = ?9, status = ?10,
                    document_hash = ?11, model = ?12, updated_at = ?13
                WHERE id = ?14
                "#,
                params![
                    summary.regime.as_str(),
                    summary.total as i64,
                    summary.found as i64,
                    summary.needs_clarification as i64,
                    summary.missing as i64,
                    summary.not_applicable as i64,
                    summary.overall_score as i64,
                    summary.risk.as_ref().map(|r| r.aggregate),
                    summary.risk.as_ref().map(|r| r.maximum),
                    check.status.as_str(),
                    check.document_hash,
                    check.model,
                    check.updated_at.to_rfc3339(),
                    check.id,
                ],
            )
            .context("Failed to update compliance check")?;

        if updated == 0 {
            return Err(ComplianceError::CheckNotFound(check.id.clone()).into());
        }
        Ok(())
    }

    fn delete_check(&self, id: &str) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM analysis_results WHERE check_id = ?1", params![id])
            .context("Failed to delete analysis results")?;
        let deleted = tx
            .execute("DELETE FROM compliance_checks WHERE id = ?1", params![id])
            .context("Failed to delete compliance check")?;
        tx.commit()?;

        Ok(deleted > 0)
    }

    // ==================== Results ====================

    fn replace_results(&self, check_id: &str, results: &[AnalysisResult]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        tx.execute("DELETE FROM analysis_results WHERE check_id = ?1", params![check_id])
            .context("Failed to clear analysis results")?;

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO analysis_results (
                    id, check_id, position, requirement_id, item_name, category,
                    status, coverage_score, reasoning, evidence_snippets,
                    selected_answer, manual_override, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                "#,
            )?;

            let now = Utc::now().to_rfc3339();
            for (position, result) in results.iter().enumerate() {
                let evidence = serde_json::to_string(&result.evidence_snippets)?;
                stmt.execute(params![
                    result.id,
                    check_id,
                    position as i64,
                    result.requirement_id,
                    result.item_name,
                    result.category,
                    result.status.as_str(),
                    result.coverage_score,
                    result.reasoning,
                    evidence,
                    result.selected_answer,
                    result.manual_override,
                    now,
                ])
                .with_context(|| format!("Failed to insert result for {}", result.requirement_id))?;
            }
        }

        tx.commit().context("Failed to commit analysis results")?;
        Ok(())
    }

    fn get_results(&self, check_id: &str) -> Result<Vec<AnalysisResult>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM analysis_results WHERE check_id = ?1 ORDER BY position",
            RESULT_COLUMNS
        ))?;

        let rows = stmt.query_map(params![check_id], ResultRow::from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?.into_result()?);
        }
        Ok(results)
    }

    fn get_result(&self, id: &str) -> Result<Option<AnalysisResult>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM analysis_results WHERE id = ?1", RESULT_COLUMNS),
                params![id],
                ResultRow::from_row,
            )
            .optional()
            .context("Failed to get analysis result")?;

        row.map(ResultRow::into_result).transpose()
    }

    fn update_result_status(
        &self,
        id: &str,
        status: ComplianceStatus,
        coverage_score: f64,
        selected_answer: Option<&str>,
    ) -> Result<bool> {
        let updated = self
            .conn
            .execute(
                r#"
                UPDATE analysis_results
                SET status = ?1, coverage_score = ?2, selected_answer = ?3,
                    manual_override = 1, updated_at = ?4
                WHERE id = ?5
                "#,
                params![status.as_str(), coverage_score, selected_answer, Utc::now().to_rfc3339(), id],
            )
            .context("Failed to update result status")?;

        Ok(updated > 0)
    }
}

/// Database statistics
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStats {
    pub documents: usize,
    pub chunks: usize,
    pub templates: usize,
    pub checks: usize,
    pub results: usize,
}

// Internal row types for database mapping

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp in database: {}", value))
}

struct DocumentRow {
    id: String,
    name: String,
    source: String,
    mime_type: String,
    content_hash: Option<String>,
    created_at: String,
    updated_at: String,
}

impl DocumentRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            source: row.get(2)?,
            mime_type: row.get(3)?,
            content_hash: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn into_record(self) -> Result<DocumentRecord> {
        let kind = SourceKind::from_mime_type(&self.mime_type)
            .with_context(|| format!("Unknown document type: {}", self.mime_type))?;

        Ok(DocumentRecord {
            id: self.id,
            name: self.name,
            source: self.source,
            kind,
            content_hash: self.content_hash,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

struct TemplateRow {
    id: String,
    name: String,
    description: Option<String>,
    regime: String,
}

impl TemplateRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            regime: row.get(3)?,
        })
    }
}

struct CheckRow {
    id: String,
    document_id: String,
    template_id: String,
    version: i64,
    regime: String,
    total_items: i64,
    found_count: i64,
    clarification_count: i64,
    missing_count: i64,
    not_applicable_count: i64,
    overall_score: i64,
    risk_points: Option<f64>,
    max_points: Option<f64>,
    status: String,
    document_hash: Option<String>,
    model: Option<String>,
    created_at: String,
    updated_at: String,
}

impl CheckRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            document_id: row.get(1)?,
            template_id: row.get(2)?,
            version: row.get(3)?,
            regime: row.get(4)?,
            total_items: row.get(5)?,
            found_count: row.get(6)?,
            clarification_count: row.get(7)?,
            missing_count: row.get(8)?,
            not_applicable_count: row.get(9)?,
            overall_score: row.get(10)?,
            risk_points: row.get(11)?,
            max_points: row.get(12)?,
            status: row.get(13)?,
            document_hash: row.get(14)?,
            model: row.get(15)?,
            created_at: row.get(16)?,
            updated_at: row.get(17)?,
        })
    }

    fn into_record(self) -> Result<CheckRecord> {
        let regime = ScoringRegime::parse(&self.regime)
            .with_context(|| format!("Unknown scoring regime: {}", self.regime))?;
        let status = CheckStatus::parse(&self.status)
            .with_context(|| format!("Unknown check status: {}", self.status))?;

        let risk = match (self.risk_points, self.max_points) {
            (Some(aggregate), Some(maximum)) => Some(RiskScore {
                aggregate,
                maximum,
                percentage: self.overall_score as u32,
            }),
            _ => None,
        };

        Ok(CheckRecord {
            id: self.id,
            document_id: self.document_id,
            template_id: self.template_id,
            version: self.version as u32,
            summary: Summary {
                regime,
                total: self.total_items as usize,
                found: self.found_count as usize,
                needs_clarification: self.clarification_count as usize,
                missing: self.missing_count as usize,
                not_applicable: self.not_applicable_count as usize,
                overall_score: self.overall_score as u32,
                risk,
            },
            status,
            document_hash: self.document_hash,
            model: self.model,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

struct ResultRow {
    id: String,
    check_id: String,
    requirement_id: String,
    item_name: String,
    category: String,
    status: String,
    coverage_score: f64,
    reasoning: String,
    evidence_snippets: String,
    selected_answer: Option<String>,
    manual_override: bool,
}

impl ResultRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            check_id: row.get(1)?,
            requirement_id: row.get(2)?,
            item_name: row.get(3)?,
            category: row.get(4)?,
            status: row.get(5)?,
            coverage_score: row.get(6)?,
            reasoning: row.get(7)?,
            evidence_snippets: row.get(8)?,
            selected_answer: row.get(9)?,
            manual_override: row.get(10)?,
        })
    }

    fn into_result(self) -> Result<AnalysisResult> {
        let status = ComplianceStatus::parse(&self.status)
            .with_context(|| format!("Unknown result status: {}", self.status))?;
        let evidence_snippets: Vec<String> = serde_json::from_str(&self.evidence_snippets)?;

        Ok(AnalysisResult {
            id: self.id,
            check_id: Some(self.check_id),
            requirement_id: self.requirement_id,
            item_name: self.item_name,
            category: self.category,
            status,
            coverage_score: self.coverage_score,
            reasoning: self.reasoning,
            evidence_snippets,
            selected_answer: self.selected_answer,
            manual_override: self.manual_override,
        })
    }
}
