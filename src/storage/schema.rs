//! Database schema definition

/// SQL schema for the micacheck database
pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- Acquired sources (PDF files or websites)
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    source TEXT NOT NULL,
    mime_type TEXT NOT NULL,
    content_hash TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_documents_source ON documents(source);

-- Extracted text slices, replaced as a whole on re-ingestion
CREATE TABLE IF NOT EXISTS document_chunks (
    document_id TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    content TEXT NOT NULL,
    word_count INTEGER NOT NULL,
    page_number INTEGER,
    start_offset INTEGER,
    end_offset INTEGER,
    PRIMARY KEY (document_id, chunk_index),
    FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
);

-- Requirement templates
CREATE TABLE IF NOT EXISTS compliance_templates (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    regime TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS template_items (
    template_id TEXT NOT NULL,
    id TEXT NOT NULL,
    position INTEGER NOT NULL,
    category TEXT NOT NULL,
    item_name TEXT NOT NULL,
    description TEXT NOT NULL,
    weight REAL NOT NULL,
    scoring_logic TEXT NOT NULL,
    PRIMARY KEY (template_id, id),
    FOREIGN KEY (template_id) REFERENCES compliance_templates(id) ON DELETE CASCADE
);

-- One analysis run of a template over a document
CREATE TABLE IF NOT EXISTS compliance_checks (
    id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL,
    template_id TEXT NOT NULL,
    version INTEGER NOT NULL,
    regime TEXT NOT NULL,
    total_items INTEGER NOT NULL,
    found_count INTEGER NOT NULL,
    clarification_count INTEGER NOT NULL,
    missing_count INTEGER NOT NULL,
    not_applicable_count INTEGER NOT NULL,
    overall_score INTEGER NOT NULL,
    risk_points REAL,
    max_points REAL,
    status TEXT NOT NULL,
    document_hash TEXT,
    model TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    FOREIGN KEY (document_id) REFERENCES documents(id)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_checks_version
    ON compliance_checks(document_id, template_id, version);

-- Per-requirement outcomes of a check
CREATE TABLE IF NOT EXISTS analysis_results (
    id TEXT PRIMARY KEY,
    check_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    requirement_id TEXT NOT NULL,
    item_name TEXT NOT NULL,
    category TEXT NOT NULL,
    status TEXT NOT NULL,
    coverage_score REAL NOT NULL,
    reasoning TEXT NOT NULL,
    evidence_snippets TEXT NOT NULL,
    selected_answer TEXT,
    manual_override INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL,
    FOREIGN KEY (check_id) REFERENCES compliance_checks(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_results_check ON analysis_results(check_id);
"#;
