//! CLI interface using clap
//!
//! Provides the command-line interface for micacheck

mod commands;

pub use commands::*;

use crate::analysis::{AnalysisMode, ComplianceStatus};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// micacheck - MiCA compliance checks for token documents
#[derive(Parser, Debug)]
#[command(name = "micacheck")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Directory holding the .micacheck workspace (defaults to current directory)
    #[arg(long, global = true, default_value = ".")]
    pub home: PathBuf,

    /// Configuration file to use instead of the workspace config
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// API key for the LLM endpoint
    #[arg(long, global = true, env = "MICACHECK_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json)
    #[arg(short = 'o', long, global = true, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the workspace, database and built-in templates
    Init(InitArgs),

    /// Acquire a PDF or website and store its chunks
    Ingest(IngestArgs),

    /// List or remove documents
    Documents(DocumentsArgs),

    /// Show the stored chunks of a document
    Chunks(ChunksArgs),

    /// List, show or import requirement templates
    Templates(TemplatesArgs),

    /// Run a template against a document
    Analyze(AnalyzeArgs),

    /// List saved versions for a document and template
    Versions(VersionsArgs),

    /// Show a saved compliance check
    Show(ShowArgs),

    /// Delete a saved compliance check
    Delete(DeleteArgs),

    /// Manually set the status of a saved result
    Override(OverrideArgs),

    /// Show workspace status
    Status(StatusArgs),
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Arguments for init command
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Force re-initialization (rewrites the config file)
    #[arg(short, long)]
    pub force: bool,
}

/// Arguments for ingest command
#[derive(Parser, Debug)]
#[command(group(clap::ArgGroup::new("source").required(true).args(["pdf", "url"])))]
pub struct IngestArgs {
    /// PDF file to ingest
    #[arg(long)]
    pub pdf: Option<PathBuf>,

    /// Website to crawl
    #[arg(long)]
    pub url: Option<String>,

    /// Display name for the document
    #[arg(short, long)]
    pub name: Option<String>,
}

/// Arguments for documents command
#[derive(Args, Debug)]
pub struct DocumentsArgs {
    #[command(subcommand)]
    pub action: DocumentsAction,
}

#[derive(Subcommand, Debug)]
pub enum DocumentsAction {
    /// List stored documents
    List,
    /// Remove a document and its chunks
    Rm {
        /// Document ID
        document_id: String,
    },
}

/// Arguments for chunks command
#[derive(Parser, Debug)]
pub struct ChunksArgs {
    /// Document ID
    pub document_id: String,

    /// Show at most this many chunks
    #[arg(short, long)]
    pub limit: Option<usize>,
}

/// Arguments for templates command
#[derive(Args, Debug)]
pub struct TemplatesArgs {
    #[command(subcommand)]
    pub action: TemplatesAction,
}

#[derive(Subcommand, Debug)]
pub enum TemplatesAction {
    /// List templates
    List,
    /// Show a template's requirements
    Show {
        /// Template ID
        template_id: String,
    },
    /// Import a template definition from a TOML file
    Import {
        /// Path to the TOML definition
        path: PathBuf,
    },
}

/// Arguments for analyze command
#[derive(Parser, Debug)]
pub struct AnalyzeArgs {
    /// Document ID
    pub document_id: String,

    /// Template ID
    pub template_id: String,

    /// Batching mode (defaults to the configured mode)
    #[arg(short, long)]
    pub mode: Option<AnalysisMode>,

    /// Only assess requirements in this category (repeatable)
    #[arg(long = "category")]
    pub categories: Vec<String>,

    /// Save the run as a compliance check
    #[arg(short, long)]
    pub save: bool,

    /// Overwrite an existing version instead of adding one
    #[arg(long, requires = "save")]
    pub overwrite: bool,

    /// Version to overwrite (defaults to the latest)
    #[arg(long, requires = "overwrite")]
    pub target_version: Option<u32>,
}

/// Arguments for versions command
#[derive(Parser, Debug)]
pub struct VersionsArgs {
    /// Document ID
    pub document_id: String,

    /// Template ID
    pub template_id: String,
}

/// Arguments for show command
#[derive(Parser, Debug)]
pub struct ShowArgs {
    /// Compliance check ID
    pub check_id: String,

    /// Include reasoning and evidence for each result
    #[arg(short, long)]
    pub detailed: bool,
}

/// Arguments for delete command
#[derive(Parser, Debug)]
pub struct DeleteArgs {
    /// Compliance check ID
    pub check_id: String,
}

/// Arguments for override command
#[derive(Parser, Debug)]
pub struct OverrideArgs {
    /// Result ID
    pub result_id: String,

    /// New status (found, needs_clarification, missing, not_applicable)
    pub status: ComplianceStatus,

    /// Explicit coverage score, or the points of a risk answer option
    #[arg(long)]
    pub score: Option<f64>,

    /// Answer option for a risk-scored requirement (e.g. "Yes")
    #[arg(long)]
    pub answer: Option<String>,
}

/// Arguments for status command
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Also check whether the LLM endpoint responds
    #[arg(long)]
    pub check_llm: bool,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
