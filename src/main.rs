//! micacheck - MiCA compliance checks for token documents
//!
//! Ingests white papers and project websites, then scores them against
//! requirement templates with an LLM.

use anyhow::Result;
use micacheck::cli::{self as commands, Cli, Commands, DocumentsAction, TemplatesAction, Workspace};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Setup logging; RUST_LOG wins when set
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let home = cli.home.as_path();

    if let Commands::Init(args) = &cli.command {
        return commands::init(home, args.force);
    }

    let ws = Workspace::open(home, cli.config.as_deref(), cli.api_key.as_deref())?;
    let format = cli.format;

    // Execute command
    match cli.command {
        // Runs before a workspace exists
        Commands::Init(_) => {}

        Commands::Ingest(args) => {
            commands::ingest(&ws, &args, format).await?;
        }

        Commands::Documents(args) => match args.action {
            DocumentsAction::List => commands::list_documents(&ws, format)?,
            DocumentsAction::Rm { document_id } => commands::remove_document(&ws, &document_id)?,
        },

        Commands::Chunks(args) => {
            commands::show_chunks(&ws, &args.document_id, args.limit, format)?;
        }

        Commands::Templates(args) => match args.action {
            TemplatesAction::List => commands::list_templates(&ws, format)?,
            TemplatesAction::Show { template_id } => commands::show_template(&ws, &template_id, format)?,
            TemplatesAction::Import { path } => commands::import_template(&ws, &path)?,
        },

        Commands::Analyze(args) => {
            commands::analyze(&ws, &args, format).await?;
        }

        Commands::Versions(args) => {
            commands::list_versions(&ws, &args.document_id, &args.template_id, format)?;
        }

        Commands::Show(args) => {
            commands::show_check(&ws, &args.check_id, args.detailed, format)?;
        }

        Commands::Delete(args) => {
            commands::delete_check(&ws, &args.check_id)?;
        }

        Commands::Override(args) => {
            commands::override_result(&ws, &args, format)?;
        }

        Commands::Status(args) => {
            commands::status(&ws, args.check_llm, format).await?;
        }
    }

    Ok(())
}
