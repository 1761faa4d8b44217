//! Command-line interface.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::config::Settings;
use crate::llm::OllamaCompleter;
use crate::ocr::HttpOcrReader;
use crate::pdf::{PageRasterizer, PopplerRasterizer};
use crate::pipeline::Pipeline;
use crate::repository::{run_migrations, DieselStatementRepository, SqlitePool};

/// Bank statement extraction and processing service.
#[derive(Debug, Parser)]
#[command(name = "stmt", version, about)]
pub struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a TOML configuration file.
    #[arg(short, long, global = true, env = "STMT_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP server.
    Serve {
        /// Address to bind.
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run the extraction pipeline once against a local PDF and print the
    /// result envelope as JSON. No job row is created.
    Process {
        /// Path to the PDF to process.
        file: PathBuf,
    },
    /// Print statement counts per state.
    Status,
}

/// Dispatch the parsed command.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Command::Serve { host, port } => {
            let host = host.unwrap_or_else(|| settings.server.host.clone());
            let port = port.unwrap_or(settings.server.port);
            crate::server::serve(&settings, &host, port).await
        }
        Command::Process { file } => process_once(&settings, &file).await,
        Command::Status => print_status(&settings).await,
    }
}

async fn process_once(settings: &Settings, file: &std::path::Path) -> anyhow::Result<()> {
    for (tool, available) in PopplerRasterizer::check_tools() {
        if !available {
            anyhow::bail!("required tool not found on PATH: {}", tool);
        }
    }

    let rasterizer: Arc<dyn PageRasterizer> = Arc::new(PopplerRasterizer::new(settings.pdf.dpi));
    let ocr = Arc::new(HttpOcrReader::new(settings.ocr.clone())?);
    let completer = Arc::new(OllamaCompleter::new(settings.llm.clone())?);
    let pipeline = Pipeline::new(settings, rasterizer, ocr, completer);

    let work_dir = tempfile::tempdir()?;
    let outcome = pipeline.run(file, work_dir.path()).await;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if outcome.success {
        Ok(())
    } else {
        anyhow::bail!("pipeline failed: {}", outcome.errors.join("; "))
    }
}

async fn print_status(settings: &Settings) -> anyhow::Result<()> {
    run_migrations(&settings.storage.database_url).await?;
    let repo = DieselStatementRepository::new(SqlitePool::new(&settings.storage.database_url));

    let counts = repo.counts_by_status().await?;
    if counts.is_empty() {
        println!("No statements.");
        return Ok(());
    }
    for (status, count) in counts {
        println!("{:<12} {}", status, count);
    }
    Ok(())
}
