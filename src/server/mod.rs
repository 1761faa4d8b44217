//! Web server exposing the statement processing API.
//!
//! Handlers stay thin: every operation goes through the shared
//! [`JobController`], which owns validation, background scheduling, and
//! persistence.

mod handlers;
mod routes;

pub use routes::create_router;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::Settings;
use crate::jobs::JobController;
use crate::llm::OllamaCompleter;
use crate::ocr::HttpOcrReader;
use crate::pdf::PopplerRasterizer;
use crate::repository::{self, DieselStatementRepository, SqlitePool};
use crate::storage::BlobStore;

/// Shared state for the web server.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<JobController>,
    pub max_upload_size: u64,
}

impl AppState {
    pub fn new(controller: Arc<JobController>, max_upload_size: u64) -> Self {
        Self {
            controller,
            max_upload_size,
        }
    }
}

/// Build the production controller from settings.
pub fn build_controller(settings: &Settings) -> anyhow::Result<Arc<JobController>> {
    let pool = SqlitePool::new(&settings.storage.database_url);
    let repo = DieselStatementRepository::new(pool);
    let blobs = BlobStore::new(&settings.storage.upload_dir)?;
    let rasterizer = Arc::new(PopplerRasterizer::new(settings.pdf.dpi));
    let ocr = Arc::new(HttpOcrReader::new(settings.ocr.clone())?);
    let completer = Arc::new(OllamaCompleter::new(settings.llm.clone())?);

    Ok(Arc::new(JobController::new(
        settings.clone(),
        repo,
        blobs,
        rasterizer,
        ocr,
        completer,
    )))
}

/// Start the web server: migrations, crash-recovery sweep, then serve.
pub async fn serve(settings: &Settings, host: &str, port: u16) -> anyhow::Result<()> {
    repository::run_migrations(&settings.storage.database_url).await?;

    let controller = build_controller(settings)?;
    controller.recover_interrupted().await?;

    let state = AppState::new(controller, settings.storage.max_upload_size);
    let app = create_router(state, &settings.server.cors_origins);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Starting server at http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
