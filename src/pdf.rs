//! PDF rasterization using pdftoppm and pdfinfo.

use std::path::{Path, PathBuf};
use std::process::Command;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur during rasterization.
#[derive(Debug, Error)]
pub enum RasterizeError {
    #[error("External tool not found: {0}")]
    ToolNotFound(String),

    #[error("Rasterization failed: {0}")]
    RenderFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Document metadata read without a full render.
#[derive(Debug, Clone, Default)]
pub struct PdfMetadata {
    pub page_count: u32,
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub keywords: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub creation_date: Option<String>,
    pub mod_date: Option<String>,
}

/// Converts a PDF into one image per page for downstream OCR.
///
/// Rasterization is atomic: a page that fails to render fails the whole call.
#[async_trait]
pub trait PageRasterizer: Send + Sync {
    /// Render every page into `out_dir` at the configured DPI.
    /// Returns the image paths in page order; always at least one.
    async fn rasterize(&self, pdf_path: &Path, out_dir: &Path)
        -> Result<Vec<PathBuf>, RasterizeError>;

    /// Read document metadata without rendering.
    async fn metadata(&self, pdf_path: &Path) -> Result<PdfMetadata, RasterizeError>;

    /// Remove rendered page images (called once per run when cleanup is on).
    fn cleanup(&self, image_paths: &[PathBuf]) {
        for path in image_paths {
            if let Err(e) = std::fs::remove_file(path) {
                warn!("Failed to delete {}: {}", path.display(), e);
            }
        }
        if let Some(parent) = image_paths.first().and_then(|p| p.parent()) {
            // Drop the per-run directory if nothing else is in it.
            let _ = std::fs::remove_dir(parent);
        }
    }
}

/// Poppler-backed rasterizer shelling out to `pdftoppm` / `pdfinfo`.
pub struct PopplerRasterizer {
    dpi: u32,
}

impl PopplerRasterizer {
    pub fn new(dpi: u32) -> Self {
        Self { dpi }
    }

    /// Check that the required poppler binaries are on PATH.
    pub fn check_tools() -> Vec<(String, bool)> {
        ["pdftoppm", "pdfinfo"]
            .iter()
            .map(|tool| (tool.to_string(), which::which(tool).is_ok()))
            .collect()
    }

    /// Find the image file for a specific page number.
    ///
    /// pdftoppm pads page numbers to the width of the page count:
    /// page-01.png for short documents, page-001.png for longer ones.
    fn find_page_image(out_dir: &Path, page_num: u32) -> Option<PathBuf> {
        for digits in [1, 2, 3, 4] {
            let filename = format!("page-{:0width$}.png", page_num, width = digits);
            let path = out_dir.join(&filename);
            if path.exists() {
                return Some(path);
            }
        }
        None
    }
}

#[async_trait]
impl PageRasterizer for PopplerRasterizer {
    async fn rasterize(
        &self,
        pdf_path: &Path,
        out_dir: &Path,
    ) -> Result<Vec<PathBuf>, RasterizeError> {
        std::fs::create_dir_all(out_dir)?;

        let meta = self.metadata(pdf_path).await?;
        let page_count = meta.page_count.max(1);

        let pdf_path = pdf_path.to_path_buf();
        let out_dir = out_dir.to_path_buf();
        let dpi = self.dpi;

        // pdftoppm is CPU-bound; keep it off the async workers.
        tokio::task::spawn_blocking(move || {
            let status = Command::new("pdftoppm")
                .args(["-png", "-r", &dpi.to_string()])
                .arg(&pdf_path)
                .arg(out_dir.join("page"))
                .status();

            check_cmd_status(
                status,
                "pdftoppm (install poppler-utils)",
                "pdftoppm failed to convert PDF",
            )?;

            let mut images = Vec::with_capacity(page_count as usize);
            for page_num in 1..=page_count {
                match Self::find_page_image(&out_dir, page_num) {
                    Some(path) => images.push(path),
                    None => {
                        return Err(RasterizeError::RenderFailed(format!(
                            "No image generated for page {}",
                            page_num
                        )))
                    }
                }
            }

            debug!("Rasterized {} pages at {} DPI", images.len(), dpi);
            Ok(images)
        })
        .await
        .map_err(|e| RasterizeError::RenderFailed(e.to_string()))?
    }

    async fn metadata(&self, pdf_path: &Path) -> Result<PdfMetadata, RasterizeError> {
        let pdf_path = pdf_path.to_path_buf();

        tokio::task::spawn_blocking(move || {
            let output = Command::new("pdfinfo").arg(&pdf_path).output();
            let stdout = handle_cmd_output(
                output,
                "pdfinfo (install poppler-utils)",
                "pdfinfo failed",
            )?;

            let mut meta = PdfMetadata::default();
            for line in stdout.lines() {
                let Some((key, value)) = line.split_once(':') else {
                    continue;
                };
                let value = value.trim();
                if value.is_empty() {
                    continue;
                }
                match key.trim() {
                    "Pages" => meta.page_count = value.parse().unwrap_or(0),
                    "Title" => meta.title = Some(value.to_string()),
                    "Author" => meta.author = Some(value.to_string()),
                    "Subject" => meta.subject = Some(value.to_string()),
                    "Keywords" => meta.keywords = Some(value.to_string()),
                    "Creator" => meta.creator = Some(value.to_string()),
                    "Producer" => meta.producer = Some(value.to_string()),
                    "CreationDate" => meta.creation_date = Some(value.to_string()),
                    "ModDate" => meta.mod_date = Some(value.to_string()),
                    _ => {}
                }
            }

            if meta.page_count == 0 {
                return Err(RasterizeError::RenderFailed(
                    "PDF reports zero pages".to_string(),
                ));
            }

            Ok(meta)
        })
        .await
        .map_err(|e| RasterizeError::RenderFailed(e.to_string()))?
    }
}

/// Handle command output, extracting stdout on success or returning an error.
fn handle_cmd_output(
    result: std::io::Result<std::process::Output>,
    tool_name: &str,
    error_prefix: &str,
) -> Result<String, RasterizeError> {
    match result {
        Ok(output) => {
            if output.status.success() {
                Ok(String::from_utf8_lossy(&output.stdout).to_string())
            } else {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(RasterizeError::RenderFailed(format!(
                    "{}: {}",
                    error_prefix, stderr
                )))
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(RasterizeError::ToolNotFound(tool_name.to_string()))
        }
        Err(e) => Err(RasterizeError::Io(e)),
    }
}

/// Check command status, returning an error on failure.
fn check_cmd_status(
    result: std::io::Result<std::process::ExitStatus>,
    tool_name: &str,
    error_msg: &str,
) -> Result<(), RasterizeError> {
    match result {
        Ok(s) if s.success() => Ok(()),
        Ok(_) => Err(RasterizeError::RenderFailed(error_msg.to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(RasterizeError::ToolNotFound(tool_name.to_string()))
        }
        Err(e) => Err(RasterizeError::Io(e)),
    }
}
