//! Bank statement extraction and processing service.
//!
//! Ingests scanned bank statement PDFs and produces structured, validated
//! records: account details, statement period, balances, and an ordered
//! transaction ledger with per-field confidence scores. Processing runs as a
//! multi-stage pipeline (rasterize, OCR, cleanup, extract, normalize) driven
//! by a background job controller.

pub mod cli;
pub mod config;
pub mod jobs;
pub mod llm;
pub mod models;
pub mod ocr;
pub mod pdf;
pub mod pipeline;
pub mod repository;
pub mod schema;
pub mod server;
pub mod storage;
