//! # grounded
//!
//! Question answering over your own documents, with the answer's evidence
//! made explicit.
//!
//! Uploaded PDF, DOCX, and text files are extracted, chunked, embedded, and
//! stored in a vector index. A question is embedded, matched against the
//! index, and answered by a chat model under one of two system prompts:
//! a strict one when the best match clears the confidence threshold, a
//! permissive one that must disclose the weak evidence otherwise.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌──────────────────┐
//! │  Upload  │──▶│ Ingest queue │──▶│ Chunk → Embed →  │
//! │ extract  │   │  (workers)   │   │ Vector index     │
//! └──────────┘   └─────────────┘   └────────┬─────────┘
//!                                           │
//!                      ┌────────────────────┤
//!                      ▼                    ▼
//!                 ┌──────────┐        ┌──────────┐
//!                 │   CLI    │        │   HTTP   │
//!                 │(grounded)│        │  (axum)  │
//!                 └──────────┘        └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! grounded init                          # create database
//! grounded ingest handbook.pdf --wait    # upload and embed a document
//! grounded query "What is the leave policy?"
//! grounded serve                         # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`app`] | Service wiring shared by CLI and server |
//! | [`commands`] | CLI command implementations |
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`repository`] | Document and chunk persistence |
//! | [`extract`] | PDF / DOCX / text extraction |
//! | [`embedding`] | Embedding providers and the retrying gateway |
//! | [`vector_store`] | SQLite, in-memory, and Qdrant vector indexes |
//! | [`generation`] | Chat-completion providers |
//! | [`ingest`] | Ingestion pipeline and worker queue |
//! | [`upload`] | Upload validation and extraction |
//! | [`rag`] | Retrieval-augmented answering |
//! | [`server`] | HTTP API |
//! | [`progress`] | CLI ingestion progress |
//! | [`logging`] | `tracing` subscriber setup |
//!
//! Runtime-free types and algorithms (chunking, status transitions, context
//! assembly, provider traits) live in the `grounded-core` crate.

pub mod app;
pub mod commands;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod generation;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod progress;
pub mod rag;
pub mod repository;
pub mod server;
pub mod upload;
pub mod vector_store;

pub use grounded_core::{ErrorKind, RagError};
