//! # grounded core
//!
//! Runtime-free building blocks for the grounded RAG service: data models,
//! the error taxonomy, the sentence-aware chunker, the document lifecycle
//! state machine, collaborator traits (embedder, vector index, generator),
//! and query-time context assembly.
//!
//! This crate contains no tokio, sqlx, filesystem, or network I/O. The
//! `grounded` app crate supplies the concrete providers and storage.

pub mod chunk;
pub mod context;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod index;
pub mod models;
pub mod prompt;
pub mod status;

pub use error::{ErrorKind, RagError};
