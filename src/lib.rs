//! # docrag: local document question answering
//!
//! Extracts text from uploaded documents, splits and embeds it into a
//! persistent vector collection, and answers questions from the retrieved
//! passages through a pluggable response generator.
//!
//! ## Architecture
//!
//! - **[`config`]**: YAML configuration loading, validation and the active-model write
//! - **[`extractor`]**: Plain text from PDF, Word, spreadsheet, slide deck and text files
//! - **[`chunker`]**: Recursive, boundary-preferring text splitter with overlap
//! - **[`embedder`]**: Text embedding via ONNX Runtime (or a deterministic mock)
//! - **[`store`]**: SQLite + sqlite-vec vector collections
//! - **[`index`]**: Add / search / delete / stats over one collection
//! - **[`generator`]**: Template, hosted (Gemini) and local (Ollama) providers with fallback
//! - **[`models`]**: Local model install, removal and activation
//! - **[`service`]**: Chat turns, ingestion and generator rebuilds

pub mod chunker;
pub mod config;
pub mod embedder;
pub mod extractor;
pub mod generator;
pub mod index;
pub mod models;
pub mod service;
pub mod store;
