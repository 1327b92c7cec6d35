#![deny(missing_docs)]

//! Grounded question-answer dataset curation.
//!
//! Stage one turns annotated chunk files into QA candidates with a local language model and a
//! vector index; stage two filters, deduplicates, and versions those candidates into an
//! instruction-tuning dataset, optionally sharded across independent processes.

/// Candidate model, validation, quotas, resumable output, and the generation service.
pub mod candidates;
/// Chunk file loading.
pub mod chunks;
/// Typed configuration for both stages.
pub mod config;
/// Context group assembly around anchor chunks.
pub mod context;
/// Dataset finalization: filters, dedup, sharding, reduce, versioning.
pub mod dataset;
/// Hashing and timestamp helpers.
pub mod digest;
/// JSON Lines reading and writing.
pub mod jsonl;
/// Language-model client and the two-pass protocol.
pub mod llm;
/// Structured logging and tracing setup.
pub mod logging;
/// Generation run counters.
pub mod metrics;
/// Vector neighbor retrieval.
pub mod retrieval;
