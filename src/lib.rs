#![deny(missing_docs)]

//! Core library for the doctoknow knowledge pipeline and retrieval service.

/// HTTP routing and REST handlers.
pub mod api;
/// Service wiring shared by the HTTP, worker, and MCP entrypoints.
pub mod app;
/// Batch coordination for multi-file submissions.
pub mod batch;
/// Time-zone aware timestamps and job identifiers.
pub mod clock;
/// Environment-driven configuration management.
pub mod config;
/// Generation client abstraction and adapters.
pub mod generation;
/// Conversation history store and browsing helpers.
pub mod history;
/// Job creation, reknowledge requests, and status listing.
pub mod jobs;
/// Per-file knowledge extraction pipeline.
pub mod knowledge;
/// Job ledger and folder configuration records.
pub mod ledger;
/// Structured logging and tracing setup.
pub mod logging;
/// Model Context Protocol server implementation.
pub mod mcp;
/// Pipeline and query metrics helpers.
pub mod metrics;
/// Asynchronous query coordination (start, execute, poll).
pub mod query;
/// Retrieval query engine, filters, and source resolution.
pub mod retrieval;
/// Object storage, key layout, and download link signing.
pub mod storage;
/// Index synchronization trigger.
pub mod sync;
/// At-least-once task queue abstraction.
pub mod tasks;
/// Editable output-format templates per agent type.
pub mod templates;

#[cfg(test)]
mod test_support;
