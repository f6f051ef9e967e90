//! Knowledge extraction pipeline.
//!
//! One [`WorkItem`] describes one file of a job. It is validated into a [`PipelineCommand`] and
//! driven through [`KnowledgePipeline::process`], which updates the job ledger as the file moves
//! `queued → running → done | failed`:
//!
//! - `full`: transcribe the source document, then extract knowledge chunks from the transcript.
//! - `reknowledge`: copy an earlier job's transcript and only re-run the extraction.
//! - `direct_pdf`: copy the source document into the knowledge location untouched.

mod command;
pub mod extract;
pub mod metadata;
mod pipeline;

pub use command::{FileTarget, PipelineCommand, WorkItem};
pub use pipeline::{KnowledgePipeline, PipelineError, PipelineOutcome, PipelineSettings};
