//! Model Context Protocol (MCP) integration for doctoknow.
//!
//! This module exposes the job and query services to editors and agent hosts over stdio. The
//! surface area consists of:
//!
//! - Tools: `ask`, `start-query`, `poll-query`, `create-job`, `job-status`, and `metrics`.
//! - Resources: `mcp://agent-types`, `mcp://usage`, and a templated `mcp://jobs/{folder_path}`
//!   listing the jobs that targeted a folder.

mod format;
pub mod handlers;
mod registry;
mod schemas;
mod server;

pub use server::DoctoknowMcpServer;
