//! Dispatch table from tool names and resource URIs to handler functions.
//!
//! Resources resolve by exact URI first, then by template prefix: `mcp://jobs/` serves every
//! `mcp://jobs/{folder_path}` with a non-empty folder path.

use std::{collections::HashMap, future::Future, pin::Pin};

use rmcp::ErrorData as McpError;
use rmcp::model::{
    CallToolRequestParam, CallToolResult, ReadResourceRequestParam, ReadResourceResult,
};

use super::server::DoctoknowMcpServer;

pub type ResourceFuture =
    Pin<Box<dyn Future<Output = Result<ReadResourceResult, McpError>> + Send>>;
pub type ToolFuture = Pin<Box<dyn Future<Output = Result<CallToolResult, McpError>> + Send>>;

pub type ResourceHandler = fn(&DoctoknowMcpServer, ReadResourceRequestParam) -> ResourceFuture;
pub type ToolHandler = fn(&DoctoknowMcpServer, CallToolRequestParam) -> ToolFuture;

#[derive(Default)]
pub struct Registry {
    resources: HashMap<&'static str, ResourceHandler>,
    templates: Vec<(&'static str, ResourceHandler)>,
    tools: HashMap<&'static str, ToolHandler>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_resource(&mut self, uri: &'static str, handler: ResourceHandler) {
        self.resources.insert(uri, handler);
    }

    /// Serve every URI starting with `prefix`; longer prefixes win over shorter ones.
    pub fn register_template(&mut self, prefix: &'static str, handler: ResourceHandler) {
        self.templates.push((prefix, handler));
        self.templates.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()));
    }

    pub fn register_tool(&mut self, name: &'static str, handler: ToolHandler) {
        self.tools.insert(name, handler);
    }

    pub fn resource(&self, uri: &str) -> Option<ResourceHandler> {
        if let Some(handler) = self.resources.get(uri) {
            return Some(*handler);
        }
        self.templates
            .iter()
            .find(|(prefix, _)| {
                uri.strip_prefix(prefix)
                    .is_some_and(|rest| !rest.trim_matches('/').is_empty())
            })
            .map(|(_, handler)| *handler)
    }

    pub fn tool(&self, name: &str) -> Option<ToolHandler> {
        self.tools.get(name).copied()
    }
}
