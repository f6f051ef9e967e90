//! MCP server bootstrap and request dispatch.

use std::{borrow::Cow, sync::Arc};

use crate::{
    app::AppState,
    mcp::{
        format::{agent_types_payload, json_resource_contents, serialize_json},
        handlers::{
            job_error,
            jobs::{handle_create_job, handle_job_status},
            metrics::handle_metrics,
            query::{handle_ask, handle_poll_query, handle_start_query},
        },
        registry, schemas,
    },
};
use rmcp::{
    ErrorData as McpError,
    handler::server::ServerHandler,
    model::{
        AnnotateAble, CallToolRequestParam, CallToolResult, ListResourceTemplatesResult,
        ListResourcesResult, ListToolsResult, RawResource, RawResourceTemplate,
        ReadResourceRequestParam, ReadResourceResult, Resource, ResourceTemplate,
        ServerCapabilities, ServerInfo, Tool, ToolAnnotations,
    },
};
use serde_json::json;

const AGENT_TYPES_URI: &str = "mcp://agent-types";
const USAGE_URI: &str = "mcp://usage";
const FOLDER_JOBS_TEMPLATE_URI: &str = "mcp://jobs/{folder_path}";
const FOLDER_JOBS_PREFIX: &str = "mcp://jobs/";

/// MCP server exposing the doctoknow job and query services.
#[derive(Clone)]
pub struct DoctoknowMcpServer {
    state: AppState,
    registry: Arc<registry::Registry>,
}

impl DoctoknowMcpServer {
    /// Create a new MCP server over the assembled services.
    pub fn new(state: AppState) -> Self {
        let mut registry = registry::Registry::new();
        registry.register_resource(AGENT_TYPES_URI, resource_agent_types);
        registry.register_resource(USAGE_URI, resource_usage);
        registry.register_template(FOLDER_JOBS_PREFIX, resource_folder_jobs);

        registry.register_tool("ask", tool_ask);
        registry.register_tool("start-query", tool_start_query);
        registry.register_tool("poll-query", tool_poll_query);
        registry.register_tool("create-job", tool_create_job);
        registry.register_tool("job-status", tool_job_status);
        registry.register_tool("metrics", tool_metrics);

        Self {
            state,
            registry: Arc::new(registry),
        }
    }

    fn describe_tools(&self) -> Vec<Tool> {
        let query_schema = Arc::new(schemas::query_input_schema());
        vec![
            Tool {
                name: Cow::Borrowed("ask"),
                title: Some("Ask Documents".to_string()),
                description: Some(Cow::Borrowed(
                    "Answer a question from the knowledge of the selected folders and jobs, with cited source documents.",
                )),
                input_schema: query_schema.clone(),
                output_schema: None,
                annotations: Some(
                    ToolAnnotations::with_title("Ask Documents")
                        .read_only(false)
                        .idempotent(false)
                        .open_world(true),
                ),
                icons: None,
            },
            Tool {
                name: Cow::Borrowed("start-query"),
                title: Some("Start Query".to_string()),
                description: Some(Cow::Borrowed(
                    "Start a long-running question in the background; poll it with poll-query.",
                )),
                input_schema: query_schema,
                output_schema: None,
                annotations: Some(
                    ToolAnnotations::with_title("Start Query")
                        .idempotent(false)
                        .open_world(true),
                ),
                icons: None,
            },
            Tool {
                name: Cow::Borrowed("poll-query"),
                title: Some("Poll Query".to_string()),
                description: Some(Cow::Borrowed(
                    "Check a background query; completed answers carry fresh document links.",
                )),
                input_schema: Arc::new(schemas::poll_query_input_schema()),
                output_schema: None,
                annotations: Some(
                    ToolAnnotations::with_title("Poll Query")
                        .read_only(true)
                        .idempotent(true)
                        .open_world(false),
                ),
                icons: None,
            },
            Tool {
                name: Cow::Borrowed("create-job"),
                title: Some("Create Processing Job".to_string()),
                description: Some(Cow::Borrowed(
                    "Transcribe and extract knowledge from every PDF in a leaf folder, or index them as-is with direct_pdf.",
                )),
                input_schema: Arc::new(schemas::create_job_input_schema()),
                output_schema: None,
                annotations: Some(
                    ToolAnnotations::with_title("Create Processing Job")
                        .destructive(false)
                        .idempotent(false)
                        .open_world(true),
                ),
                icons: None,
            },
            Tool {
                name: Cow::Borrowed("job-status"),
                title: Some("Job Status".to_string()),
                description: Some(Cow::Borrowed(
                    "List per-file progress of a job and its index sync state.",
                )),
                input_schema: Arc::new(schemas::job_status_input_schema()),
                output_schema: None,
                annotations: Some(
                    ToolAnnotations::with_title("Job Status")
                        .read_only(true)
                        .idempotent(true)
                        .open_world(false),
                ),
                icons: None,
            },
            Tool {
                name: Cow::Borrowed("metrics"),
                title: Some("Metrics Snapshot".to_string()),
                description: Some(Cow::Borrowed(
                    "Check processed files, written chunks, and answered queries at a glance.",
                )),
                input_schema: Arc::new(schemas::empty_object_schema()),
                output_schema: None,
                annotations: Some(
                    ToolAnnotations::with_title("Metrics Snapshot")
                        .read_only(true)
                        .idempotent(true)
                        .open_world(false),
                ),
                icons: None,
            },
        ]
    }

    fn describe_resources(&self) -> Vec<Resource> {
        let mut agent_types = RawResource::new(AGENT_TYPES_URI, "agent-types");
        agent_types.description =
            Some("Supported agent_type values and their chat session prefixes".into());

        let mut usage = RawResource::new(USAGE_URI, "usage");
        usage.description =
            Some("Recommended tool flow: create-job, job-status, then ask or start-query".into());

        vec![agent_types.no_annotation(), usage.no_annotation()]
    }

    fn describe_resource_templates(&self) -> Vec<ResourceTemplate> {
        let jobs_template = RawResourceTemplate {
            uri_template: FOLDER_JOBS_TEMPLATE_URI.into(),
            name: "folder-jobs".into(),
            title: Some("Folder Jobs".into()),
            description: Some(
                "Job ids that targeted a folder, newest first, plus its default job".into(),
            ),
            mime_type: Some(super::format::APPLICATION_JSON.into()),
        };

        vec![jobs_template.no_annotation()]
    }
}

fn resource_folder_jobs(
    server: &DoctoknowMcpServer,
    request: ReadResourceRequestParam,
) -> registry::ResourceFuture {
    let jobs = server.state.jobs.clone();
    Box::pin(async move {
        let uri = request.uri;
        let folder_path = uri.strip_prefix(FOLDER_JOBS_PREFIX).unwrap_or_default();
        let job_ids = jobs.job_ids(folder_path).await.map_err(job_error)?;
        let default_job = jobs.default_job(folder_path).await.map_err(job_error)?;
        let payload = json!({
            "folder_path": default_job.folder_path,
            "default_job_id": default_job.job_id,
            "job_ids": job_ids,
        });
        Ok(ReadResourceResult {
            contents: vec![json_resource_contents(&uri, serialize_json(&payload, &uri))],
        })
    })
}

fn resource_agent_types(
    _server: &DoctoknowMcpServer,
    _request: ReadResourceRequestParam,
) -> registry::ResourceFuture {
    Box::pin(async move {
        Ok(ReadResourceResult {
            contents: vec![json_resource_contents(
                AGENT_TYPES_URI,
                agent_types_payload(),
            )],
        })
    })
}

fn resource_usage(
    _server: &DoctoknowMcpServer,
    _request: ReadResourceRequestParam,
) -> registry::ResourceFuture {
    Box::pin(async move {
        let usage = json!({
            "title": "doctoknow MCP Usage",
            "policy": [
                "Jobs target leaf folders only.",
                "Wait for job-status to report every file done before querying a new job.",
                "Pass folder_default_job_ids for every folder in folder_paths.",
                "Use start-query and poll-query when answers may take longer than the client timeout.",
            ],
            "flows": [
                {
                    "name": "Process & Ask",
                    "steps": [
                        "create-job({ folder_path, transcript_prompt, knowledge_prompt })",
                        "job-status({ job_id, folder_path })",
                        "ask({ query, folder_paths, folder_default_job_ids })"
                    ]
                },
                {
                    "name": "Long Query",
                    "steps": [
                        "start-query({ query, folder_paths, folder_default_job_ids })",
                        "poll-query({ query_id })"
                    ]
                }
            ]
        });
        Ok(ReadResourceResult {
            contents: vec![json_resource_contents(
                USAGE_URI,
                serialize_json(&usage, USAGE_URI),
            )],
        })
    })
}

fn tool_ask(server: &DoctoknowMcpServer, request: CallToolRequestParam) -> registry::ToolFuture {
    let queries = server.state.queries.clone();
    Box::pin(async move { handle_ask(&queries, request.arguments).await })
}

fn tool_start_query(
    server: &DoctoknowMcpServer,
    request: CallToolRequestParam,
) -> registry::ToolFuture {
    let queries = server.state.queries.clone();
    Box::pin(async move { handle_start_query(&queries, request.arguments).await })
}

fn tool_poll_query(
    server: &DoctoknowMcpServer,
    request: CallToolRequestParam,
) -> registry::ToolFuture {
    let queries = server.state.queries.clone();
    Box::pin(async move { handle_poll_query(&queries, request.arguments).await })
}

fn tool_create_job(
    server: &DoctoknowMcpServer,
    request: CallToolRequestParam,
) -> registry::ToolFuture {
    let jobs = server.state.jobs.clone();
    Box::pin(async move { handle_create_job(&jobs, request.arguments).await })
}

fn tool_job_status(
    server: &DoctoknowMcpServer,
    request: CallToolRequestParam,
) -> registry::ToolFuture {
    let jobs = server.state.jobs.clone();
    Box::pin(async move { handle_job_status(&jobs, request.arguments).await })
}

fn tool_metrics(
    server: &DoctoknowMcpServer,
    _request: CallToolRequestParam,
) -> registry::ToolFuture {
    let metrics = server.state.metrics.clone();
    Box::pin(async move { handle_metrics(&metrics).await })
}

impl ServerHandler for DoctoknowMcpServer {
    fn get_info(&self) -> ServerInfo {
        let mut implementation = rmcp::model::Implementation::from_build_env();
        implementation.name = "doctoknow".to_string();
        implementation.title = Some("doctoknow MCP".to_string());
        implementation.version = env!("CARGO_PKG_VERSION").to_string();

        ServerInfo {
            capabilities: ServerCapabilities::builder()
                .enable_resources()
                .enable_tools()
                .build(),
            server_info: implementation,
            instructions: Some(
                "Use this server to turn folders of PDF documents into searchable knowledge and to ask questions answered with cited source documents.".into(),
            ),
            ..ServerInfo::default()
        }
    }

    fn list_resources(
        &self,
        _request: Option<rmcp::model::PaginatedRequestParam>,
        _context: rmcp::service::RequestContext<rmcp::service::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListResourcesResult, McpError>> + Send + '_ {
        let resources = self.describe_resources();
        std::future::ready(Ok(ListResourcesResult::with_all_items(resources)))
    }

    fn list_resource_templates(
        &self,
        _request: Option<rmcp::model::PaginatedRequestParam>,
        _context: rmcp::service::RequestContext<rmcp::service::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListResourceTemplatesResult, McpError>> + Send + '_
    {
        let templates = self.describe_resource_templates();
        std::future::ready(Ok(ListResourceTemplatesResult::with_all_items(templates)))
    }

    fn list_tools(
        &self,
        _request: Option<rmcp::model::PaginatedRequestParam>,
        _context: rmcp::service::RequestContext<rmcp::service::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        let tools = self.describe_tools();
        std::future::ready(Ok(ListToolsResult::with_all_items(tools)))
    }

    fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: rmcp::service::RequestContext<rmcp::service::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ReadResourceResult, McpError>> + Send + '_ {
        async move {
            if let Some(handler) = self.registry.resource(&request.uri) {
                return handler(self, request).await;
            }

            Err(McpError::invalid_params(
                format!("Unknown resource URI: {}", request.uri),
                None,
            ))
        }
    }

    #[allow(clippy::manual_async_fn)]
    fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: rmcp::service::RequestContext<rmcp::service::RoleServer>,
    ) -> impl std::future::Future<Output = Result<CallToolResult, McpError>> + Send + '_ {
        async move {
            if let Some(handler) = self.registry.tool(request.name.as_ref()) {
                return handler(self, request).await;
            }

            Err(McpError::invalid_params(
                format!("Unknown tool: {}", request.name),
                None,
            ))
        }
    }
}
