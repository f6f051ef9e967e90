//! MCP server entrypoint (stdio transport).
//!
//! Exposes the doctoknow job and query tools over stdio for editor and agent integrations. It
//! shares all runtime configuration with the HTTP binary and runs the same background workers, so
//! jobs created here are processed in this process.
use anyhow::{Context, Result};
use doctoknow::{app::AppState, config, logging, mcp::DoctoknowMcpServer};
use rmcp::{service::ServiceExt, transport::stdio};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::init_config().context("failed to load configuration")?;
    logging::init_tracing();

    let (state, workers) = AppState::from_config(config)
        .await
        .context("failed to assemble services")?;
    let _handles = workers.spawn();
    let server = DoctoknowMcpServer::new(state);

    let service = server
        .serve(stdio())
        .await
        .context("failed to start MCP server over stdio")?;

    service
        .waiting()
        .await
        .context("MCP server terminated unexpectedly")?;

    Ok(())
}
