//! STDIO transport for MCP servers
//!
//! Handles connecting to MCP servers that run as child processes
//! communicating over stdin/stdout.

use std::collections::HashMap;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use mcpool_core::{McpClient, ToolInfo, ToolParams, ToolResult};
use rmcp::transport::{ConfigureCommandExt, TokioChildProcess};
use rmcp::ServiceExt;
use tokio::process::Command;
use tracing::{debug, info};

use super::session::SessionSlot;
use crate::handler::McpClientHandler;

/// Apply platform-specific child process isolation.
///
/// Windows: suppress the console window a GUI-subsystem parent would otherwise
/// allocate for every console child.
///
/// Unix: put the child in its own process group so terminal signals (SIGINT,
/// SIGTSTP) sent to the parent don't propagate to MCP servers.
pub fn configure_child_process_platform(cmd: &mut Command) {
    #[cfg(windows)]
    {
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    #[cfg(unix)]
    {
        cmd.process_group(0);
    }
}

/// Parse a command string that may contain embedded arguments.
///
/// - "docker run -i --rm image" → ("docker", ["run", "-i", "--rm", "image"])
/// - "node" with args: ["server.js"] → ("node", ["server.js"])
///
/// Embedded arguments are only split out when no separate args are given.
pub fn parse_command(command: &str, args: &[String]) -> Result<(String, Vec<String>)> {
    if !args.is_empty() {
        return Ok((command.to_string(), args.to_vec()));
    }

    if command.contains(' ') {
        let parts = shell_words::split(command)
            .context("Failed to parse command string - check for unmatched quotes")?;
        let (executable, rest) = parts
            .split_first()
            .ok_or_else(|| anyhow::anyhow!("Empty command after parsing"))?;
        Ok((executable.clone(), rest.to_vec()))
    } else {
        Ok((command.to_string(), Vec::new()))
    }
}

/// Client for a child-process MCP server
pub struct StdioClient {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    session: SessionSlot,
}

impl StdioClient {
    pub fn new(
        server_id: impl Into<String>,
        command: impl Into<String>,
        args: Vec<String>,
        env: HashMap<String, String>,
    ) -> Self {
        Self {
            command: command.into(),
            args,
            env,
            session: SessionSlot::new(server_id.into(), None),
        }
    }

    pub fn description(&self) -> String {
        format!("stdio:{}", self.command)
    }
}

#[async_trait]
impl McpClient for StdioClient {
    async fn connect(&self) -> Result<()> {
        let _connecting = self.session.lock_connect().await;
        if self.session.is_connected() {
            return Ok(());
        }

        let server_id = self.session.server_id();
        let (executable, args) = parse_command(&self.command, &self.args)?;

        let command_path = which::which(&executable)
            .or_else(|_| which::which(format!("{}.exe", executable)))
            .with_context(|| {
                format!(
                    "Command not found: {}. Ensure it's installed and in PATH.",
                    executable
                )
            })?;

        info!(
            server_id = %server_id,
            executable = %executable,
            args = ?args,
            "Connecting to STDIO server"
        );
        debug!(server_id = %server_id, path = ?command_path, "Found command");

        let env = self.env.clone();
        let transport = TokioChildProcess::new(Command::new(&command_path).configure(move |cmd| {
            cmd.args(&args)
                .envs(&env)
                .stderr(Stdio::null())
                .kill_on_drop(true);
            configure_child_process_platform(cmd);
        }))
        .with_context(|| format!("Failed to spawn child process: {}", executable))?;

        let service = McpClientHandler::new(server_id)
            .serve(transport)
            .await
            .context("MCP handshake failed")?;

        debug!(server_id = %server_id, peer_info = ?service.peer_info(), "STDIO server connected");
        self.session.install(service);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.session.close().await
    }

    fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    async fn list_tools(&self) -> Result<Vec<ToolInfo>> {
        self.session.list_tools().await
    }

    async fn call_tool(&self, name: &str, params: ToolParams) -> Result<ToolResult> {
        self.session.call_tool(name, params).await
    }

    async fn ping(&self) -> Result<()> {
        self.session.ping().await
    }
}
