use {
    anyhow::{Context, Result},
    clap::Subcommand,
    toolgate_gateway::McpHost,
    toolgate_mcp::ServerConfig,
};

#[derive(Subcommand)]
pub enum ServerAction {
    /// List registered MCP servers.
    List {
        /// Only servers owned by this user.
        #[arg(long)]
        user: Option<String>,
    },
}

pub fn handle_servers(host: &McpHost, action: ServerAction) -> Result<()> {
    match action {
        ServerAction::List { user } => {
            let servers = match user {
                Some(user) => host.list_servers(&user),
                None => host.servers().list(),
            };
            if servers.is_empty() {
                println!("No MCP servers registered.");
            }
            for server in &servers {
                let auth = server
                    .auth
                    .provider()
                    .map(|p| format!(" oauth:{p}"))
                    .unwrap_or_default();
                println!(
                    "  {}  {} [{}{auth}] owner={} {}",
                    server.id, server.name, server.transport, server.owner_id, server.endpoint
                );
            }
            Ok(())
        },
    }
}

fn lookup(host: &McpHost, server_id: &str) -> Result<ServerConfig> {
    host.servers()
        .get(server_id)
        .with_context(|| format!("no MCP server with id '{server_id}'"))
}

/// Discover and print a server's tools as JSON.
pub async fn handle_tools(host: &McpHost, server_id: &str, refresh: bool) -> Result<()> {
    let server = lookup(host, server_id)?;
    let tools = host
        .discover_tools(&server.owner_id, &server.id, refresh)
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;
    println!("{}", serde_json::to_string_pretty(&*tools)?);
    Ok(())
}

pub async fn handle_health(host: &McpHost, server_id: &str) -> Result<()> {
    let server = lookup(host, server_id)?;
    let result = host.check_health(&server.owner_id, &server.id).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.healthy {
        std::process::exit(1);
    }
    Ok(())
}

/// Print the intent detected for `message` against `user`'s servers.
pub fn handle_detect(host: &McpHost, user: &str, message: &str) -> Result<()> {
    match host.detect(user, message) {
        Some(intent) => println!("{}", serde_json::to_string_pretty(&intent)?),
        None => println!("null"),
    }
    Ok(())
}
