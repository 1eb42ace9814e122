use std::path::PathBuf;
use std::sync::Arc;

use agentshield_mcp::audit::{AuditEntry, AuditLog};
use agentshield_mcp::config;
use agentshield_mcp::handler::MessageHandler;
use agentshield_mcp::http_proxy::{self, HttpProxyConfig};
use agentshield_mcp::policy::McpPolicy;
use agentshield_mcp::stdio_proxy;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "agentshield-mcp", version, about = "Transparent security mediator for MCP tool-call traffic")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run as a stdio proxy, spawning the real MCP server as a child process
    Stdio {
        #[arg(long)]
        policy: PathBuf,
        #[arg(long = "pack")]
        packs: Vec<PathBuf>,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command_and_args: Vec<String>,
    },
    /// Run as a Streamable HTTP reverse proxy in front of an upstream MCP server
    HttpProxy {
        #[arg(long)]
        policy: PathBuf,
        #[arg(long = "pack")]
        packs: Vec<PathBuf>,
        #[arg(long)]
        upstream: String,
        #[arg(long, default_value = "127.0.0.1:0")]
        listen: String,
    },
    /// Policy file tooling
    Policy {
        #[command(subcommand)]
        action: PolicyAction,
    },
}

#[derive(Subcommand)]
enum PolicyAction {
    /// Load and compile a policy file (plus packs), reporting any errors
    Validate {
        policy: PathBuf,
        #[arg(long = "pack")]
        packs: Vec<PathBuf>,
    },
    /// Print the JSON Schema for the policy file format
    Schema,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agentshield_mcp=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Stdio {
            policy,
            packs,
            command_and_args,
        } => {
            let handler = Arc::new(build_handler(&policy, &packs, ProxyMode::Stdio)?);
            let (command, args) = command_and_args
                .split_first()
                .ok_or_else(|| anyhow::anyhow!("no command given to run as the upstream MCP server"))?;
            tracing::info!(target: "agentshield_mcp::stdio", "[AgentShield MCP] starting stdio proxy for {command}");
            stdio_proxy::run(
                command,
                args,
                handler,
                tokio::io::stdin(),
                tokio::io::stdout(),
            )
            .await?;
        }
        Commands::HttpProxy {
            policy,
            packs,
            upstream,
            listen,
        } => {
            let handler = Arc::new(build_handler(&policy, &packs, ProxyMode::Http)?);
            let config = HttpProxyConfig {
                upstream_url: upstream,
                listen_addr: listen,
                ..Default::default()
            };
            http_proxy::serve(config, handler).await?;
        }
        Commands::Policy { action } => match action {
            PolicyAction::Validate { policy, packs } => {
                let raw = config::load_policy(policy, &packs)?;
                McpPolicy::compile(raw)?;
                println!("policy OK");
            }
            PolicyAction::Schema => {
                println!("{}", config::policy_schema());
            }
        },
    }

    Ok(())
}

/// Which transport the built handler's diagnostics should be tagged for.
/// Chooses between the `[AgentShield MCP]` and `[AgentShield MCP-HTTP]`
/// diagnostic-sink prefixes spec.md §6 requires — the `tracing` target
/// must be a literal at each call site, so the two modes are handled as
/// separate match arms rather than a runtime-formatted string.
#[derive(Clone, Copy)]
enum ProxyMode {
    Stdio,
    Http,
}

fn build_handler(policy_path: &PathBuf, packs: &[PathBuf], mode: ProxyMode) -> anyhow::Result<MessageHandler> {
    let raw = config::load_policy(policy_path.clone(), packs)?;
    let policy = McpPolicy::compile(raw)?;
    let log = Arc::new(std::sync::Mutex::new(AuditLog::new()));
    let sink = AuditLog::into_sink(Arc::clone(&log));
    let audit: agentshield_mcp::audit::AuditSink = Box::new(move |entry: AuditEntry| {
        match mode {
            ProxyMode::Stdio => {
                if entry.flagged {
                    tracing::warn!(
                        target: "agentshield_mcp::stdio",
                        tool = %entry.tool_name,
                        decision = ?entry.decision,
                        reasons = ?entry.reasons,
                        "[AgentShield MCP] flagged call"
                    );
                } else {
                    tracing::info!(target: "agentshield_mcp::stdio", tool = %entry.tool_name, "[AgentShield MCP] allowed call");
                }
            }
            ProxyMode::Http => {
                if entry.flagged {
                    tracing::warn!(
                        target: "agentshield_mcp::http",
                        tool = %entry.tool_name,
                        decision = ?entry.decision,
                        reasons = ?entry.reasons,
                        "[AgentShield MCP-HTTP] flagged call"
                    );
                } else {
                    tracing::info!(target: "agentshield_mcp::http", tool = %entry.tool_name, "[AgentShield MCP-HTTP] allowed call");
                }
            }
        }
        sink(entry);
    });
    Ok(MessageHandler::new(policy, audit))
}
