//! Lore MCP server - a personal knowledge base for AI coding assistants.
//!
//! Tool surface over stdio JSON-RPC:
//! - kb_store / kb_store_batch: versioned entry authoring
//! - kb_search: hybrid BM25 + vector retrieval with confidence decay
//! - kb_get: full entry retrieval with access tracking
//! - kb_ask: graph traversal strategies, optionally LLM-planned
//! - kb_summarize: synthesized answers with [kb-XXXXX] citations
//! - kb_ingest: safety-gated file ingestion with LLM extraction
//! - kb_maintain: manager-gated administration

use std::io::IsTerminal;
use std::path::PathBuf;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use lore_mcp::protocol::stdio::StdioTransport;
use lore_mcp::server::McpServer;
use lore_mcp::state::AppState;

/// Parse command-line arguments. Returns the optional data directory.
/// Exits for `--help` / `--version` / unknown arguments.
fn parse_args() -> Option<PathBuf> {
    let args: Vec<String> = std::env::args().collect();
    let mut data_dir: Option<PathBuf> = None;
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                println!("Lore MCP Server v{}", env!("CARGO_PKG_VERSION"));
                println!();
                println!("Personal knowledge base server using the Model Context Protocol.");
                println!();
                println!("USAGE:");
                println!("    lore-mcp [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    -h, --help              Print help information");
                println!("    -V, --version           Print version information");
                println!("    --data-dir <PATH>       Custom data directory");
                println!();
                println!("ENVIRONMENT:");
                println!("    KB_DB_PATH              Database file (embedded backend)");
                println!("    KB_DB_URL               postgres:// URL (remote backend)");
                println!("    KB_OLLAMA_URL           Embedding / local LLM service");
                println!("    KB_EXTRACT_PROVIDER     LLM for ingestion (ollama|anthropic|none)");
                println!("    KB_QUERY_PROVIDER       LLM for planning (ollama|anthropic|none)");
                println!("    KB_MANAGER              TRUE enables kb_maintain");
                println!("    RUST_LOG                Log level filter (overrides KB_LOG_LEVEL)");
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("lore-mcp {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--data-dir" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --data-dir requires a path argument");
                    std::process::exit(1);
                }
                data_dir = Some(PathBuf::from(&args[i]));
            }
            arg if arg.starts_with("--data-dir=") => {
                let path = arg.strip_prefix("--data-dir=").unwrap_or("");
                if path.is_empty() {
                    eprintln!("error: --data-dir requires a path argument");
                    std::process::exit(1);
                }
                data_dir = Some(PathBuf::from(path));
            }
            arg => {
                eprintln!("error: unknown argument '{arg}'");
                eprintln!("Try 'lore-mcp --help' for more information.");
                std::process::exit(1);
            }
        }
        i += 1;
    }

    data_dir
}

#[tokio::main]
async fn main() {
    let data_dir = parse_args();

    // Logging to stderr; stdout is for JSON-RPC
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(lore_core::config::log_level()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .init();

    info!("Lore MCP Server v{} starting...", env!("CARGO_PKG_VERSION"));

    let state = match AppState::init(data_dir).await {
        Ok(state) => state,
        Err(err) => {
            error!("failed to initialize: {err:#}");
            std::process::exit(1);
        }
    };

    let server = McpServer::new(state);
    let transport = StdioTransport::new();

    info!("starting MCP server on stdio...");
    if let Err(err) = transport.run(server).await {
        error!("server error: {err}");
        std::process::exit(1);
    }

    info!("Lore MCP Server shutting down");
}
