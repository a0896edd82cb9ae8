//! graphlens-cli: terminal panel and history browser for GraphLens
//!
//! # Subcommands
//! - `panel --tab <id>`                       : live panel for one tab
//! - `history [--filter <text>] [--type <kind>] [--grouped] [--export curl|fetch]`
//!                                            : print persisted history
//! - `show <id>`                              : one exchange with replay snippets
//! - `clear`                                  : clear persisted history
//! - `status`                                 : coordinator counters over HTTP

use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use graphlens_core::{CapturedExchange, ExchangeStatus, LensConfig, OperationType};
use graphlens_panel::export::{format_bytes, generate_curl, generate_fetch, query_depth};
use graphlens_panel::{
    run_panel, FileStorage, Filter, OperationFilter, PanelConnection, PanelController, PanelView,
    Renderer, RequestStore, StatusFilter,
};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "graphlens-cli", version, about = "GraphLens terminal panel and history browser")]
struct Cli {
    /// Path to graphlens.toml
    #[arg(short, long, env = "GRAPHLENS_CONFIG", default_value = "graphlens.toml")]
    config: String,

    /// HTTP status API URL (defaults to the configured host and port)
    #[arg(long, env = "GRAPHLENS_HTTP_URL")]
    server: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Attach as the panel of a tab and show its traffic live
    Panel {
        #[arg(long)]
        tab: i64,

        /// Group operations by name
        #[arg(long)]
        grouped: bool,
    },

    /// Print persisted history, newest first
    History {
        /// Case-insensitive text over operation names and responses
        #[arg(long)]
        filter: Option<String>,

        /// Only entries with this status (all, pending, success, error)
        #[arg(long, default_value = "all")]
        status: StatusFilter,

        /// Only this operation type (all, query, mutation, subscription)
        #[arg(long = "type", default_value = "all")]
        kind: OperationFilter,

        #[arg(long)]
        grouped: bool,

        /// Print a replay snippet under every entry
        #[arg(long, value_enum)]
        export: Option<ExportFormat>,
    },

    /// Show one exchange with curl and fetch replay snippets
    Show { id: String },

    /// Remove all persisted history
    Clear,

    /// Show coordinator status
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ExportFormat {
    Curl,
    Fetch,
}

impl ExportFormat {
    fn render(self, exchange: &CapturedExchange) -> String {
        match self {
            ExportFormat::Curl => generate_curl(exchange),
            ExportFormat::Fetch => generate_fetch(exchange),
        }
    }
}

// ============================================================================
// Terminal rendering
// ============================================================================

fn status_label(status: ExchangeStatus) -> &'static str {
    match status {
        ExchangeStatus::Pending => "…",
        ExchangeStatus::Success => "✓",
        ExchangeStatus::Error => "✗",
    }
}

/// One line per exchange: status, name, type, HTTP code, duration, page.
pub fn format_entry(exchange: &CapturedExchange) -> String {
    let mut line = format!(
        "{} {} [{}]",
        status_label(exchange.status),
        exchange.operation_name,
        OperationType::detect(&exchange.query).as_str()
    );
    if let Some(code) = exchange.status_code {
        line.push_str(&format!(" {code}"));
    }
    if let Some(duration) = exchange.duration {
        line.push_str(&format!(" {duration}ms"));
    }
    if let Some(error) = &exchange.error {
        line.push_str(&format!(" ({error})"));
    }
    if let Some(path) = &exchange.page_path {
        line.push_str(&format!(" {path}"));
    }
    line
}

pub fn format_view(view: &PanelView) -> Vec<String> {
    match view {
        PanelView::Flat(entries) => entries.iter().map(format_entry).collect(),
        PanelView::Grouped(groups) => groups
            .iter()
            .flat_map(|group| {
                let star = if group.starred { "★ " } else { "" };
                std::iter::once(format!("{star}{} ({})", group.key, group.entries.len()))
                    .chain(group.entries.iter().map(|e| format!("  {}", format_entry(e))))
            })
            .collect(),
    }
}

/// Every entry followed by its replay snippet, indented.
fn format_exports(view: &PanelView, format: ExportFormat) -> Vec<String> {
    let entries: Vec<&CapturedExchange> = match view {
        PanelView::Flat(entries) => entries.iter().collect(),
        PanelView::Grouped(groups) => groups.iter().flat_map(|g| g.entries.iter()).collect(),
    };
    entries
        .into_iter()
        .flat_map(|exchange| {
            std::iter::once(format_entry(exchange))
                .chain(format.render(exchange).lines().map(|l| format!("    {l}")).collect::<Vec<_>>())
        })
        .collect()
}

/// Detail block for `show`.
fn format_details(exchange: &CapturedExchange) -> Vec<String> {
    let response_size = exchange
        .response
        .as_ref()
        .map(|r| r.to_string().len() as u64)
        .unwrap_or(0);
    let mut lines = vec![
        format_entry(exchange),
        format!("URL:       {}", exchange.url),
        format!("Depth:     {}", query_depth(&exchange.query)),
        format!("Response:  {}", format_bytes(response_size)),
        String::new(),
    ];
    lines.extend(generate_curl(exchange).lines().map(str::to_string));
    lines.push(String::new());
    lines.extend(generate_fetch(exchange).lines().map(str::to_string));
    lines
}

struct TerminalRenderer {
    clear_screen: bool,
}

impl Renderer for TerminalRenderer {
    fn render(&mut self, view: &PanelView) {
        if self.clear_screen {
            print!("\x1b[2J\x1b[H");
        }
        if view.is_empty() {
            println!("No GraphQL requests captured yet.");
            return;
        }
        for line in format_view(view) {
            println!("{line}");
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

fn open_store(config: &LensConfig) -> RequestStore {
    let backend = Arc::new(FileStorage::new(config.history.resolved_data_dir()));
    RequestStore::new(backend, &config.history)
}

async fn do_panel(config: &LensConfig, tab: i64, grouped: bool) -> anyhow::Result<()> {
    let mut controller = PanelController::load(open_store(config), &config.panel).await?;
    controller.set_grouped(grouped);

    let connection = PanelConnection::connect(&config.service.socket_path, tab).await?;
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(());
        }
    });

    let mut renderer = TerminalRenderer { clear_screen: true };
    run_panel(
        controller,
        connection.into_stream(),
        &mut renderer,
        config.panel.frame_interval(),
        shutdown_rx,
    )
    .await;
    Ok(())
}

async fn do_history(
    config: &LensConfig,
    filter: Filter,
    grouped: bool,
    export: Option<ExportFormat>,
) -> anyhow::Result<()> {
    let mut controller = PanelController::load(open_store(config), &config.panel).await?;
    let filtered = !filter.is_empty();
    controller.set_filter(filter);
    controller.set_grouped(grouped);

    let view = controller.view();
    if view.is_empty() && filtered {
        println!("No entries match the filter.");
        return Ok(());
    }
    match export {
        Some(format) => format_exports(&view, format).iter().for_each(|l| println!("{l}")),
        None => TerminalRenderer { clear_screen: false }.render(&view),
    }
    Ok(())
}

async fn do_show(config: &LensConfig, id: &str) -> anyhow::Result<()> {
    let history = open_store(config).read().await?;
    let exchange = history
        .iter()
        .find(|e| e.id == id)
        .ok_or_else(|| anyhow::anyhow!("no exchange with id {}", id))?;
    for line in format_details(exchange) {
        println!("{line}");
    }
    Ok(())
}

async fn do_clear(config: &LensConfig) -> anyhow::Result<()> {
    let store = open_store(config);
    store.clear().await?;
    store.flush().await?;
    println!("History cleared.");
    Ok(())
}

async fn do_status(server: &str) -> anyhow::Result<()> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()?;

    let url = format!("{}/stats", server);
    let resp = match client.get(&url).send().await {
        Ok(r) => r,
        Err(e) => {
            eprintln!("graphlens-cli: cannot reach {}: {}", url, e);
            std::process::exit(1);
        }
    };
    if !resp.status().is_success() {
        eprintln!("graphlens-cli: coordinator unavailable (HTTP {})", resp.status());
        std::process::exit(1);
    }

    let body: serde_json::Value = resp.json().await.unwrap_or_default();
    println!("Strategy:    {}", body["strategy"].as_str().unwrap_or("?"));
    println!("Panels:      {}", body["connections"]);
    println!("In flight:   {}", body["in_flight"]);
    println!("Stored:      {}", body["stored"]);
    println!("Dropped:     {}", body["dropped"]);
    println!("Queued:      {}", body["queued"]);
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match LensConfig::load_or_default(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("graphlens-cli: failed to load config from {}: {}", cli.config, e);
            std::process::exit(1);
        }
    };
    let server = cli
        .server
        .unwrap_or_else(|| format!("http://{}:{}", config.http.host, config.http.port))
        .trim_end_matches('/')
        .to_string();

    let result = match cli.command {
        Commands::Panel { tab, grouped } => do_panel(&config, tab, grouped).await,
        Commands::History {
            filter,
            status,
            kind,
            grouped,
            export,
        } => {
            let filter = Filter {
                operation: kind,
                status,
                ..Filter::text(filter.unwrap_or_default())
            };
            do_history(&config, filter, grouped, export).await
        }
        Commands::Show { id } => do_show(&config, &id).await,
        Commands::Clear => do_clear(&config).await,
        Commands::Status => do_status(&server).await,
    };

    if let Err(e) = result {
        eprintln!("graphlens-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
