use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use dagon::config::EngineConfig;
use dagon::flows::Flow;
use dagon::flows::file_repository::FileExecutionRepository;
use dagon::flows::registry::NodeRegistry;
use dagon::flows::runner::{ExecuteOptions, FlowEngine};
use dagon::services::Services;
use dagon::services::stub::StubAi;
use dagon::services::webhook::WebhookMessenger;

#[derive(Parser)]
#[command(name = "dagon", about = "Flow execution engine for agent automation")]
enum Cli {
    /// Execute a flow definition and print the final output
    Run {
        /// Path to a flow JSON file
        flow: PathBuf,
        /// Inline JSON input for the execution
        #[arg(long, default_value = "{}")]
        input: String,
        /// Execution timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Check a flow definition against the node registry
    Validate {
        /// Path to a flow JSON file
        flow: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dagon=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_tree::HierarchicalLayer::new(2)
                .with_targets(true)
                .with_bracketed_fields(false),
        )
        .init();

    match Cli::parse() {
        Cli::Run {
            flow,
            input,
            timeout,
        } => run_flow(flow, input, timeout).await,
        Cli::Validate { flow } => validate_flow(flow),
    }
}

fn load_flow(path: &PathBuf) -> Result<Flow> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read flow file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse flow file: {}", path.display()))
}

fn build_engine() -> Result<(Arc<FlowEngine>, Arc<FileExecutionRepository>)> {
    let http_client = Arc::new(
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build HTTP client")?,
    );

    // Webhook delivery is live; AI runs against the echo stub unless the
    // hosting process wires a real provider.
    let services = Services::new(
        Arc::new(StubAi::new()),
        Arc::new(WebhookMessenger::new(http_client)),
    );

    let repository = Arc::new(FileExecutionRepository::new(
        FileExecutionRepository::default_dir(),
    ));

    let engine = FlowEngine::new(
        EngineConfig::from_env(),
        Arc::new(NodeRegistry::with_builtin_nodes()),
        services,
        repository.clone(),
    );
    Ok((engine, repository))
}

async fn run_flow(path: PathBuf, input: String, timeout: Option<u64>) -> Result<()> {
    let flow = load_flow(&path)?;
    let input: serde_json::Value =
        serde_json::from_str(&input).context("failed to parse --input as JSON")?;

    let (engine, repository) = build_engine()?;
    repository.load_all().await?;

    let options = ExecuteOptions {
        input,
        timeout: timeout.map(Duration::from_secs),
        ..ExecuteOptions::default()
    };
    let execution = engine.execute(flow, options).await?;

    println!("{}", serde_json::to_string_pretty(&execution.output)?);

    match execution.status {
        dagon::flows::history::ExecutionStatus::Completed => Ok(()),
        status => {
            let detail = execution
                .error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no error recorded".to_string());
            anyhow::bail!("execution {}: {detail}", status.as_str())
        }
    }
}

fn validate_flow(path: PathBuf) -> Result<()> {
    let flow = load_flow(&path)?;

    let engine = FlowEngine::new(
        EngineConfig::default(),
        Arc::new(NodeRegistry::with_builtin_nodes()),
        Services::stubbed(),
        Arc::new(dagon::flows::repository::MemoryExecutionRepository::new()),
    );

    let problems = engine.validate_flow(&flow);
    if problems.is_empty() {
        println!("{}: {} nodes, {} edges, no problems", flow.name, flow.nodes.len(), flow.edges.len());
        return Ok(());
    }

    for (node_id, problem) in &problems {
        eprintln!("{node_id}: {problem}");
    }
    anyhow::bail!("{} problem(s) found", problems.len())
}
