use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use tool_sandbox::{
    policy, ExecutorConfig, InvocationRequest, ManifestCatalog, SandboxManager, ToolCatalog,
};

#[derive(Parser)]
#[command(name = "tool-sandbox", about = "Run registry tools in isolated WebAssembly contexts.")]
struct Cli {
    /// Tool manifest (YAML)
    #[arg(short, long, default_value = "tools.yaml", global = true)]
    manifest: PathBuf,

    /// Executor config (defaults: TOOL_SANDBOX_CONFIG, then .tool-sandbox/executor.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Invoke a tool and print its result as JSON
    Run {
        name: String,
        version: String,
        /// Input value as JSON text
        #[arg(short, long, default_value = "{}")]
        input: String,
        /// Caller deadline in milliseconds
        #[arg(short, long, default_value_t = 10_000)]
        timeout_ms: u64,
        /// Print the full report (transitions, usage) instead of only the result
        #[arg(long)]
        report: bool,
    },
    /// List tools in the manifest
    List,
    /// Show the capability decision a tool would run under
    Check { name: String, version: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tool_sandbox=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ExecutorConfig::load(path)?,
        None => ExecutorConfig::discover()?,
    };
    let catalog = ManifestCatalog::load(&cli.manifest)
        .with_context(|| format!("loading manifest {}", cli.manifest.display()))?;

    match cli.command {
        Command::Run {
            name,
            version,
            input,
            timeout_ms,
            report,
        } => {
            let input: serde_json::Value =
                serde_json::from_str(&input).context("--input is not valid JSON")?;
            let manager = SandboxManager::new(config, Arc::new(catalog))?;
            let request =
                InvocationRequest::new(name, version, input, Duration::from_millis(timeout_ms))
                    .with_caller("cli");
            info!(trace_id = %request.trace_id, "invoking");
            let outcome = manager.execute_with_report(request).await;
            let json = if report {
                serde_json::to_string_pretty(&outcome)?
            } else {
                serde_json::to_string_pretty(&outcome.result)?
            };
            println!("{json}");
            if !outcome.result.is_success() {
                std::process::exit(1);
            }
        }
        Command::List => {
            for key in catalog.list().await {
                let descriptor = catalog.get_descriptor(&key.name, &key.version).await?;
                println!("{key}\t{}", descriptor.description);
            }
        }
        Command::Check { name, version } => {
            let descriptor = catalog.get_descriptor(&name, &version).await?;
            match policy::resolve(&descriptor.capabilities, &config) {
                Ok(decision) => println!("{}", serde_json::to_string_pretty(&decision)?),
                Err(failure) => anyhow::bail!("capability declaration rejected: {failure}"),
            }
        }
    }

    Ok(())
}
