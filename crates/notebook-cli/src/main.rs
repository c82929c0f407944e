//! Notebook server binary: wires configuration and logging, then starts
//! the RPC surface.

use clap::Parser;

#[derive(Parser)]
#[command(name = "notebook-server")]
#[command(about = "RPC surface for the notebook cell execution runtime")]
#[command(version)]
struct Cli {
    /// Enable verbose (debug-level) logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = notebook_core::Config::from_env()?;

    notebook_server::serve(config).await?;

    Ok(())
}
