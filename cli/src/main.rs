use agent_sandbox_cli::Cli;
use agent_sandbox_cli::run_main;
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    run_main(cli).await
}
