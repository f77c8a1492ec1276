use clap::Parser;
use malloy_cli::{init_logging, run, Cli};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.debug);
    run(cli).await
}
