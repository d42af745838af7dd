//! CWF CLI - builds the California wildfire burn-probability dataset.

use clap::Parser;

#[derive(Parser)]
#[command(
    name = "cwf-cli",
    version,
    about = "California wildfire grid: monthly burn-probability dataset builder"
)]
struct Cli {
    #[command(flatten)]
    global: cwf_cmd::GlobalArgs,

    #[command(subcommand)]
    command: cwf_cmd::Command,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    cwf_cmd::run(cli.global, cli.command).await
}
