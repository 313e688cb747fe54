mod cli;

use anyhow::Result;
use clap::Parser;
use common::Settings;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    // --master-url gana sobre MASTER_URL
    let base_url = match &cli.master_url {
        Some(url) => url.clone(),
        None => Settings::from_env()?.master_url,
    };

    cli::execute(cli, &base_url).await
}
