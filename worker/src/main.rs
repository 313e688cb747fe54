mod worker;

use anyhow::Result;
use common::Settings;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::from_env()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_filter("worker")));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    worker::run(&settings).await
}
