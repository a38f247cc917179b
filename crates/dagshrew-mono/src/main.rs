use anyhow::Result;
use clap::Parser;
use dagshrew_mono::{run_prod, Args};
use log::info;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let args = Args::parse();
    info!("Starting dagshrew indexer against {}", args.rpc_url);
    info!("Press Ctrl-C to stop gracefully, Ctrl-C again to force exit");
    run_prod(args).await
}
