use std::sync::Arc;

use clap::Parser;
use execache::{
    config::Opts,
    mutation::Mutator,
    server::{serve, WebhookState},
    store::RedisCacheStore,
};
use tracing_subscriber::EnvFilter;

async fn inner_main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    tracing::info!(
        listen = %opts.listen,
        redis_host = ?opts.redis_host,
        redis_port = opts.redis_port,
        "starting"
    );

    let store = RedisCacheStore::connect(&opts.redis_url()).await?;
    let mutator = Mutator::new(Arc::new(store), opts.mutator_config());
    let state = Arc::new(WebhookState::new(mutator));

    serve(opts.listen, &opts.cert_path(), &opts.key_path(), state).await
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = inner_main().await {
        tracing::error!("{:?}", e);
        std::process::exit(1);
    }
}
