//! cashwatch service
//!
//! Wires the feed supervisor, dispatch loop, exchange-rate polling and the
//! HTTP surface together, then runs until Ctrl-C.
//!
//! Shutdown order: stop accepting HTTP requests, stop the supervisor (the
//! live connection's buffered transactions are still dispatched), let the
//! dispatch loop finish its queue, stop rate polling, save the address set.

use {
    cashwatch::{
        config::RuntimeConfig,
        context::AppContext,
        feed_core::{spawn_supervisor, BitsocketSource, FeedSource},
        server,
    },
    dotenv::dotenv,
    log::{error, info},
    std::sync::Arc,
    tokio::{net::TcpListener, sync::watch},
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let config = RuntimeConfig::from_env()?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.rust_log.as_str()))
        .target(env_logger::Target::Stderr)
        .init();

    info!("🚀 Starting cashwatch");
    info!("   ├─ Feed: {}", config.feed_url);
    info!("   ├─ Address store: {}", config.addresses_path.display());
    info!("   ├─ Rates: {:?}", config.rate_source);
    info!(
        "   ├─ Speech: {}",
        if config.google_tts_api_key.is_some() { "enabled" } else { "disabled" }
    );
    info!("   └─ Listening on: {}", config.listen_addr);

    let context = Arc::new(AppContext::from_config(&config)?);

    let (stop_rates, rates_shutdown) = watch::channel(false);
    let rates_task = context.live_rates().map(|rates| {
        let period = config.rate_poll_interval;
        tokio::spawn(async move { rates.poll(period, rates_shutdown).await })
    });

    let source: Arc<dyn FeedSource> = Arc::new(BitsocketSource::new(config.feed_url.clone())?);
    let supervisor = spawn_supervisor(
        source,
        context.addresses.clone(),
        context.dispatcher.clone(),
        config.supervisor_config(),
    );

    let listener = TcpListener::bind(&config.listen_addr).await?;
    if let Err(e) = server::serve(listener, context.clone(), wait_for_ctrl_c()).await {
        error!("HTTP server failed: {}", e);
    }

    let dispatched = supervisor.shutdown().await;
    info!("📊 Dispatched {} transactions this run", dispatched);

    stop_rates.send_replace(true);
    if let Some(task) = rates_task {
        if let Err(e) = task.await {
            error!("Exchange-rate task failed: {}", e);
        }
    }

    context.shutdown();
    info!("👋 cashwatch stopped");
    Ok(())
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("🛑 Ctrl-C received, shutting down"),
        Err(e) => error!("Failed to listen for Ctrl-C, shutting down: {}", e),
    }
}
