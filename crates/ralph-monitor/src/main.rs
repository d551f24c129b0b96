use anyhow::Context;
use clap::Parser;
use ralph_monitor::console::ConsoleView;
use ralph_monitor::{
    load_config, Args, DashboardState, HttpSnapshotSource, PollingReconciler, PushClient,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config(Args::parse()).context("invalid --hub-url")?;
    let directive = ralph_core::log_filter_directive(config.debug, "warn");
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(directive))
        .with_writer(std::io::stderr)
        .init();

    let store = DashboardState::shared();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    let source = HttpSnapshotSource::new(config.hub_url.clone())?;
    let reconciler = Arc::new(PollingReconciler::new(
        source.clone(),
        store.clone(),
        config.poll_interval,
    ));
    {
        let shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move { reconciler.run(shutdown).await }));
    }

    if config.push {
        let client = PushClient::new(
            &config.hub_url,
            store.clone(),
            config.reconnect_delay,
            config.ping_interval,
        )?
        .with_log_source(Arc::new(source));
        info!(event = "monitor_start", url = %client.url());
        let shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move { client.run(shutdown).await }));
    }

    let mut view = ConsoleView::default();
    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = ticker.tick() => {
                let state = store.read().await;
                for line in view.render(&state) {
                    println!("{line}");
                }
            }
        }
    }

    let _ = shutdown_tx.send(true);
    for task in tasks {
        let _ = task.await;
    }
    Ok(())
}
