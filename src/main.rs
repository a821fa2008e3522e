use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;

use nexus_hook_dispatcher::components::register_builtin;
use nexus_hook_dispatcher::config::{Args, Config};
use nexus_hook_dispatcher::github::RestConnector;
use nexus_hook_dispatcher::http_server::{self, AppState};
use nexus_hook_dispatcher::{logging, ComponentRegistry, Db, Dispatcher, HookStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(&args)?;
    logging::init(&config);

    let retention = config.dedup_retention();
    let db = Db::open(config.db.clone())
        .with_context(|| format!("opening database {}", config.db.display()))?;

    let connector = RestConnector::new(&config.api_url, config.api_timeout())
        .context("building GitHub API client")?;
    let mut registry = ComponentRegistry::new();
    register_builtin(&mut registry, Arc::new(connector))?;

    let hooks = HookStore::open(db, Arc::new(registry)).await?;
    let dispatcher = Arc::new(Dispatcher::new(hooks).with_dedup_retention(retention));
    let state = AppState::new(dispatcher, &config.delivery_header);

    let public = TcpListener::bind(config.http)
        .await
        .with_context(|| format!("binding {}", config.http))?;
    let admin = TcpListener::bind(config.admin)
        .await
        .with_context(|| format!("binding {}", config.admin))?;

    // ─── Shutdown ────────────────────────────────────────────────────────────

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        http_server::shutdown_on(tokio::signal::ctrl_c()).await;
        let _ = stop_tx.send(true);
    });
    let stopped = |mut rx: watch::Receiver<bool>| async move {
        let _ = rx.wait_for(|stop| *stop).await;
    };

    tokio::try_join!(
        http_server::serve(
            public,
            http_server::public_router(state.clone()),
            stopped(stop_rx.clone()),
        ),
        http_server::serve(admin, http_server::admin_router(state), stopped(stop_rx)),
    )?;
    Ok(())
}
