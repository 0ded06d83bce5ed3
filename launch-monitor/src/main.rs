use std::sync::Arc;

use anyhow::Context;
use launch_monitor::{
    api::create_router,
    catalog::CatalogClient,
    config::Settings,
    machine::StateMachine,
    notify::LogNotifier,
    probe::{probe_router, HealthProbe},
    rpc::RpcPool,
    ApiState,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    let code = match run().await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("Fatal: {:#}", e);
            eprintln!("Fatal: {:#}", e);
            1
        }
    };
    std::process::exit(code);
}

async fn run() -> anyhow::Result<i32> {
    let settings = Settings::load().context("loading configuration")?;

    // Settings drive the default log level; RUST_LOG still wins.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("launch_monitor={},tower_http=info", settings.logging.level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "Starting launch monitor: {} HTTP endpoints, tax window {} min, threshold {} VIRTUAL",
        settings.chain.rpc.http.len(),
        settings.thresholds.tax_window_minutes,
        settings.thresholds.big_trade_virtual
    );

    let pool = Arc::new(
        RpcPool::new(
            settings.chain.rpc.http.clone(),
            settings.chain.rpc.wss.clone(),
        )
        .context("building RPC pool")?,
    );
    pool.select_fastest().await;

    let catalog = Arc::new(CatalogClient::new(settings.virtuals.api_base.clone()));
    let cancel = CancellationToken::new();
    let api = Arc::new(ApiState::new(
        settings.clone(),
        pool.clone(),
        catalog.clone(),
        cancel.clone(),
    ));
    let probe = Arc::new(HealthProbe::new());

    // API surface (REST + push socket)
    let api_addr = format!("0.0.0.0:{}", Settings::api_port());
    let api_listener = TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("binding API listener on {}", api_addr))?;
    tracing::info!("API surface on http://{}", api_addr);
    let api_server = serve(create_router(api.clone()), api_listener, cancel.clone());

    // Health probe listener
    let health_addr = format!("0.0.0.0:{}", Settings::health_port());
    let health_listener = TcpListener::bind(&health_addr)
        .await
        .with_context(|| format!("binding health listener on {}", health_addr))?;
    tracing::info!("Health probe on http://{}/healthz", health_addr);
    let health_server = serve(probe_router(probe.clone()), health_listener, cancel.clone());

    // Monitoring core
    let machine = StateMachine::new(
        settings,
        pool.clone(),
        catalog,
        api,
        probe,
        Arc::new(LogNotifier),
        cancel.clone(),
    );
    let machine_task = tokio::spawn(machine.run());

    // Run until a signal arrives or the machine dies on a fatal error.
    let code = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Signal received, shutting down");
            cancel.cancel();
            0
        }
        result = machine_task => match result {
            Ok(Ok(())) => 0,
            Ok(Err(e)) => {
                tracing::error!("State machine failed: {}", e);
                1
            }
            Err(e) => {
                tracing::error!("State machine panicked: {}", e);
                1
            }
        },
    };

    cancel.cancel();
    let _ = api_server.await;
    let _ = health_server.await;
    pool.shutdown();

    Ok(code)
}

fn serve(
    router: axum::Router,
    listener: TcpListener,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let shutdown = async move { cancel.cancelled().await };
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
        {
            tracing::error!("HTTP server error: {}", e);
        }
    })
}
