use anyhow::Result;
use application::{
    ChangesetCoordinator, CommandEngine, DeviceRegistry, EventBus, IngestPipeline, TopologyManager,
};
use clap::Parser;
use infrastructure::{
    KvChangesetRepository, KvCommandRepository, KvDeviceRepository, KvTopologyRepository,
    MqttClient, SledStore,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use central_server::{api, state::AppState};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// MQTT broker host
    #[arg(long, default_value = "localhost")]
    mqtt_host: String,

    /// MQTT broker port
    #[arg(long, default_value = "1883")]
    mqtt_port: u16,

    /// MQTT client id
    #[arg(long, default_value = "central-server")]
    mqtt_client_id: String,

    /// HTTP API port
    #[arg(long, default_value = "3000")]
    api_port: u16,

    /// Directory for the embedded key-value store
    #[arg(long, default_value = "./data")]
    data_dir: String,

    /// Device offline threshold, in milliseconds
    #[arg(long, default_value = "120000")]
    staleness_threshold_ms: i64,

    /// Default command RPC timeout, in milliseconds
    #[arg(long, default_value = "30000")]
    command_timeout_ms: u64,

    /// Maximum concurrently active changesets
    #[arg(long, default_value = "50")]
    changeset_max_active: usize,

    /// Terminal changeset retention, in seconds
    #[arg(long, default_value = "86400")]
    changeset_retention_secs: u64,

    /// Ingest per-device worker pool size
    #[arg(long, default_value = "4")]
    ingest_workers: usize,

    /// Ingest per-worker channel depth
    #[arg(long, default_value = "4096")]
    ingest_queue_size: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new("info,central_server=debug")
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    info!("central server starting");

    let store = Arc::new(SledStore::open(&args.data_dir)?);
    let device_repo = Arc::new(KvDeviceRepository::new(store.clone()));
    let topology_repo = Arc::new(KvTopologyRepository::new(store.clone()));
    let command_repo = Arc::new(KvCommandRepository::new(store.clone()));
    let changeset_repo = Arc::new(KvChangesetRepository::new(store.clone()));
    info!(dir = %args.data_dir, "key-value store opened");

    let mqtt_client = MqttClient::new(
        &args.mqtt_host,
        args.mqtt_port,
        &args.mqtt_client_id,
        None,
    )
    .await?;
    info!(host = %args.mqtt_host, port = args.mqtt_port, "mqtt connected");

    let events = Arc::new(EventBus::new(1024));

    let devices = Arc::new(DeviceRegistry::new(
        device_repo,
        events.clone(),
        args.staleness_threshold_ms,
    ));
    devices.load_from_store().await?;

    let topology = Arc::new(TopologyManager::new(topology_repo, events.clone()));

    let commands = Arc::new(CommandEngine::new(
        command_repo,
        Arc::new(mqtt_client.clone()),
        events.clone(),
        args.command_timeout_ms,
    ));

    let changesets = Arc::new(ChangesetCoordinator::new(
        changeset_repo,
        commands.clone(),
        events.clone(),
        args.changeset_max_active,
    ));
    changesets.load_from_store().await?;

    let ingest = Arc::new(IngestPipeline::new(
        mqtt_client.clone(),
        devices.clone(),
        commands.clone(),
        events.clone(),
        args.ingest_workers,
        args.ingest_queue_size,
    ));
    ingest.subscribe_all().await?;
    info!("ingest pipeline subscribed");

    let root_cancel = CancellationToken::new();
    let mut workers = Vec::new();

    workers.push(tokio::spawn(devices.clone().run_staleness_sweep(
        Duration::from_secs(30),
        root_cancel.child_token(),
    )));
    workers.push(tokio::spawn(commands.clone().run_timeout_sweep(
        Duration::from_secs(1),
        root_cancel.child_token(),
    )));
    workers.push(tokio::spawn(changesets.clone().run_cleanup(
        Duration::from_secs(300),
        Duration::from_secs(args.changeset_retention_secs),
        root_cancel.child_token(),
    )));
    workers.push(tokio::spawn(topology.clone().run_reconciler(
        events.subscribe(),
        root_cancel.child_token(),
    )));
    workers.push(tokio::spawn(ingest.clone().run(root_cancel.child_token())));

    let state = Arc::new(AppState::new(
        devices,
        topology,
        commands,
        changesets,
        events,
        mqtt_client,
    ));

    let app = api::create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], args.api_port));
    info!(%addr, "api listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down background workers");
    root_cancel.cancel();
    for worker in workers {
        let _ = worker.await;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
