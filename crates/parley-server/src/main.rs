mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use parley_chat::config::DirectoryKind;
use parley_chat::{BroadcastPublisher, ChannelDirectory, ChatConfig, ChatService, MemoryDirectory, ShardDirectory};
use parley_db::ShardRouter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,parley_db=info,tower_http=debug".into()),
        )
        .init();

    let config = ChatConfig::load()?;

    // Shards
    let paths = config.shard_paths();
    for path in &paths {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
    }
    let router = Arc::new(ShardRouter::open(&paths, &config.pool_settings())?);
    for shard in router.shards() {
        debug!(
            "Shard {} -> {} (max {} connections, query timeout {:?})",
            shard.index(),
            shard.path().display(),
            shard.settings().max_connections,
            shard.settings().query_timeout
        );
    }

    let directory: Arc<dyn ChannelDirectory> = match config.directory {
        DirectoryKind::Shard => Arc::new(ShardDirectory::new(router.clone())),
        DirectoryKind::Memory => Arc::new(MemoryDirectory::from_seeds(&config.channels).await),
    };
    let publisher = Arc::new(BroadcastPublisher::new(config.event_buffer));
    let service = ChatService::new(router.clone(), directory, publisher);

    let app = routes::router(service)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config.bind_addr().parse()?;
    info!(
        "Parley listening on {} ({} shards, {:?} directory)",
        addr,
        router.shard_count(),
        config.directory
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    router.close();
    info!("Shard pools closed");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
