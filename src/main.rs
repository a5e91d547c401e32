use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use innkeep::config::Config;
use innkeep::observability::{CONNECTIONS_ACTIVE, CONNECTIONS_REJECTED_TOTAL, CONNECTIONS_TOTAL};
use innkeep::property::PropertyManager;
use innkeep::wire;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();
    innkeep::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;

    let properties = Arc::new(PropertyManager::new(
        config.data_dir.clone(),
        config.compact_threshold,
        config.policy.clone(),
    ));
    let max_connections = config.max_connections;
    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!(
        %addr,
        data_dir = %config.data_dir.display(),
        max_connections,
        metrics_port = ?config.metrics_port,
        "innkeep listening"
    );
    info!(
        day_open = %config.policy.day_open,
        day_close = %config.policy.day_close,
        min_gap_minutes = config.policy.min_gap_minutes,
        tax_rate = config.policy.tax_rate,
        service_fee_rate = config.policy.service_fee_rate,
        "pricing policy"
    );

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => admit(socket, peer, &semaphore, &properties),
                Err(e) => tracing::error!(error = %e, "accept failed"),
            },
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    // Every open connection holds a permit; getting all of them back means drained.
    info!(timeout = ?config.drain_timeout, "draining connections");
    let all_permits = u32::try_from(max_connections).unwrap_or(u32::MAX);
    match tokio::time::timeout(config.drain_timeout, semaphore.acquire_many(all_permits)).await {
        Ok(_) => info!("all connections drained"),
        Err(_) => {
            let remaining = max_connections - semaphore.available_permits();
            warn!(remaining, "drain timeout, connections still open");
        }
    }

    info!("innkeep stopped");
    Ok(())
}

/// Hand an accepted socket to its own task, or turn it away when every
/// connection permit is taken.
fn admit(socket: TcpStream, peer: SocketAddr, semaphore: &Arc<Semaphore>, properties: &Arc<PropertyManager>) {
    let Ok(permit) = semaphore.clone().try_acquire_owned() else {
        warn!(%peer, "connection limit reached, rejecting");
        metrics::counter!(CONNECTIONS_REJECTED_TOTAL).increment(1);
        return;
    };
    debug!(%peer, "connection accepted");
    metrics::counter!(CONNECTIONS_TOTAL).increment(1);
    metrics::gauge!(CONNECTIONS_ACTIVE).increment(1.0);

    let properties = properties.clone();
    tokio::spawn(async move {
        if let Err(e) = wire::process_connection(socket, properties).await {
            warn!(%peer, error = %e, "connection closed with error");
        }
        metrics::gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
        drop(permit);
    });
}

/// Resolves on ctrl-c, or SIGTERM where the platform has it.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
                return;
            }
            Err(e) => warn!(error = %e, "SIGTERM handler unavailable, listening for ctrl-c only"),
        }
    }
    let _ = tokio::signal::ctrl_c().await;
}
