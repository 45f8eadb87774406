use anyhow::Result;
use lib_dashsync::{DashboardSession, TransportMode};
use tokio::signal;

mod watch_logic;
use watch_logic::{config, logger, report};

async fn shutdown_signal() {
    tokio::select! {
        res = signal::ctrl_c() => {
            match res {
                Ok(()) => log::info!("Ctrl-C received, initiating shutdown."),
                Err(e) => log::error!("Failed to listen for Ctrl-C: {}", e),
            }
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        log::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        log::warn!("Failed to install SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Feed .env into the environment before clap reads it
    let _ = dotenvy::dotenv();

    let config = config::load_config();
    logger::setup_logging(config.log_dir(), config.log_level())?;

    let sync_config = config.to_sync_config()?;
    let session = DashboardSession::start(&sync_config)?;
    let mode = session.mode();

    let _discoveries = session.on_prime_found(|record| {
        log::info!("{}", report::discovery_line(&record));
    });

    let mut pending_send = config.send_payload();
    if pending_send.is_some() && mode == TransportMode::Polling {
        log::warn!("Polling mode is receive-only; --send payload will not be delivered.");
    }

    let mut connected_rx = session.subscribe_connected();
    let mut snapshot_rx = session.subscribe_snapshot();
    let mut summary = tokio::time::interval(config.summary_interval());

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            res = connected_rx.changed() => {
                if res.is_err() {
                    break;
                }
                let connected = *connected_rx.borrow_and_update();
                log::info!("{}", report::connection_line(mode, connected));
                if connected {
                    if let Some(payload) = pending_send.take() {
                        log::info!("Sending client message: {}", payload);
                        session.send_message(&payload);
                    }
                }
            }
            res = snapshot_rx.changed() => {
                if res.is_err() {
                    break;
                }
                let slices = snapshot_rx.borrow_and_update().received_slices();
                log::debug!("Snapshot changed; {} slices received so far.", slices.len());
            }
            _ = summary.tick() => {
                log::info!("{}", report::summary_line(&session.view()));
            }
        }
    }

    session.shutdown().await;
    log::info!("Shutdown complete.");
    Ok(())
}
