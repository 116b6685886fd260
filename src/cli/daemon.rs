use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::daemon::Daemon;
use crate::error::Result;
use crate::ipc::socket_server::IpcServer;
use crate::pause::FilePauseGate;
use crate::transport::TelegramTransport;

/// Run the mediation daemon until Ctrl-C or SIGTERM.
pub async fn run_daemon(config: Config, config_path: &Path) -> Result<()> {
    config.validate()?;

    let transport = TelegramTransport::from_config(&config, Some(config_path.to_path_buf()))?;
    if transport.owner().is_none() {
        tracing::warn!("no owner registered yet, send /start to the bot");
    }
    let pause = FilePauseGate::new(config.pause_file.clone());
    let daemon = Arc::new(Daemon::new(
        Arc::new(transport),
        Arc::new(pause),
        config.timeout(),
    ));
    let server =
        IpcServer::new(config.socket_path.clone()).with_grace_period(config.shutdown_grace());

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        socket = %config.socket_path.display(),
        timeout_secs = config.timeout_secs,
        pause_file = %config.pause_file.display(),
        "starting stopkran daemon"
    );

    daemon.run(server, shutdown_signal()).await
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let mut sigterm =
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => Some(signal),
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM");
                None
            }
        };

    #[cfg(unix)]
    let sigterm_future = async {
        match sigterm.as_mut() {
            Some(signal) => {
                signal.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<()>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received Ctrl+C");
        }
        _ = sigterm_future => {
            tracing::info!("received SIGTERM");
        }
    }
}
