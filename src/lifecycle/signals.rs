//! OS signal handling.
//!
//! # Responsibilities
//! - SIGTERM/SIGINT (ctrl-c) → graceful shutdown
//! - SIGHUP → config reload, without touching listeners
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - A handler that cannot be installed is logged and never fires

use tokio::task::JoinHandle;

use crate::config::ReloadTrigger;

/// Resolve once ctrl-c or SIGTERM arrives.
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Interrupt received"),
        _ = terminate => tracing::info!("SIGTERM received"),
    }
}

/// Forward every SIGHUP to the config watcher as a manual reload.
pub fn spawn_reload_on_hangup(trigger: ReloadTrigger) -> JoinHandle<()> {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sighup = match signal(SignalKind::hangup()) {
                Ok(sighup) => sighup,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to install SIGHUP handler, reload on file change only");
                    return;
                }
            };

            while sighup.recv().await.is_some() {
                tracing::info!("SIGHUP received, reloading configuration");
                trigger.reload();
            }
        }

        #[cfg(not(unix))]
        {
            let _ = trigger;
            tracing::debug!("SIGHUP reload is only available on Unix");
        }
    })
}
