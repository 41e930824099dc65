//! Signal handling.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Create a `CancellationToken` that is cancelled on SIGINT or SIGTERM.
/// Clones go to the monitoring loop and the HTTP server.
pub fn shutdown_token() -> CancellationToken {
  let token = CancellationToken::new();
  let trigger = token.clone();

  tokio::spawn(async move {
    shutdown_signal().await;
    info!("shutdown signal received");
    trigger.cancel();
  });

  token
}

/// Resolves on the first SIGINT or SIGTERM. A handler that cannot be
/// installed never fires.
async fn shutdown_signal() {
  let ctrl_c = async {
    if let Err(e) = signal::ctrl_c().await {
      warn!(error = %e, "failed to install Ctrl+C handler");
      std::future::pending::<()>().await;
    }
  };

  #[cfg(unix)]
  let terminate = async {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
      Ok(mut sigterm) => {
        sigterm.recv().await;
      }
      Err(e) => {
        warn!(error = %e, "failed to install SIGTERM handler");
        std::future::pending::<()>().await;
      }
    }
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    () = ctrl_c => {},
    () = terminate => {},
  }
}
