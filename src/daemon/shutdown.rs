use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Cancels `cancelation` once the process receives ctrl-c, or SIGTERM on unix.
///
/// On Windows detached processes can't detect signals sent to them, so `worktrace stop` kills the
/// process there and the next start recovers the rows it left open.
pub async fn detect_shutdown(cancelation: CancellationToken) {
    select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for ctrl-c {e}");
                return;
            }
            info!("Received ctrl-c");
        },
        _ = terminate() => {
            info!("Received termination signal");
        },
        _ = cancelation.cancelled() => return,
    };
    cancelation.cancel();
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            error!("Failed to listen for SIGTERM {e}");
            std::future::pending::<()>().await
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await
}
