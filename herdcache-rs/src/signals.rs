//! Installs a signal handler which cancels a shutdown token on CTRL+C or SIGHUP.
//!
//! Forks an async task which waits for either **CTRL+C** or **SIGHUP** and then cancels the given
//! token. Passing the same token to the [Builder](crate::builder::Builder) of each coordinator
//! makes all waiting lookups return right away instead of blocking the shutdown.
use tokio::signal::unix::SignalKind;
use tokio_util::sync::CancellationToken;

/// Installs a signal handler which cancels the given token once a **CTRL+C** or **SIGHUP** is
/// received.
pub fn install(shutdown: CancellationToken) {
    crate::spawn!(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        let sig_hup = async {
            match tokio::signal::unix::signal(SignalKind::hangup()) {
                Ok(mut signal) => signal.recv().await,
                Err(error) => {
                    log::warn!("Cannot install a handler for SIGHUP: {}", error);
                    std::future::pending().await
                }
            }
        };

        tokio::select! {
            _ = ctrl_c => {
                log::info!("Received CTRL-C. Shutting down...");
            },
            _ = sig_hup => {
                log::info!("Received SIGHUP. Shutting down...");
            },
            _ = shutdown.cancelled() => return,
        }

        shutdown.cancel();
    });
}
