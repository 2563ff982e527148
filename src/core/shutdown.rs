//! # Process termination signal.
//!
//! [`wait_for_shutdown_signal`] resolves when the process is asked to terminate. The
//! orchestrator's `start()` races it against nothing else: it is the default stop
//! request, while `run_until()` accepts any future in its place.
//!
//! ## Signals
//! - unix: `SIGINT`, `SIGTERM`, `SIGQUIT` and Ctrl-C
//! - elsewhere: Ctrl-C only

/// Resolves once a termination signal arrives.
///
/// Fails only if a signal listener cannot be installed.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;

    tokio::select! {
        res = tokio::signal::ctrl_c() => res,
        _ = interrupt.recv() => Ok(()),
        _ = terminate.recv() => Ok(()),
        _ = quit.recv() => Ok(()),
    }
}

/// Resolves once Ctrl-C is pressed.
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
