//! Process signals that end the server.

use std::fmt;
use tokio::signal;

/// The signal that asked the server to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSignal::Interrupt => f.write_str("interrupt"),
            ShutdownSignal::Terminate => f.write_str("terminate"),
        }
    }
}

/// Resolves with the first stop request the process receives.
///
/// # Errors
///
/// Fails if the signal listeners cannot be installed.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<ShutdownSignal> {
    use signal::unix::{signal as listen, SignalKind};

    let mut interrupt = listen(SignalKind::interrupt())?;
    let mut terminate = listen(SignalKind::terminate())?;

    let received = tokio::select! {
        _ = interrupt.recv() => ShutdownSignal::Interrupt,
        _ = terminate.recv() => ShutdownSignal::Terminate,
    };
    Ok(received)
}

/// Resolves when Ctrl+C is pressed.
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<ShutdownSignal> {
    signal::ctrl_c().await?;
    Ok(ShutdownSignal::Interrupt)
}
