/// Control messages used to drive shutdown.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SignalTo {
    /// Stop every discoverer and wait for them to finish
    Shutdown,
    /// Exit without waiting
    Quit,
}

/// Waits for the next OS signal we care about.
#[cfg(unix)]
pub async fn wait() -> std::io::Result<SignalTo> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    let signal = tokio::select! {
        _ = sigint.recv() => {
            info!(message = "Signal received", signal = "SIGINT");
            SignalTo::Shutdown
        }
        _ = sigterm.recv() => {
            info!(message = "Signal received", signal = "SIGTERM");
            SignalTo::Shutdown
        }
        _ = sigquit.recv() => {
            info!(message = "Signal received", signal = "SIGQUIT");
            SignalTo::Quit
        }
    };

    Ok(signal)
}

#[cfg(not(unix))]
pub async fn wait() -> std::io::Result<SignalTo> {
    tokio::signal::ctrl_c().await?;
    info!(message = "Signal received", signal = "ctrl-c");

    Ok(SignalTo::Shutdown)
}
