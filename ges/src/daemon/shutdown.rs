use tokio::sync::broadcast;

/// A struct which can be used to shut down the daemon.
/// You can create multiple connected shutdowns by cloning. Every clone hears
/// shutdowns sent after it was made.
#[derive(Debug)]
pub struct Shutdown {
    /// This channel can be used tell the daemon to shut down.
    notify: broadcast::Sender<DaemonExit>,
    listener: broadcast::Receiver<DaemonExit>,
    /// Keeps track of the last status received
    /// So users can call `wait_for_shutdown` multiple times
    last_status: Option<DaemonExit>,
}

impl Shutdown {
    /// Creates a new active shutdown.
    pub fn new() -> Self {
        let (notify, listener) = broadcast::channel(1);
        Self {
            notify,
            listener,
            last_status: None,
        }
    }

    /// Sends `status` to all `Shutdown`s cloned from this one.
    pub fn shut_down(&self, status: DaemonExit) {
        if let Err(e) = self.notify.send(status) {
            tracing::error!("Failed to initiate shutdown: {}", e);
        }
    }

    /// Waits to receive a shutdown status.
    pub async fn wait_for_shutdown(&mut self) -> DaemonExit {
        use tokio::sync::broadcast::error::RecvError;

        if let Some(status) = self.last_status {
            return status;
        }
        loop {
            match self.listener.recv().await {
                Ok(status) => {
                    self.last_status = Some(status);
                    return status;
                }
                // Our own sender keeps the channel open.
                Err(RecvError::Closed) => return DaemonExit::Failed,
                Err(RecvError::Lagged(_)) => (),
            }
        }
    }
}

impl Clone for Shutdown {
    fn clone(&self) -> Self {
        Self {
            notify: self.notify.clone(),
            listener: self.notify.subscribe(),
            last_status: self.last_status,
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Why the daemon stopped.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DaemonExit {
    /// A client sent `kill`.
    Killed,
    /// The process received Ctrl-C.
    Interrupted,
    /// The simulation thread went away.
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_clone_hears_the_shutdown() {
        let shut0 = Shutdown::new();
        let shuts = [shut0.clone(), shut0.clone(), shut0.clone()];

        shuts[0].shut_down(DaemonExit::Killed);

        for mut shut in shuts {
            assert_eq!(shut.wait_for_shutdown().await, DaemonExit::Killed);
            assert_eq!(shut.wait_for_shutdown().await, DaemonExit::Killed);
        }
    }
}
