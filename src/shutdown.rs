use crate::prelude::*;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Notify;

/// Process-wide shutdown state shared by every component.
///
/// `running` flips from true to false exactly once per process life, either
/// on SIGINT/SIGTERM or on an explicit `shutdown()` from any component. All
/// loops either poll `is_running()` between blocking operations or select on
/// `wait()`.
#[derive(Clone)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

struct Inner {
    running: AtomicBool,
    notify: Notify,
    signal: Mutex<Option<&'static str>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                running: AtomicBool::new(true),
                notify: Notify::new(),
                signal: Mutex::new(None),
            }),
        }
    }

    /// Spawn the task that turns SIGINT/SIGTERM into a shutdown request.
    /// Installed once, from the orchestrator.
    pub fn install_signal_handlers(&self) -> Result<()> {
        let mut sigint = signal(SignalKind::interrupt())
            .map_err(|err| anyhow!("failed to install SIGINT handler: {}", err))?;
        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|err| anyhow!("failed to install SIGTERM handler: {}", err))?;

        let handle = self.clone();
        tokio::spawn(async move {
            let name = tokio::select! {
                _ = sigint.recv() => "SIGINT",
                _ = sigterm.recv() => "SIGTERM",
            };
            info!("Received {}, initiating shutdown", name);
            *handle.inner.signal.lock().unwrap() = Some(name);
            handle.shutdown();
        });

        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Resolve once `running` becomes false. Safe to call from any number of
    /// tasks, before or after the flag flips.
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if !self.is_running() {
                return;
            }
            notified.await;
        }
    }

    /// Name of the delivered signal, or a placeholder for programmatic
    /// shutdowns.
    pub fn signal_name(&self) -> &'static str {
        self.inner.signal.lock().unwrap().unwrap_or("internal request")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_returns_after_shutdown() {
        let shutdown = Shutdown::new();
        assert!(shutdown.is_running());

        let waiter = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.wait().await })
        };

        shutdown.shutdown();
        waiter.await.unwrap();
        assert!(!shutdown.is_running());
        assert_eq!(shutdown.signal_name(), "internal request");
    }

    #[tokio::test]
    async fn wait_after_shutdown_is_immediate() {
        let shutdown = Shutdown::new();
        shutdown.shutdown();
        shutdown.wait().await;
    }
}
