//! Hosting: start a set of listeners and stop them on shutdown.
//!
//! ```rust,ignore
//! let mut host = ListenerHost::new();
//! host.register(orders_listener)?;
//! host.register(audit_listener)?;
//!
//! // Until Ctrl+C / SIGTERM
//! host.run().await?;
//! ```
//!
//! Every listener is started with the host's shutdown token. On shutdown the
//! token is cancelled first, so in-flight handlers observe cancellation, and
//! then each listener is stopped.

use std::future::Future;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use quay_core::EventId;
use quay_framework::MessageListener;

use crate::error::{HostError, HostResult};

/// Owns the listeners of a process and the pipeline-wide shutdown token.
#[derive(Debug, Default)]
pub struct ListenerHost {
    listeners: Vec<MessageListener>,
    shutdown: CancellationToken,
}

impl ListenerHost {
    /// Creates a host with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener. Names must be unique.
    pub fn register(&mut self, listener: MessageListener) -> HostResult<()> {
        if self.listeners.iter().any(|l| l.name() == listener.name()) {
            return Err(HostError::DuplicateListener(listener.name().to_owned()));
        }
        self.listeners.push(listener);
        Ok(())
    }

    /// Adds a listener (builder pattern).
    pub fn with_listener(mut self, listener: MessageListener) -> HostResult<Self> {
        self.register(listener)?;
        Ok(self)
    }

    /// Returns the registered listeners in start order.
    pub fn listeners(&self) -> &[MessageListener] {
        &self.listeners
    }

    /// Returns the token cancelled on shutdown.
    ///
    /// Cancelling it from elsewhere also ends [`run`](Self::run).
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Starts every listener.
    ///
    /// If one fails to start, everything is stopped and the error returned.
    pub async fn start(&self) -> HostResult<()> {
        for listener in &self.listeners {
            if let Err(source) = listener.start_listening(self.shutdown.clone()) {
                error!(
                    event_id = EventId::ListenerException.code(),
                    listener = %listener.name(),
                    error = %source,
                    "Listener failed to start, stopping host"
                );
                self.stop().await;
                return Err(HostError::Start {
                    name: listener.name().to_owned(),
                    source,
                });
            }
        }

        info!(
            event_id = EventId::HostStarted.code(),
            listeners = self.listeners.len(),
            "Host started"
        );
        Ok(())
    }

    /// Cancels the shutdown token and stops every listener.
    ///
    /// Failures to stop one listener are logged and do not prevent stopping
    /// the others.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        for listener in &self.listeners {
            if let Err(e) = listener.stop_listening().await {
                error!(
                    event_id = EventId::ListenerException.code(),
                    listener = %listener.name(),
                    error = %e,
                    "Failed to stop listener"
                );
            }
        }
        info!(event_id = EventId::HostFinished.code(), "Host stopped");
    }

    /// Runs until Ctrl+C, SIGTERM, or cancellation of the shutdown token.
    pub async fn run(&self) -> HostResult<()> {
        self.start().await?;
        let signalled = self.wait_for_shutdown().await;
        self.stop().await;
        signalled
    }

    /// Runs until `shutdown` completes or the shutdown token is cancelled.
    pub async fn run_until<F>(&self, shutdown: F) -> HostResult<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        tokio::select! {
            _ = shutdown => {}
            _ = self.shutdown.cancelled() => {}
        }
        self.stop().await;
        Ok(())
    }

    #[cfg(unix)]
    async fn wait_for_shutdown(&self) -> HostResult<()> {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                info!("Received Ctrl+C, shutting down");
            }
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            _ = self.shutdown.cancelled() => info!("Shutdown requested"),
        }
        Ok(())
    }

    #[cfg(not(unix))]
    async fn wait_for_shutdown(&self) -> HostResult<()> {
        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                info!("Received Ctrl+C, shutting down");
            }
            _ = self.shutdown.cancelled() => info!("Shutdown requested"),
        }
        Ok(())
    }
}
