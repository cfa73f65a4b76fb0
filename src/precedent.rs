//! Precedent telemetry relay — fire-and-forget history signals.
//!
//! Decisions must never wait on the history sink: signals go through a
//! bounded channel and are dropped with a warning when it is full.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;

/// External store of per-class action history. Write-only from this core.
pub trait PrecedentStore: Send + Sync {
    fn record_action<'a>(
        &'a self,
        class: &'a str,
        description: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;

    fn record_outcome<'a>(
        &'a self,
        class: &'a str,
        success: bool,
        severity: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;
}

/// Store used when no history backend is wired up.
pub struct NullPrecedentStore;

impl PrecedentStore for NullPrecedentStore {
    fn record_action<'a>(
        &'a self,
        _class: &'a str,
        _description: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(async { Ok(()) })
    }

    fn record_outcome<'a>(
        &'a self,
        _class: &'a str,
        _success: bool,
        _severity: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(async { Ok(()) })
    }
}

#[derive(Debug)]
enum Signal {
    Action {
        class: String,
        description: String,
    },
    Outcome {
        class: String,
        success: bool,
        severity: String,
    },
}

/// Bounded hand-off between the pipeline and the precedent store.
pub struct PrecedentRelay {
    tx: mpsc::Sender<Signal>,
}

impl PrecedentRelay {
    /// Spawn the relay worker. Must run inside a tokio runtime.
    pub fn spawn(store: Arc<dyn PrecedentStore>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Signal>(capacity.max(1));

        tokio::spawn(async move {
            while let Some(signal) = rx.recv().await {
                let result = match &signal {
                    Signal::Action { class, description } => {
                        store.record_action(class, description).await
                    }
                    Signal::Outcome {
                        class,
                        success,
                        severity,
                    } => store.record_outcome(class, *success, severity).await,
                };
                if let Err(e) = result {
                    tracing::warn!(error = %e, "precedent store write failed");
                }
            }
        });

        Self { tx }
    }

    pub fn action(&self, class: &str, description: &str) {
        self.send(Signal::Action {
            class: class.to_string(),
            description: description.to_string(),
        });
    }

    pub fn outcome(&self, class: &str, success: bool, severity: &str) {
        self.send(Signal::Outcome {
            class: class.to_string(),
            success,
            severity: severity.to_string(),
        });
    }

    fn send(&self, signal: Signal) {
        match self.tx.try_send(signal) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(signal)) => {
                tracing::warn!(?signal, "precedent relay full; dropping signal");
            }
            Err(mpsc::error::TrySendError::Closed(signal)) => {
                tracing::warn!(?signal, "precedent relay closed; dropping signal");
            }
        }
    }
}
