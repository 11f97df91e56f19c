//! Graceful shutdown utilities

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing::warn;

/// Shared stop signal for background loops
///
/// Each loop takes its own `notifier()` and selects on `notified()`.
/// `trigger` stores a permit in every notifier, so a loop that is busy when
/// shutdown starts still stops at its next poll.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    notifiers: Arc<Mutex<Vec<Arc<Notify>>>>,
    triggered: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier that fires on `trigger`; already fired if triggered
    pub fn notifier(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        match self.notifiers.lock() {
            Ok(mut notifiers) if !self.is_triggered() => notifiers.push(Arc::clone(&notify)),
            _ => notify.notify_one(),
        }
        notify
    }

    pub fn trigger(&self) {
        let notifiers = match self.notifiers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if self.triggered.swap(true, Ordering::AcqRel) {
            return;
        }
        for notify in notifiers.iter() {
            notify.notify_one();
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }
}

/// Wait for Ctrl+C, or SIGTERM on Unix
pub async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let term_signal = match signal(SignalKind::terminate()) {
            Ok(sig) => Some(sig),
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}. Only Ctrl+C will stop the service", e);
                None
            },
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = async {
                match term_signal {
                    Some(mut sig) => { sig.recv().await; },
                    None => std::future::pending::<()>().await,
                }
            } => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
