// src/engine/control.rs

//! Operator stop command for one reconciliation loop.

use tokio::sync::oneshot;
use tracing::debug;

/// Create a connected stop handle / signal pair.
pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = oneshot::channel();
    (
        StopHandle { tx: Some(tx) },
        StopSignal {
            rx: Some(rx),
            pending: false,
        },
    )
}

/// Held by the operator side; requests a stop once.
#[derive(Debug)]
pub struct StopHandle {
    tx: Option<oneshot::Sender<()>>,
}

impl StopHandle {
    /// Request a stop. Returns `false` if a stop was already requested or
    /// the loop has gone away.
    pub fn stop(&mut self) -> bool {
        match self.tx.take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }
}

/// Held by the loop.
#[derive(Debug)]
pub struct StopSignal {
    rx: Option<oneshot::Receiver<()>>,
    /// Received but not yet acted on.
    pending: bool,
}

impl StopSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self {
            rx: None,
            pending: false,
        }
    }

    /// Take a received stop request, if any. Returns `true` once per stop.
    pub fn take_request(&mut self) -> bool {
        if let Some(rx) = self.rx.as_mut() {
            match rx.try_recv() {
                Ok(()) => {
                    self.pending = true;
                    self.rx = None;
                }
                Err(oneshot::error::TryRecvError::Closed) => {
                    debug!("stop handle dropped without requesting a stop");
                    self.rx = None;
                }
                Err(oneshot::error::TryRecvError::Empty) => {}
            }
        }
        std::mem::take(&mut self.pending)
    }

    /// Resolve when a stop arrives. Pends forever if none can arrive anymore.
    pub async fn requested(&mut self) {
        let Some(rx) = self.rx.as_mut() else {
            return std::future::pending().await;
        };
        let received = rx.await.is_ok();
        self.rx = None;
        if received {
            self.pending = true;
        } else {
            std::future::pending::<()>().await;
        }
    }
}
