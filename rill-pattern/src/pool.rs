//! Pool plumbing shared by producers and consumers: the shutdown signal and
//! the future returned by `start()`.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{PatternError, PatternResult};

/// Resolves to the status of every worker of a pool, ordered by worker id.
///
/// Dropping the future does not stop the pool; use the pool's `close()`.
#[derive(Debug)]
#[must_use = "a pool future does nothing unless awaited"]
pub struct PoolFuture<S> {
    handle: JoinHandle<PatternResult<Vec<S>>>,
}

impl<S> PoolFuture<S> {
    pub(crate) const fn new(handle: JoinHandle<PatternResult<Vec<S>>>) -> Self {
        Self { handle }
    }

    /// Returns true once every worker has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl<S> Future for PoolFuture<S> {
    type Output = PatternResult<Vec<S>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.handle).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(err)) => Poll::Ready(Err(PatternError::from_join(err))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Sending half of a pool's shutdown signal.
#[derive(Debug)]
pub(crate) struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Signals every subscriber. A closed pool stays closed.
    pub(crate) fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub(crate) fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiving half of a pool's shutdown signal, one per worker.
#[derive(Debug, Clone)]
pub(crate) struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Completes once the pool is closed.
    ///
    /// Never completes if the pool was dropped without being closed: its
    /// workers run to completion.
    pub(crate) async fn cancelled(&mut self) {
        if self.rx.wait_for(|closed| *closed).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
