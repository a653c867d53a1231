//! Turns the backend's callback-style completions into futures.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::channel::oneshot;
use parking_lot::Mutex;

use crate::BackendError;

type Sender<T> = oneshot::Sender<Result<T, BackendError>>;

/// Single-fire handle a backend uses to report the outcome of an asynchronous
/// operation.
///
/// Clones share the same slot: only the first call to [`Completion::complete`]
/// is delivered, every later one is dropped.
pub struct Completion<T> {
    slot: Arc<Mutex<Option<Sender<T>>>>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<T> Completion<T> {
    /// Delivers `result`. Returns false if a result was already delivered.
    pub fn complete(&self, result: Result<T, BackendError>) -> bool {
        let Some(tx) = self.slot.lock().take() else {
            tracing::debug!("ignoring repeated completion");
            return false;
        };
        // the receiver is gone if the capture was dropped while waiting
        let _ = tx.send(result);
        true
    }

    pub fn succeed(&self, value: T) -> bool {
        self.complete(Ok(value))
    }

    pub fn fail(&self, error: BackendError) -> bool {
        self.complete(Err(error))
    }

    pub fn is_completed(&self) -> bool {
        self.slot.lock().is_none()
    }
}

/// Resolves with whatever the paired [`Completion`] delivered.
pub(crate) struct Pending<T> {
    rx: oneshot::Receiver<Result<T, BackendError>>,
}

impl<T> Future for Pending<T> {
    type Output = Result<T, BackendError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(BackendError::new(
                "backend dropped the completion without reporting a result",
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

pub(crate) fn completion<T>() -> (Completion<T>, Pending<T>) {
    let (tx, rx) = oneshot::channel();
    let completion = Completion {
        slot: Arc::new(Mutex::new(Some(tx))),
    };
    (completion, Pending { rx })
}
