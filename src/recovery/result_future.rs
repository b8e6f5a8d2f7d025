//! Single-slot deferred value
//!
//! Bridges a push-style completion (someone calls `resolve`) into a
//! pull-style awaited value. Backed by a tokio oneshot channel.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::{Error, Result};

/// Awaitable side of a deferred value
#[derive(Debug)]
pub struct ResultFuture<T> {
    rx: oneshot::Receiver<Result<T>>,
}

/// Completing side of a deferred value
#[derive(Debug)]
pub struct Resolver<T> {
    tx: oneshot::Sender<Result<T>>,
}

impl<T> ResultFuture<T> {
    /// Create a linked future/resolver pair
    pub fn new() -> (ResultFuture<T>, Resolver<T>) {
        let (tx, rx) = oneshot::channel();
        (ResultFuture { rx }, Resolver { tx })
    }
}

impl<T> Future for ResultFuture<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // Resolver dropped without completing
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::RequestAbandoned)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Resolver<T> {
    /// Complete with a value. Returns false if nobody is awaiting anymore.
    pub fn resolve(self, value: T) -> bool {
        self.tx.send(Ok(value)).is_ok()
    }

    /// Complete with an error. Returns false if nobody is awaiting anymore.
    pub fn reject(self, error: Error) -> bool {
        self.tx.send(Err(error)).is_ok()
    }

    /// True once the awaiting side has been dropped
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}
