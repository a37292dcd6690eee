//! Operator-style entry points on every [`Source`].

use crate::matcher::Equals;
use crate::retry::{RetryOnSource, RetrySpec};
use crate::source::{NoRecovery, Recovery, Source};
use crate::subscriber::{subscribe, Delivery, Signal, Subscription};
use tower_service::Service;

/// Combinators available on every [`Source`].
pub trait SourceExt: Source + Sized {
    /// Resubscribe up to `retries` times when a subscription fails with `target`.
    fn retry_on(
        self,
        target: Self::Error,
        retries: usize,
    ) -> RetryOnSource<Self, Equals<Self::Error>, NoRecovery>
    where
        Self::Error: PartialEq,
    {
        self.retry_with(RetrySpec::new(target, retries))
    }

    /// Like [`retry_on`](Self::retry_on), running `recovery` to completion before each retry.
    fn retry_on_with<R>(
        self,
        target: Self::Error,
        retries: usize,
        recovery: R,
    ) -> RetryOnSource<Self, Equals<Self::Error>, R>
    where
        Self::Error: PartialEq,
        R: Recovery<Self::Error>,
    {
        self.retry_with(RetrySpec::new(target, retries).with_recovery(recovery))
    }

    /// Apply an arbitrary [`RetrySpec`].
    fn retry_with<M, R>(self, spec: RetrySpec<M, R>) -> RetryOnSource<Self, M, R> {
        RetryOnSource::new(self, spec)
    }

    /// Subscribe and push the signals into `sink`.
    ///
    /// See [`subscribe`](crate::subscribe) for the delivery contract.
    fn deliver<K>(&mut self, sink: K) -> (Subscription, Delivery<K::Error>)
    where
        Self::Stream: Send + 'static,
        Self::Item: Send + 'static,
        Self::Error: Send + 'static,
        K: Service<Signal<Self::Item, Self::Error>, Response = ()> + Send + 'static,
        K::Error: Send + 'static,
        K::Future: Send,
    {
        subscribe(self.subscribe(), sink)
    }
}

impl<S: Source> SourceExt for S {}
