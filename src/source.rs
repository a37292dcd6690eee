//! Resubscribable producers.
//!
//! A [`Source`] is a factory: every call to [`Source::subscribe`] starts a fresh, independent
//! attempt and hands back the stream for that attempt. Retrying is nothing more than calling the
//! factory again, so side effects are re-run per attempt and nothing is memoized between them.
//!
//! Signals map onto the stream protocol as follows:
//! - `Some(Ok(value))` is a value.
//! - `Some(Err(error))` is the terminal failure; nothing after it is read.
//! - `None` is completion.
//! - Dropping the stream cancels the subscription.

use futures::stream::{self, Stream};
use std::convert::Infallible;
use std::marker::PhantomData;

/// A producer that can be subscribed to any number of times.
pub trait Source {
    /// Values produced by a subscription.
    type Item;
    /// Failure that terminates a subscription.
    type Error;
    /// The stream backing a single subscription.
    type Stream: Stream<Item = Result<Self::Item, Self::Error>>;

    /// Start a new, independent subscription.
    fn subscribe(&mut self) -> Self::Stream;
}

impl<F, St, T, E> Source for F
where
    F: FnMut() -> St,
    St: Stream<Item = Result<T, E>>,
{
    type Item = T;
    type Error = E;
    type Stream = St;

    fn subscribe(&mut self) -> St {
        self()
    }
}

/// A producer run to completion before a retry.
///
/// Only the terminal signal of the gate matters: values are discarded and a failure is forwarded
/// downstream after conversion into the downstream error type `E`. Every [`Source`] whose error
/// converts into `E` is a `Recovery<E>`.
pub trait Recovery<E> {
    /// Values emitted by the gate (ignored).
    type Item;
    /// Failure of the gate, surfaced downstream as `E`.
    type Error: Into<E>;
    /// The stream backing one gate run.
    type Gate: Stream<Item = Result<Self::Item, Self::Error>>;

    /// Start a new gate run.
    fn start(&mut self) -> Self::Gate;
}

impl<S, E> Recovery<E> for S
where
    S: Source,
    S::Error: Into<E>,
{
    type Item = S::Item;
    type Error = S::Error;
    type Gate = S::Stream;

    fn start(&mut self) -> Self::Gate {
        self.subscribe()
    }
}

/// Placeholder recovery type for specs without a recovery producer.
///
/// Never started: a spec carrying `NoRecovery` stores `None` for its recovery slot.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NoRecovery;

impl<E> Recovery<E> for NoRecovery {
    type Item = Infallible;
    type Error = E;
    type Gate = stream::Empty<Result<Infallible, E>>;

    fn start(&mut self) -> Self::Gate {
        stream::empty()
    }
}

/// Source that completes immediately without values.
///
/// Handy as a recovery step whose only purpose is to order a retry, and in tests.
pub struct Empty<T, E> {
    _marker: PhantomData<fn() -> (T, E)>,
}

impl<T, E> Empty<T, E> {
    /// Create an empty source.
    pub fn new() -> Self {
        Self { _marker: PhantomData }
    }
}

impl<T, E> Default for Empty<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Clone for Empty<T, E> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T, E> std::fmt::Debug for Empty<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Empty")
    }
}

impl<T, E> Source for Empty<T, E> {
    type Item = T;
    type Error = E;
    type Stream = stream::Empty<Result<T, E>>;

    fn subscribe(&mut self) -> Self::Stream {
        stream::empty()
    }
}
