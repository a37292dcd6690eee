//! Push-model delivery.
//!
//! [`subscribe`] pumps a stream of `Result<T, E>` into a downstream sink as [`Signal`]s: zero or
//! more `Next` values followed by exactly one `Complete` or `Fail`. A sink is any
//! `tower::Service<Signal<T, E>, Response = ()>`; readiness is awaited before every signal.
//!
//! Delivery runs wherever the caller polls the returned [`Delivery`] future; nothing is spawned.
//! The [`Subscription`] handle cancels it: once cancelled no further signal reaches the sink, and
//! the upstream stream is dropped inside [`Subscription::cancel`] itself, whether or not the
//! delivery future is ever polled again.

use futures::future::{AbortHandle, Abortable, BoxFuture, FutureExt};
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use tower::ServiceExt;
use tower_service::Service;

/// One signal delivered to a downstream sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal<T, E> {
    /// A value.
    Next(T),
    /// Normal completion (terminal).
    Complete,
    /// Failure (terminal).
    Fail(E),
}

impl<T, E> Signal<T, E> {
    /// `true` for `Complete` and `Fail`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Signal::Next(_))
    }
}

/// How a delivery ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The upstream completed and `Complete` was delivered.
    Completed,
    /// The upstream failed and `Fail` was delivered.
    Failed,
    /// The subscription was cancelled before a terminal signal.
    Cancelled,
}

/// Errors raised while delivering signals.
#[derive(thiserror::Error, Debug)]
pub enum DeliveryError<K> {
    /// The sink failed to become ready or to accept a signal; delivery stopped.
    #[error("downstream sink rejected a signal: {0}")]
    Rejected(#[source] K),
}

/// Future driving one subscription. Run it on any executor.
pub type Delivery<K> = BoxFuture<'static, Result<Termination, DeliveryError<K>>>;

type Release = Box<dyn Fn() + Send + Sync>;

/// Cancellation handle for one delivery.
///
/// Cancels on drop unless [`detach`](Self::detach)ed.
pub struct Subscription {
    handle: Option<AbortHandle>,
    release: Option<Release>,
}

impl Subscription {
    /// Stop delivery and drop the upstream stream. No signal reaches the sink afterwards.
    pub fn cancel(&self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
        if let Some(release) = &self.release {
            release();
        }
    }

    /// `true` once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.handle.as_ref().is_some_and(AbortHandle::is_aborted)
    }

    /// Let delivery run to its natural end even if this handle is dropped.
    pub fn detach(mut self) {
        self.handle = None;
        self.release = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("attached", &self.handle.is_some())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Upstream stream shared by a delivery and its [`Subscription`].
///
/// Either side can release it; once released the slot stays pending forever, leaving the abort
/// (always raised first) to end the delivery.
struct Slot<St> {
    stream: Arc<Mutex<Option<Pin<Box<St>>>>>,
}

impl<St> Slot<St> {
    fn new(stream: St) -> Self {
        Self { stream: Arc::new(Mutex::new(Some(Box::pin(stream)))) }
    }

    fn release(&self) {
        let upstream = self.stream.lock().unwrap_or_else(PoisonError::into_inner).take();
        // dropped outside the lock
        drop(upstream);
    }
}

impl<St> Clone for Slot<St> {
    fn clone(&self) -> Self {
        Self { stream: self.stream.clone() }
    }
}

impl<St: Stream> Stream for Slot<St> {
    type Item = St::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut upstream = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        match upstream.as_mut() {
            Some(stream) => stream.as_mut().poll_next(cx),
            None => Poll::Pending,
        }
    }
}

/// Deliver `stream` into `sink`.
///
/// Returns the cancellation handle and the future that performs delivery. The upstream is
/// dropped as soon as delivery ends, fails, or is cancelled.
pub fn subscribe<St, T, E, K>(stream: St, sink: K) -> (Subscription, Delivery<K::Error>)
where
    St: Stream<Item = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
    K: Service<Signal<T, E>, Response = ()> + Send + 'static,
    K::Error: Send + 'static,
    K::Future: Send,
{
    let slot = Slot::new(stream);
    let releaser = slot.clone();
    let release: Release = Box::new(move || releaser.release());

    let (handle, registration) = AbortHandle::new_pair();
    let delivery: Delivery<K::Error> = Box::pin(
        Abortable::new(deliver(slot, sink), registration)
            .map(|outcome| outcome.unwrap_or(Ok(Termination::Cancelled))),
    );
    (Subscription { handle: Some(handle), release: Some(release) }, delivery)
}

async fn deliver<St, T, E, K>(
    slot: Slot<St>,
    mut sink: K,
) -> Result<Termination, DeliveryError<K::Error>>
where
    St: Stream<Item = Result<T, E>>,
    K: Service<Signal<T, E>, Response = ()>,
{
    let mut upstream = slot;
    let outcome = pump(&mut upstream, &mut sink).await;
    upstream.release();
    outcome
}

async fn pump<St, T, E, K>(
    upstream: &mut Slot<St>,
    sink: &mut K,
) -> Result<Termination, DeliveryError<K::Error>>
where
    St: Stream<Item = Result<T, E>>,
    K: Service<Signal<T, E>, Response = ()>,
{
    while let Some(item) = upstream.next().await {
        match item {
            Ok(value) => push(sink, Signal::Next(value)).await?,
            Err(error) => {
                upstream.release();
                push(sink, Signal::Fail(error)).await?;
                return Ok(Termination::Failed);
            }
        }
    }
    upstream.release();
    push(sink, Signal::Complete).await?;
    Ok(Termination::Completed)
}

async fn push<K, T, E>(sink: &mut K, signal: Signal<T, E>) -> Result<(), DeliveryError<K::Error>>
where
    K: Service<Signal<T, E>, Response = ()>,
{
    let ready = sink.ready().await.map_err(DeliveryError::Rejected)?;
    ready.call(signal).await.map_err(DeliveryError::Rejected)
}

/// A sink that records every signal in memory.
#[derive(Debug)]
pub struct MemorySubscriber<T, E> {
    signals: Arc<Mutex<Vec<Signal<T, E>>>>,
}

impl<T, E> Clone for MemorySubscriber<T, E> {
    fn clone(&self) -> Self {
        Self { signals: self.signals.clone() }
    }
}

impl<T, E> Default for MemorySubscriber<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> MemorySubscriber<T, E> {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self { signals: Arc::new(Mutex::new(Vec::new())) }
    }

    /// Number of signals received.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// `true` until the first signal arrives.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// `true` once a terminal signal arrived.
    pub fn terminated(&self) -> bool {
        self.lock().last().is_some_and(Signal::is_terminal)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Signal<T, E>>> {
        self.signals.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone, E: Clone> MemorySubscriber<T, E> {
    /// Every signal received, in order.
    pub fn signals(&self) -> Vec<Signal<T, E>> {
        self.lock().clone()
    }

    /// Only the values received.
    pub fn values(&self) -> Vec<T> {
        self.lock()
            .iter()
            .filter_map(|s| match s {
                Signal::Next(v) => Some(v.clone()),
                _ => None,
            })
            .collect()
    }
}

impl<T, E> Service<Signal<T, E>> for MemorySubscriber<T, E> {
    type Response = ();
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, signal: Signal<T, E>) -> Self::Future {
        self.lock().push(signal);
        Box::pin(async { Ok(()) })
    }
}
