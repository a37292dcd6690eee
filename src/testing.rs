//! Test doubles for sources.
//!
//! [`ScriptedSource`] replays a fixed script per subscription and records how it was used:
//! subscriptions made, streams still alive, and the highest number of streams alive at once.
//! Clones share the script and the counters, so a test can hand one clone to the combinator and
//! keep another for assertions.

use crate::source::Source;
use futures::stream::Stream;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

#[derive(Debug)]
struct Counters {
    subscriptions: AtomicUsize,
    active: AtomicUsize,
    max_concurrent: AtomicUsize,
}

/// A source that replays one script per subscription.
///
/// Subscription `n` replays script `n`; once the scripts run out the last one repeats. An empty
/// source (no scripts) completes immediately. With [`pending`](Self::pending), streams stay
/// pending after their script instead of completing, which lets tests cancel mid-flight.
#[derive(Debug)]
pub struct ScriptedSource<T, E> {
    scripts: Arc<Mutex<Vec<Vec<Result<T, E>>>>>,
    counters: Arc<Counters>,
    hang: bool,
}

impl<T, E> Clone for ScriptedSource<T, E> {
    fn clone(&self) -> Self {
        Self { scripts: self.scripts.clone(), counters: self.counters.clone(), hang: self.hang }
    }
}

impl<T, E> Default for ScriptedSource<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> ScriptedSource<T, E> {
    /// A source with no scripts yet.
    pub fn new() -> Self {
        Self {
            scripts: Arc::new(Mutex::new(Vec::new())),
            counters: Arc::new(Counters {
                subscriptions: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                max_concurrent: AtomicUsize::new(0),
            }),
            hang: false,
        }
    }

    /// Append the script for the next subscription.
    pub fn attempt(self, items: Vec<Result<T, E>>) -> Self {
        self.scripts.lock().unwrap_or_else(PoisonError::into_inner).push(items);
        self
    }

    /// Keep streams pending after their script runs out.
    pub fn pending(mut self) -> Self {
        self.hang = true;
        self
    }

    /// Number of subscriptions made so far.
    pub fn subscriptions(&self) -> usize {
        self.counters.subscriptions.load(Ordering::SeqCst)
    }

    /// Streams created and not yet dropped.
    pub fn active(&self) -> usize {
        self.counters.active.load(Ordering::SeqCst)
    }

    /// Highest number of streams alive at the same time.
    pub fn max_concurrent(&self) -> usize {
        self.counters.max_concurrent.load(Ordering::SeqCst)
    }
}

impl<T: Clone, E: Clone> Source for ScriptedSource<T, E> {
    type Item = T;
    type Error = E;
    type Stream = ScriptStream<T, E>;

    fn subscribe(&mut self) -> Self::Stream {
        let index = self.counters.subscriptions.fetch_add(1, Ordering::SeqCst);
        let items = {
            let scripts = self.scripts.lock().unwrap_or_else(PoisonError::into_inner);
            scripts.get(index).or_else(|| scripts.last()).cloned().unwrap_or_default()
        };
        let active = self.counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_concurrent.fetch_max(active, Ordering::SeqCst);
        ScriptStream {
            items: items.into(),
            hang: self.hang,
            _guard: ActiveGuard(self.counters.clone()),
        }
    }
}

#[derive(Debug)]
struct ActiveGuard(Arc<Counters>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Stream for one [`ScriptedSource`] subscription.
#[derive(Debug)]
pub struct ScriptStream<T, E> {
    items: VecDeque<Result<T, E>>,
    hang: bool,
    _guard: ActiveGuard,
}

impl<T, E> Unpin for ScriptStream<T, E> {}

impl<T, E> Stream for ScriptStream<T, E> {
    type Item = Result<T, E>;

    fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.items.pop_front() {
            Some(item) => Poll::Ready(Some(item)),
            None if self.hang => Poll::Pending,
            None => Poll::Ready(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use futures::{FutureExt, StreamExt};

    #[test]
    fn replays_scripts_in_order_then_repeats_last() {
        let mut source = ScriptedSource::<u8, &'static str>::new()
            .attempt(vec![Err("first")])
            .attempt(vec![Ok(1), Ok(2)]);

        let a: Vec<_> = block_on(source.subscribe().collect());
        let b: Vec<_> = block_on(source.subscribe().collect());
        let c: Vec<_> = block_on(source.subscribe().collect());

        assert_eq!(a, vec![Err("first")]);
        assert_eq!(b, vec![Ok(1), Ok(2)]);
        assert_eq!(c, b);
        assert_eq!(source.subscriptions(), 3);
    }

    #[test]
    fn without_scripts_completes_immediately() {
        let mut source = ScriptedSource::<u8, ()>::new();
        let items: Vec<_> = block_on(source.subscribe().collect());
        assert!(items.is_empty());
    }

    #[test]
    fn tracks_live_streams() {
        let mut source = ScriptedSource::<u8, ()>::new().attempt(vec![Ok(1)]);
        let first = source.subscribe();
        let second = source.subscribe();
        assert_eq!(source.active(), 2);
        assert_eq!(source.max_concurrent(), 2);
        drop(first);
        drop(second);
        assert_eq!(source.active(), 0);
        assert_eq!(source.max_concurrent(), 2);
    }

    #[test]
    fn pending_streams_do_not_complete() {
        let mut source = ScriptedSource::<u8, ()>::new().attempt(vec![Ok(1)]).pending();
        let mut stream = source.subscribe();
        assert_eq!(stream.next().now_or_never(), Some(Some(Ok(1))));
        assert!(stream.next().now_or_never().is_none());
    }
}
