//! Conditional resubscription.
//!
//! [`RetryOn`] wraps a [`Source`] and resubscribes to it when it fails with the target error,
//! optionally running a [`Recovery`] producer to completion first.
//!
//! Semantics:
//! - Values and completion of the current attempt pass through untouched.
//! - A failure that the matcher rejects is forwarded immediately.
//! - A matching failure with no retries left is forwarded immediately; the recovery producer is
//!   not started.
//! - A matching failure with retries left starts the recovery producer (when configured), whose
//!   values are discarded. Its completion triggers the resubscription; its failure is forwarded
//!   instead of the original one.
//! - The combinator never wraps or annotates failures.
//!
//! Invariants:
//! - At most `max_retries + 1` source subscriptions per downstream subscription.
//! - At most one upstream stream is alive at a time; the previous one is dropped before the next
//!   subscription is made.
//! - Dropping the [`RetryOn`] stream drops the active upstream. Nothing is subscribed afterwards.
//! - Retries run in a loop inside `poll_next`; the budget never turns into recursion depth.
//!
//! Example
//! ```rust
//! use futures::{executor::block_on, stream, StreamExt};
//! use retry_on::{RetrySpec, Source, SourceExt};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! #[derive(Debug, Clone, PartialEq)]
//! enum FetchError { Stale, Gone }
//!
//! let calls = Arc::new(AtomicUsize::new(0));
//! let counter = calls.clone();
//! let fetch = move || {
//!     let n = counter.fetch_add(1, Ordering::SeqCst);
//!     let item = if n == 0 { Err(FetchError::Stale) } else { Ok(n) };
//!     stream::iter(vec![item])
//! };
//!
//! let mut retried = fetch.retry_on(FetchError::Stale, 2);
//! let items: Vec<_> = block_on(retried.subscribe().collect());
//!
//! assert_eq!(items, vec![Ok(1)]);
//! assert_eq!(calls.load(Ordering::SeqCst), 2);
//! ```

use crate::matcher::{Equals, ErrorMatcher, Projected};
use crate::source::{NoRecovery, Recovery, Source};
use crate::telemetry::{emit, RetryOnEvent};
use futures::stream::{FusedStream, Stream};
use pin_project::pin_project;
use std::fmt;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

/// Immutable retry configuration: target matcher, retry budget, optional recovery producer.
#[derive(Clone)]
pub struct RetrySpec<M, R = NoRecovery> {
    matcher: M,
    max_retries: usize,
    recovery: Option<R>,
}

impl<E> RetrySpec<Equals<E>> {
    /// Retry up to `max_retries` times on failures equal to `target`.
    pub fn new(target: E, max_retries: usize) -> Self {
        Self::with_matcher(Equals::new(target), max_retries)
    }
}

impl<T, F> RetrySpec<Projected<T, F>> {
    /// Retry on failures whose projection equals `target`.
    ///
    /// Failures the projection maps to `None` are forwarded without retry.
    pub fn projected<E>(target: T, max_retries: usize, project: F) -> Self
    where
        F: Fn(&E) -> Option<&T>,
    {
        Self::with_matcher(Projected::new(target, project), max_retries)
    }
}

impl<M> RetrySpec<M> {
    /// Retry on failures accepted by `matcher`.
    pub fn with_matcher(matcher: M, max_retries: usize) -> Self {
        Self { matcher, max_retries, recovery: None }
    }
}

impl<M, R> RetrySpec<M, R> {
    /// Run `recovery` to completion before every retry.
    pub fn with_recovery<R2>(self, recovery: R2) -> RetrySpec<M, R2> {
        RetrySpec { matcher: self.matcher, max_retries: self.max_retries, recovery: Some(recovery) }
    }

    /// Maximum number of resubscriptions.
    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    /// Matcher deciding retry eligibility.
    pub fn matcher(&self) -> &M {
        &self.matcher
    }

    /// Recovery producer, if configured.
    pub fn recovery(&self) -> Option<&R> {
        self.recovery.as_ref()
    }
}

impl<M, R> fmt::Debug for RetrySpec<M, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetrySpec")
            .field("matcher", &"<matcher>")
            .field("max_retries", &self.max_retries)
            .field("recovery", &self.recovery.as_ref().map(|_| "<recovery>"))
            .finish()
    }
}

/// Position of a subscription within its retry budget.
///
/// Records are never modified; [`Attempt::next`] derives the record for the following attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    number: usize,
    remaining: usize,
}

impl Attempt {
    /// The first attempt of a subscription with `max_retries` retries available.
    pub fn first(max_retries: usize) -> Self {
        Self { number: 1, remaining: max_retries }
    }

    /// The following attempt, or `None` once the budget is spent.
    pub fn next(self) -> Option<Self> {
        let remaining = self.remaining.checked_sub(1)?;
        Some(Self { number: self.number.saturating_add(1), remaining })
    }

    /// 1-indexed attempt number (equals the number of source subscriptions so far).
    pub fn number(&self) -> usize {
        self.number
    }

    /// Retries still available.
    pub fn remaining(&self) -> usize {
        self.remaining
    }
}

/// Recovery values discarded in one `poll_next` before yielding to the executor.
const DISCARD_BUDGET: usize = 128;

#[pin_project(project = StateProj)]
enum State<St, Rt> {
    Subscribed(#[pin] St),
    Recovering(#[pin] Rt),
    Terminated,
}

enum Step<T, E> {
    Emit(Option<Result<T, E>>),
    Retry,
    Resubscribe,
}

/// Stream produced by one subscription to a [`RetryOnSource`] (or built with [`RetryOn::new`]).
#[pin_project]
pub struct RetryOn<S, M, R = NoRecovery>
where
    S: Source,
    R: Recovery<S::Error>,
{
    source: S,
    matcher: M,
    recovery: Option<R>,
    attempt: Attempt,
    #[pin]
    state: State<S::Stream, R::Gate>,
}

impl<S, M, R> RetryOn<S, M, R>
where
    S: Source,
    R: Recovery<S::Error>,
{
    /// Subscribe to `source` under `spec`.
    ///
    /// The first source subscription happens here, not on first poll.
    pub fn new(mut source: S, spec: RetrySpec<M, R>) -> Self {
        let RetrySpec { matcher, max_retries, recovery } = spec;
        let state = State::Subscribed(source.subscribe());
        Self { source, matcher, recovery, attempt: Attempt::first(max_retries), state }
    }

    /// Current attempt record.
    pub fn attempt(&self) -> Attempt {
        self.attempt
    }

    /// `true` while the recovery producer is running.
    pub fn is_recovering(&self) -> bool {
        matches!(self.state, State::Recovering(_))
    }
}

impl<S, M, R> Stream for RetryOn<S, M, R>
where
    S: Source,
    M: ErrorMatcher<S::Error>,
    R: Recovery<S::Error>,
{
    type Item = Result<S::Item, S::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        let mut discarded = 0;
        loop {
            let step: Step<S::Item, S::Error> = match this.state.as_mut().project() {
                StateProj::Subscribed(stream) => match ready!(stream.poll_next(cx)) {
                    Some(Ok(value)) => return Poll::Ready(Some(Ok(value))),
                    None => Step::Emit(None),
                    Some(Err(error)) => {
                        let attempt = *this.attempt;
                        if !this.matcher.matches(&error) {
                            emit(RetryOnEvent::Unmatched { attempt: attempt.number() });
                            Step::Emit(Some(Err(error)))
                        } else if let Some(next) = attempt.next() {
                            *this.attempt = next;
                            Step::Retry
                        } else {
                            emit(RetryOnEvent::Exhausted { attempts: attempt.number() });
                            Step::Emit(Some(Err(error)))
                        }
                    }
                },
                StateProj::Recovering(gate) => match ready!(gate.poll_next(cx)) {
                    Some(Ok(_)) => {
                        discarded += 1;
                        if discarded >= DISCARD_BUDGET {
                            cx.waker().wake_by_ref();
                            return Poll::Pending;
                        }
                        continue;
                    }
                    Some(Err(error)) => {
                        // the attempt record already points at the abandoned retry
                        let abandoned = this.attempt.number() - 1;
                        emit(RetryOnEvent::RecoveryFailed { attempt: abandoned });
                        Step::Emit(Some(Err(error.into())))
                    }
                    None => Step::Resubscribe,
                },
                StateProj::Terminated => return Poll::Ready(None),
            };

            // Drop the finished upstream before anything new is subscribed.
            this.state.set(State::Terminated);
            match step {
                Step::Emit(signal) => return Poll::Ready(signal),
                Step::Retry => match this.recovery.as_mut() {
                    Some(recovery) => {
                        emit(RetryOnEvent::Recovering { attempt: this.attempt.number() - 1 });
                        this.state.set(State::Recovering(recovery.start()));
                    }
                    None => resubscribe(&mut *this.source, *this.attempt, this.state.as_mut()),
                },
                Step::Resubscribe => {
                    resubscribe(&mut *this.source, *this.attempt, this.state.as_mut())
                }
            }
        }
    }
}

fn resubscribe<S, Rt>(
    source: &mut S,
    attempt: Attempt,
    mut state: Pin<&mut State<S::Stream, Rt>>,
) where
    S: Source,
{
    emit(RetryOnEvent::Resubscribed { attempt: attempt.number(), remaining: attempt.remaining() });
    state.set(State::Subscribed(source.subscribe()));
}

impl<S, M, R> FusedStream for RetryOn<S, M, R>
where
    S: Source,
    M: ErrorMatcher<S::Error>,
    R: Recovery<S::Error>,
{
    fn is_terminated(&self) -> bool {
        matches!(self.state, State::Terminated)
    }
}

impl<S, M, R> fmt::Debug for RetryOn<S, M, R>
where
    S: Source,
    R: Recovery<S::Error>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            State::Subscribed(_) => "subscribed",
            State::Recovering(_) => "recovering",
            State::Terminated => "terminated",
        };
        f.debug_struct("RetryOn").field("attempt", &self.attempt).field("state", &state).finish()
    }
}

/// A [`Source`] that applies a [`RetrySpec`] to every subscription of an inner source.
///
/// Each subscription gets its own copy of the inner factory and of the [`RetrySpec`], so
/// subscriptions never share budget or state.
#[derive(Clone)]
pub struct RetryOnSource<S, M, R = NoRecovery> {
    source: S,
    spec: RetrySpec<M, R>,
}

impl<S, M, R> RetryOnSource<S, M, R> {
    /// Wrap `source` with `spec`.
    pub fn new(source: S, spec: RetrySpec<M, R>) -> Self {
        Self { source, spec }
    }

    /// The configuration applied to each subscription.
    pub fn spec(&self) -> &RetrySpec<M, R> {
        &self.spec
    }

    /// Unwrap the inner source.
    pub fn into_inner(self) -> S {
        self.source
    }
}

impl<S, M, R> fmt::Debug for RetryOnSource<S, M, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOnSource")
            .field("source", &"<source>")
            .field("spec", &self.spec)
            .finish()
    }
}

impl<S, M, R> Source for RetryOnSource<S, M, R>
where
    S: Source + Clone,
    M: ErrorMatcher<S::Error> + Clone,
    R: Recovery<S::Error> + Clone,
{
    type Item = S::Item;
    type Error = S::Error;
    type Stream = RetryOn<S, M, R>;

    fn subscribe(&mut self) -> Self::Stream {
        RetryOn::new(self.source.clone(), self.spec.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedSource;
    use futures::executor::block_on;
    use futures::{stream, FutureExt, StreamExt};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum TestError {
        E1,
        E2,
    }

    fn collect<St: Stream + Unpin>(stream: St) -> Vec<St::Item> {
        block_on(stream.collect())
    }

    #[test]
    fn attempt_records_count_down() {
        let first = Attempt::first(2);
        assert_eq!((first.number(), first.remaining()), (1, 2));
        let second = first.next().unwrap();
        assert_eq!((second.number(), second.remaining()), (2, 1));
        let third = second.next().unwrap();
        assert_eq!((third.number(), third.remaining()), (3, 0));
        assert!(third.next().is_none());
        // records are values; deriving doesn't touch the original
        assert_eq!(first.remaining(), 2);
    }

    #[test]
    fn values_and_completion_pass_through() {
        let source =
            ScriptedSource::<i32, TestError>::new().attempt(vec![Ok(1), Ok(2), Ok(3)]);
        let stream = RetryOn::new(source.clone(), RetrySpec::new(TestError::E1, 3));
        assert_eq!(collect(stream), vec![Ok(1), Ok(2), Ok(3)]);
        assert_eq!(source.subscriptions(), 1);
    }

    #[test]
    fn retries_once_then_succeeds() {
        let source = ScriptedSource::new()
            .attempt(vec![Ok(10), Err(TestError::E1)])
            .attempt(vec![Ok(20), Ok(21)]);
        let stream = RetryOn::new(source.clone(), RetrySpec::new(TestError::E1, 1));

        // values from the failed attempt were already delivered; the sink sees one stream
        assert_eq!(collect(stream), vec![Ok(10), Ok(20), Ok(21)]);
        assert_eq!(source.subscriptions(), 2);
    }

    #[test]
    fn always_failing_source_is_subscribed_budget_plus_one_times() {
        for retries in 0..6 {
            let source = ScriptedSource::<u8, _>::new().attempt(vec![Err(TestError::E1)]);
            let stream = RetryOn::new(source.clone(), RetrySpec::new(TestError::E1, retries));
            assert_eq!(collect(stream), vec![Err(TestError::E1)]);
            assert_eq!(source.subscriptions(), retries + 1);
        }
    }

    #[test]
    fn unmatched_failure_is_forwarded_without_retry() {
        let source = ScriptedSource::<u8, _>::new().attempt(vec![Err(TestError::E2)]);
        let stream = RetryOn::new(source.clone(), RetrySpec::new(TestError::E1, 3));
        assert_eq!(collect(stream), vec![Err(TestError::E2)]);
        assert_eq!(source.subscriptions(), 1);
    }

    #[test]
    fn zero_budget_skips_recovery() {
        let source = ScriptedSource::<u8, _>::new().attempt(vec![Err(TestError::E1)]);
        let refresh = ScriptedSource::<(), TestError>::new().attempt(vec![]);
        let spec = RetrySpec::new(TestError::E1, 0).with_recovery(refresh.clone());
        let stream = RetryOn::new(source.clone(), spec);

        assert_eq!(collect(stream), vec![Err(TestError::E1)]);
        assert_eq!(refresh.subscriptions(), 0);
    }

    #[test]
    fn recovery_runs_before_each_retry_and_its_values_are_dropped() {
        let source = ScriptedSource::new()
            .attempt(vec![Err(TestError::E1)])
            .attempt(vec![Err(TestError::E1)])
            .attempt(vec![Ok("done")]);
        let refresh = ScriptedSource::<u32, TestError>::new().attempt(vec![Ok(7), Ok(8)]);
        let spec = RetrySpec::new(TestError::E1, 5).with_recovery(refresh.clone());
        let stream = RetryOn::new(source.clone(), spec);

        assert_eq!(collect(stream), vec![Ok("done")]);
        assert_eq!(source.subscriptions(), 3);
        assert_eq!(refresh.subscriptions(), 2);
        assert_eq!(source.max_concurrent(), 1);
        assert_eq!(refresh.max_concurrent(), 1);
    }

    #[test]
    fn recovery_failure_supersedes_original_failure() {
        #[derive(Debug, Clone, PartialEq)]
        enum Refresh {
            Denied,
        }
        impl From<Refresh> for TestError {
            fn from(_: Refresh) -> Self {
                TestError::E2
            }
        }

        let source = ScriptedSource::<u8, _>::new().attempt(vec![Err(TestError::E1)]);
        let refresh = ScriptedSource::<(), Refresh>::new().attempt(vec![Err(Refresh::Denied)]);
        let spec = RetrySpec::new(TestError::E1, 3).with_recovery(refresh.clone());
        let stream = RetryOn::new(source.clone(), spec);

        assert_eq!(collect(stream), vec![Err(TestError::E2)]);
        assert_eq!(source.subscriptions(), 1, "no resubscription after recovery failure");
        assert_eq!(refresh.subscriptions(), 1);
    }

    #[test]
    fn long_recovery_yields_between_batches_of_discarded_values() {
        let source = ScriptedSource::new().attempt(vec![Err(TestError::E1)]).attempt(vec![Ok(1)]);
        let refresh = || stream::iter((0..10 * DISCARD_BUDGET).map(Ok::<_, TestError>));
        let spec = RetrySpec::new(TestError::E1, 1).with_recovery(refresh);
        let mut stream = RetryOn::new(source.clone(), spec);

        let mut cx = Context::from_waker(futures::task::noop_waker_ref());
        assert!(stream.poll_next_unpin(&mut cx).is_pending());
        assert!(stream.is_recovering());
        assert_eq!(source.subscriptions(), 1);

        // block_on only finishes if each early return woke the task
        assert_eq!(collect(stream), vec![Ok(1)]);
        assert_eq!(source.subscriptions(), 2);
    }

    #[test]
    fn terminated_stream_stays_terminated() {
        let source = ScriptedSource::<u8, _>::new().attempt(vec![Err(TestError::E2)]);
        let mut stream = RetryOn::new(source, RetrySpec::new(TestError::E1, 1));
        assert!(!stream.is_terminated());
        assert_eq!(block_on(stream.next()), Some(Err(TestError::E2)));
        assert!(stream.is_terminated());
        assert_eq!(block_on(stream.next()), None);
        assert_eq!(block_on(stream.next()), None);
    }

    #[test]
    fn dropping_while_subscribed_cancels_source() {
        let source = ScriptedSource::<i32, TestError>::new().attempt(vec![Ok(1)]).pending();
        let mut stream = RetryOn::new(source.clone(), RetrySpec::new(TestError::E1, 2));

        assert_eq!(stream.next().now_or_never(), Some(Some(Ok(1))));
        assert!(stream.next().now_or_never().is_none(), "source is pending");
        assert_eq!(source.active(), 1);

        drop(stream);
        assert_eq!(source.active(), 0);
        assert_eq!(source.subscriptions(), 1);
    }

    #[test]
    fn dropping_while_recovering_cancels_recovery_and_skips_retry() {
        let source = ScriptedSource::<u8, _>::new().attempt(vec![Err(TestError::E1)]);
        let refresh = ScriptedSource::<(), TestError>::new().attempt(vec![]).pending();
        let spec = RetrySpec::new(TestError::E1, 2).with_recovery(refresh.clone());
        let mut stream = RetryOn::new(source.clone(), spec);

        assert!(stream.next().now_or_never().is_none());
        assert!(stream.is_recovering());
        assert_eq!(source.active(), 0, "failed source is released before recovery starts");
        assert_eq!(refresh.active(), 1);

        drop(stream);
        assert_eq!(refresh.active(), 0);
        assert_eq!(source.subscriptions(), 1);
    }

    #[test]
    fn large_budget_does_not_grow_the_stack() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let source = move || {
            counter.fetch_add(1, Ordering::Relaxed);
            stream::iter(vec![Err::<(), _>(TestError::E1)])
        };
        let stream = RetryOn::new(source, RetrySpec::new(TestError::E1, 100_000));

        assert_eq!(collect(stream), vec![Err(TestError::E1)]);
        assert_eq!(calls.load(Ordering::Relaxed), 100_001);
    }

    #[test]
    fn retry_on_source_gives_each_subscription_its_own_budget() {
        let source = ScriptedSource::<u8, _>::new().attempt(vec![Err(TestError::E1)]);
        let mut retried = RetryOnSource::new(source.clone(), RetrySpec::new(TestError::E1, 2));

        assert_eq!(collect(retried.subscribe()), vec![Err(TestError::E1)]);
        assert_eq!(collect(retried.subscribe()), vec![Err(TestError::E1)]);
        assert_eq!(source.subscriptions(), 6);
    }

    #[test]
    fn spec_accessors_and_debug() {
        let spec = RetrySpec::new(TestError::E1, 4);
        assert_eq!(spec.max_retries(), 4);
        assert_eq!(spec.matcher().target(), &TestError::E1);
        assert!(spec.recovery().is_none());
        let spec = spec.with_recovery(crate::source::Empty::<(), TestError>::new());
        let rendered = format!("{:?}", spec);
        assert!(rendered.contains("max_retries: 4"));
        assert!(rendered.contains("<recovery>"));
    }
}
