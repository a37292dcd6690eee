#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # retry-on
//!
//! Conditional, bounded resubscription for fallible async streams.
//!
//! "If this stream fails with exactly this error, optionally run a recovery stream to completion,
//! then subscribe to the original stream again, up to N times."
//!
//! ## Features
//!
//! - **Resubscribable sources**: any `FnMut() -> impl Stream<Item = Result<T, E>>` is a
//!   [`Source`]; every retry calls the factory again
//! - **Exact matching**: retry only on failures equal to a target, or on failures whose
//!   projection equals it ([`Projected`])
//! - **Recovery gates**: run another source to completion before each retry; its values are
//!   discarded and its failure is forwarded
//! - **Cancellation by drop**: dropping the stream drops the active upstream
//! - **Push delivery**: pump any stream into a `tower::Service` sink with a cancellable
//!   [`Subscription`]
//!
//! ## Quick Start
//!
//! ```rust
//! use futures::stream;
//! use retry_on::{MemorySubscriber, Signal, SourceExt, Termination};
//!
//! #[derive(Debug, Clone, PartialEq)]
//! enum ApiError { TokenExpired, NotFound }
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut first = true;
//!     let fetch = move || {
//!         let expired = std::mem::take(&mut first);
//!         let item = if expired { Err(ApiError::TokenExpired) } else { Ok("data") };
//!         stream::iter(vec![item])
//!     };
//!     let refresh = || stream::iter(vec![Ok::<_, ApiError>(())]);
//!
//!     let sink = MemorySubscriber::new();
//!     let mut retried = fetch.retry_on_with(ApiError::TokenExpired, 1, refresh);
//!     let (_subscription, delivery) = retried.deliver(sink.clone());
//!
//!     assert_eq!(delivery.await.unwrap(), Termination::Completed);
//!     assert_eq!(sink.signals(), vec![Signal::Next("data"), Signal::Complete]);
//! }
//! ```

pub mod ext;
pub mod matcher;
pub mod retry;
pub mod source;
pub mod subscriber;
pub mod telemetry;
pub mod testing;

pub mod prelude;

// Re-exports
pub use ext::SourceExt;
pub use matcher::{Equals, ErrorMatcher, Projected};
pub use retry::{Attempt, RetryOn, RetryOnSource, RetrySpec};
pub use source::{Empty, NoRecovery, Recovery, Source};
pub use subscriber::{
    subscribe, Delivery, DeliveryError, MemorySubscriber, Signal, Subscription, Termination,
};
pub use telemetry::RetryOnEvent;
