//! Convenient re-exports for common retry-on types.
pub use crate::{
    ext::SourceExt,
    matcher::{Equals, ErrorMatcher, Projected},
    retry::{RetryOn, RetryOnSource, RetrySpec},
    source::{Recovery, Source},
    subscriber::{subscribe, Signal, Subscription, Termination},
};
