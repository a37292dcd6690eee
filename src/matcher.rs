//! Failure matching.
//!
//! Deciding whether a failure is retry-eligible is a structural comparison against a target
//! value. Two matchers cover the cases:
//!
//! - [`Equals`] compares the whole failure with `==`. The same variant carrying a different
//!   payload does not match.
//! - [`Projected`] first extracts a comparable part of a wider failure type. Failures the
//!   projection cannot represent never match, which lets the downstream error carry cases that
//!   are not `PartialEq` at all (I/O errors, boxed errors, ...).

use std::fmt;

/// Decides whether a failure of type `E` is the retry target.
pub trait ErrorMatcher<E> {
    /// `true` when `error` is the retry target.
    fn matches(&self, error: &E) -> bool;
}

/// Matches failures equal to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Equals<E>(pub E);

impl<E> Equals<E> {
    /// Wrap the target failure.
    pub fn new(target: E) -> Self {
        Self(target)
    }

    /// The failure being matched.
    pub fn target(&self) -> &E {
        &self.0
    }
}

impl<E: PartialEq> ErrorMatcher<E> for Equals<E> {
    fn matches(&self, error: &E) -> bool {
        *error == self.0
    }
}

/// Matches failures whose projection equals the target.
#[derive(Clone)]
pub struct Projected<T, F> {
    target: T,
    project: F,
}

impl<T, F> Projected<T, F> {
    /// Build a matcher from a target and a projection into the target's shape.
    ///
    /// ```rust
    /// use retry_on::{ErrorMatcher, Projected};
    ///
    /// #[derive(Debug, PartialEq)]
    /// enum Api { Unauthorized, NotFound }
    ///
    /// #[derive(Debug)]
    /// enum Failure { Api(Api), Io(std::io::Error) }
    ///
    /// let matcher = Projected::new(Api::Unauthorized, |f: &Failure| match f {
    ///     Failure::Api(api) => Some(api),
    ///     Failure::Io(_) => None,
    /// });
    ///
    /// assert!(matcher.matches(&Failure::Api(Api::Unauthorized)));
    /// assert!(!matcher.matches(&Failure::Api(Api::NotFound)));
    /// assert!(!matcher.matches(&Failure::Io(std::io::ErrorKind::Other.into())));
    /// ```
    pub fn new<E>(target: T, project: F) -> Self
    where
        F: Fn(&E) -> Option<&T>,
    {
        Self { target, project }
    }

    /// The value failures are compared against.
    pub fn target(&self) -> &T {
        &self.target
    }
}

impl<T: fmt::Debug, F> fmt::Debug for Projected<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Projected")
            .field("target", &self.target)
            .field("project", &"<projection>")
            .finish()
    }
}

impl<E, T, F> ErrorMatcher<E> for Projected<T, F>
where
    T: PartialEq,
    F: Fn(&E) -> Option<&T>,
{
    fn matches(&self, error: &E) -> bool {
        (self.project)(error).is_some_and(|candidate| *candidate == self.target)
    }
}
