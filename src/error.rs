use std::{error::Error, fmt};

/// The reason a [`Promise`][crate::Promise] is rejected with when it is resolved with itself.
///
/// Resolving a promise with itself would make it wait for its own settlement forever. Instead,
/// the resolving function rejects the promise with this error (converted into the promise's
/// reason type via [`From`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfResolutionError {
    _priv: (),
}

impl SelfResolutionError {
    pub(crate) fn new() -> Self {
        Self { _priv: () }
    }
}

impl Error for SelfResolutionError {}

impl fmt::Display for SelfResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a promise cannot be resolved with itself")
    }
}

impl From<SelfResolutionError> for String {
    fn from(err: SelfResolutionError) -> Self {
        err.to_string()
    }
}

/// Bounds required of a promise's rejection reason type.
///
/// Reasons are cloned once per reaction, and must be able to represent a
/// [`SelfResolutionError`]. This is implemented for every type meeting those bounds, including
/// [`String`].
pub trait Reason: Clone + From<SelfResolutionError> + 'static {}

impl<E: Clone + From<SelfResolutionError> + 'static> Reason for E {}
