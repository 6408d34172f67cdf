//! Errors reported by handle operations.
use thiserror::Error;

/// Errors returned by this library.
///
/// Misuse such as dereferencing an empty handle is not an error: it panics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum Error {
    /// A weak handle was promoted after the object it observed was destroyed,
    /// or the weak handle was empty.
    #[error("weak reference has expired")]
    ExpiredReference,
}
