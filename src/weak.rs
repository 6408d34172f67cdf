//! `Weak<T>`: a non-owning observer of a [`Shared`] group.
//!
//! A weak handle keeps the control block allocated but not the object. It can
//! tell whether the object is still alive, and be promoted to a strong handle
//! while it is.
use core::{fmt, marker::PhantomData, mem};

use crate::{
    control::Header,
    error::Error,
    shared::{Raw, Shared},
};

/// Observes the object of a [`Shared`] group without keeping it alive.
///
/// ```
/// use shptr::{Shared, Weak};
///
/// let a = Shared::new(42);
/// let w: Weak<i32> = Shared::downgrade(&a);
/// assert!(!w.expired());
/// assert_eq!(*w.lock(), 42);
///
/// drop(a);
/// assert!(w.expired());
/// assert!(Shared::is_empty(&w.lock()));
/// ```
pub struct Weak<T: ?Sized> {
    pub(crate) raw: Option<Raw<T>>,
    phantom: PhantomData<T>,
}

impl<T: ?Sized> Weak<T> {
    /// A weak handle that observes nothing. It is always expired.
    pub const fn new() -> Self {
        Weak {
            raw: None,
            phantom: PhantomData,
        }
    }

    /// Wraps a raw pair whose weak reference the caller hands over.
    pub(crate) fn from_inner(raw: Raw<T>) -> Self {
        Weak {
            raw: Some(raw),
            phantom: PhantomData,
        }
    }

    /// Returns true if there is no object to observe anymore (or never was).
    pub fn expired(&self) -> bool {
        self.header().map_or(true, Header::is_destroyed)
    }

    /// Promotes to a strong handle, or returns an empty handle if the object
    /// is already gone.
    pub fn lock(&self) -> Shared<T> {
        Shared::promote(self).unwrap_or_default()
    }

    /// Promotes to a strong handle if the object is still alive.
    pub fn upgrade(&self) -> Option<Shared<T>> {
        Shared::promote(self).ok()
    }

    /// Promotes to a strong handle, failing with
    /// [`Error::ExpiredReference`] if the object is already gone.
    pub fn try_upgrade(&self) -> Result<Shared<T>, Error> {
        Shared::promote(self)
    }

    /// Number of strong handles in the observed group, 0 if empty.
    pub fn use_count(&self) -> usize {
        self.header().map_or(0, Header::strong)
    }

    /// Number of weak handles observing the group, this one included.
    pub fn weak_count(&self) -> usize {
        self.header().map_or(0, Header::weak)
    }

    /// Stops observing, leaving this handle empty.
    pub fn reset(&mut self) {
        if let Some(raw) = self.raw.take() {
            // Safety: we own one weak reference, consumed here
            unsafe { Header::dec_weak(raw.header) };
        }
    }

    /// Exchanges the observed groups of two weak handles.
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(&mut self.raw, &mut other.raw);
    }

    /// Returns true if both handles observe the same group, or are both
    /// empty.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.raw.map(|raw| raw.header) == other.raw.map(|raw| raw.header)
    }

    fn header(&self) -> Option<&Header> {
        // Safety: header is valid while we hold a weak reference
        self.raw.map(|raw| unsafe { raw.header.as_ref() })
    }
}

impl<T: ?Sized> Clone for Weak<T> {
    fn clone(&self) -> Self {
        if let Some(h) = self.header() {
            h.inc_weak();
        }
        Weak {
            raw: self.raw,
            phantom: PhantomData,
        }
    }

    fn clone_from(&mut self, source: &Self) {
        let same = match (self.raw, source.raw) {
            (Some(a), Some(b)) => a.same_as(b),
            (None, None) => true,
            _ => false,
        };
        if !same {
            *self = source.clone();
        }
    }
}

impl<T: ?Sized> Drop for Weak<T> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T: ?Sized> Default for Weak<T> {
    fn default() -> Self {
        Weak::new()
    }
}

impl<T: ?Sized> From<&Shared<T>> for Weak<T> {
    fn from(shared: &Shared<T>) -> Self {
        Shared::downgrade(shared)
    }
}

impl<T: ?Sized> fmt::Debug for Weak<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(Weak)")
    }
}
