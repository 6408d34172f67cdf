//! Objects that can hand out [`Shared`] and [`Weak`] handles to themselves.
//!
//! A type opts in by storing a [`SelfRef`] and implementing
//! [`SelfObserving`]. When the object is placed in a group with
//! [`Shared::new_observed`] or [`Shared::from_box_observed`], its `SelfRef` is
//! wired to the new control block, and from then on any `&self` method can
//! mint handles to the object without being passed one.
//!
//! ```
//! use shptr::{SelfObserving, SelfRef, Shared};
//! use std::cell::RefCell;
//!
//! struct Node {
//!     this: SelfRef<Node>,
//!     children: RefCell<Vec<Shared<Child>>>,
//! }
//!
//! struct Child {
//!     parent: shptr::Weak<Node>,
//! }
//!
//! // Safety: `self_ref` returns a field of `self`.
//! unsafe impl SelfObserving for Node {
//!     fn self_ref(&self) -> &SelfRef<Node> {
//!         &self.this
//!     }
//! }
//!
//! impl Node {
//!     fn add_child(&self) {
//!         let child = Shared::new(Child { parent: self.weak_from_self() });
//!         self.children.borrow_mut().push(child);
//!     }
//! }
//!
//! let root = Shared::new_observed(Node {
//!     this: SelfRef::new(),
//!     children: RefCell::new(Vec::new()),
//! });
//! root.add_child();
//!
//! let child = root.children.borrow()[0].clone();
//! assert!(Shared::ptr_eq(&child.parent.lock(), &root));
//!
//! let again = root.shared_from_self();
//! assert_eq!(Shared::use_count(&again), 2);
//! ```
//!
//! The back-reference does not count as a weak handle, and since it is
//! dropped together with its object it does not keep the control block
//! allocated either. A back-reference that is moved out of its object (say by
//! `mem::replace` in a `Drop` impl) stays memory safe: it keeps the block
//! allocated until it is dropped, and only ever hands out empty handles.
use core::{cell::Cell, fmt};

use log::trace;

use crate::{
    control::Header,
    shared::{Raw, Shared},
    weak::Weak,
};

/// A non-counting back-reference from an object to its own ownership group.
///
/// It starts out unbacked and is backed once, when the object containing it
/// is first placed in a [`Shared`] through an `_observed` constructor.
pub struct SelfRef<T> {
    raw: Cell<Option<Raw<T>>>,
}

impl<T> SelfRef<T> {
    /// An unbacked reference, to be stored in the object it will point back to.
    pub const fn new() -> Self {
        SelfRef {
            raw: Cell::new(None),
        }
    }

    /// Returns true once the object has been placed in a group.
    pub fn is_backed(&self) -> bool {
        self.raw.get().is_some()
    }

    /// Called when a `Shared` first takes ownership of the containing object.
    /// Later calls are ignored: the first group owns the object for good.
    pub(crate) fn set_backing(&self, raw: Raw<T>) {
        if self.is_backed() {
            trace!("self reference already backed, ignoring {:p}", raw.header);
            return;
        }
        // Safety: the caller's handle keeps the control block allocated
        unsafe { raw.header.as_ref() }.inc_self_ref();
        self.raw.set(Some(raw));
    }

    /// A strong handle to the containing object, or an empty handle if it is
    /// unbacked or being destroyed.
    pub fn lock(&self) -> Shared<T> {
        match self.raw.get() {
            // Safety: a backed reference pins its control block
            Some(raw) if unsafe { raw.header.as_ref() }.try_inc_strong() => {
                Shared::from_inner(raw)
            }
            _ => Shared::empty(),
        }
    }

    /// A counted weak handle to the containing object, or an empty one if it
    /// is unbacked.
    pub fn weak(&self) -> Weak<T> {
        match self.raw.get() {
            None => Weak::new(),
            Some(raw) => {
                // Safety: see `lock`
                unsafe { raw.header.as_ref() }.inc_weak();
                Weak::from_inner(raw)
            }
        }
    }
}

impl<T> Drop for SelfRef<T> {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take() {
            // Safety: we own the pin taken by `set_backing`
            unsafe { Header::dec_self_ref(raw.header) };
        }
    }
}

/// A clone belongs to a different object, so it starts unbacked.
impl<T> Clone for SelfRef<T> {
    fn clone(&self) -> Self {
        SelfRef::new()
    }
}

impl<T> fmt::Debug for SelfRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelfRef")
            .field("backed", &self.is_backed())
            .finish()
    }
}

/// Types that can mint handles to themselves once they are shared.
///
/// # Safety
/// `self_ref` must always return the same [`SelfRef`], stored inline in
/// `self` (a field of `self`, or of one of its fields).
///
/// Once the object is shared, its `SelfRef` must not be moved out, swapped or
/// replaced, including from the object's own `Drop`. Doing so cannot cause
/// undefined behaviour, but the object loses its handles to itself and the
/// moved reference keeps the whole control block allocated:
///
/// ```
/// # use shptr::{SelfObserving, SelfRef, Shared};
/// struct Leaky {
///     this: SelfRef<Leaky>,
/// }
/// # unsafe impl SelfObserving for Leaky {
/// #     fn self_ref(&self) -> &SelfRef<Leaky> {
/// #         &self.this
/// #     }
/// # }
///
/// impl Drop for Leaky {
///     fn drop(&mut self) {
///         // don't: the object can no longer reach its own group
///         let stolen = std::mem::replace(&mut self.this, SelfRef::new());
///         assert!(Shared::is_empty(&stolen.lock()));
///     }
/// }
/// ```
pub unsafe trait SelfObserving: Sized {
    fn self_ref(&self) -> &SelfRef<Self>;

    /// A strong handle sharing the group that owns `self`.
    ///
    /// Returns an empty handle if `self` was never placed in a group with an
    /// `_observed` constructor, or is being destroyed.
    fn shared_from_self(&self) -> Shared<Self> {
        self.self_ref().lock()
    }

    /// A weak handle observing the group that owns `self`.
    fn weak_from_self(&self) -> Weak<Self> {
        self.self_ref().weak()
    }
}
