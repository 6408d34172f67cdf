//! `Shared<T>`: the owning, clonable handle.
//!
//! A handle is two independent pointers: the control block that keeps the
//! ownership group alive, and the address it hands out on dereference. They
//! usually point into the same object, but [`Shared::alias`] and
//! [`Shared::project`] let a handle expose a field (or any other object whose
//! lifetime is tied to the group) while keeping the whole group alive.
//!
//! Like `std::rc::Rc`, the functions are associated functions rather than
//! methods, so they do not collide with methods of `T` reached through
//! `Deref`: write `Shared::use_count(&p)`, not `p.use_count()`.
use alloc::boxed::Box;
use core::{
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
    mem,
    ops::Deref,
    ptr::{self, NonNull},
};

use crate::{
    control::{Adopted, Embedded, Header},
    deleter::{DefaultDelete, Deleter},
    error::Error,
    observe::SelfObserving,
    weak::Weak,
};

// The two halves of a non-empty handle. `Option<Raw<T>>` keeps them empty or
// set together.
pub(crate) struct Raw<T: ?Sized> {
    pub(crate) header: NonNull<Header>,
    pub(crate) ptr: NonNull<T>,
}

impl<T: ?Sized> Clone for Raw<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for Raw<T> {}

impl<T: ?Sized> Raw<T> {
    pub(crate) fn same_as(self, other: Raw<T>) -> bool {
        self.header == other.header && ptr::addr_eq(self.ptr.as_ptr(), other.ptr.as_ptr())
    }
}

/// Shared ownership of a heap object, with a separate control block.
///
/// The object is destroyed when the last `Shared` of its group is dropped or
/// reset; the control block lives on while [`Weak`] handles still observe it.
///
/// A `Shared` may be empty. Dereferencing an empty handle panics; use
/// [`Shared::get`] to check.
pub struct Shared<T: ?Sized> {
    pub(crate) raw: Option<Raw<T>>,
    phantom: PhantomData<T>,
}

impl<T> Shared<T> {
    /// Places `value` and its control block in a single allocation.
    pub fn new(value: T) -> Self {
        let (header, ptr) = Embedded::allocate(value);
        Shared::from_inner(Raw { header, ptr })
    }

    /// Like [`Shared::new`], then wires the object's [`SelfRef`] to the new
    /// group so it can hand out handles to itself.
    ///
    /// [`SelfRef`]: crate::SelfRef
    pub fn new_observed(value: T) -> Self
    where
        T: SelfObserving,
    {
        let this = Shared::new(value);
        Shared::back(&this);
        this
    }

    /// Like [`Shared::from_box`], then wires the object's [`SelfRef`] to the
    /// new group.
    ///
    /// [`SelfRef`]: crate::SelfRef
    pub fn from_box_observed(value: Box<T>) -> Self
    where
        T: SelfObserving,
    {
        let this = Shared::from_box(value);
        Shared::back(&this);
        this
    }

    /// Like [`Shared::from_raw_with`], then wires the object's [`SelfRef`] to
    /// the new group.
    ///
    /// # Safety
    /// Same contract as [`Shared::from_raw_with`].
    ///
    /// [`SelfRef`]: crate::SelfRef
    pub unsafe fn from_raw_with_observed<D>(ptr: NonNull<T>, deleter: D) -> Self
    where
        T: SelfObserving,
        D: Deleter<T> + 'static,
    {
        // Safety: forwarded to the caller
        let this = unsafe { Shared::from_raw_with(ptr, deleter) };
        Shared::back(&this);
        this
    }

    /// Like [`Shared::reset_to`], wiring the new object's [`SelfRef`] to its
    /// group.
    ///
    /// [`SelfRef`]: crate::SelfRef
    pub fn reset_to_observed(this: &mut Self, value: Box<T>)
    where
        T: SelfObserving,
    {
        let old = mem::replace(this, Shared::from_box_observed(value));
        drop(old);
    }

    fn back(this: &Self)
    where
        T: SelfObserving,
    {
        if let Some(raw) = this.raw {
            this.self_ref().set_backing(raw);
        }
    }
}

impl<T: ?Sized> Shared<T> {
    /// A handle that owns nothing.
    pub const fn empty() -> Self {
        Shared {
            raw: None,
            phantom: PhantomData,
        }
    }

    /// Takes ownership of a boxed value. The box allocation is reused as-is;
    /// only the control block is allocated.
    pub fn from_box(value: Box<T>) -> Self {
        let ptr = NonNull::from(Box::leak(value));
        // Safety: the pointer came from a box, which `DefaultDelete` reclaims
        unsafe { Shared::from_raw_with(ptr, DefaultDelete) }
    }

    /// Adopts the object at `ptr`, which `deleter` destroys once the last
    /// strong handle is gone.
    ///
    /// # Safety
    /// `ptr` must point to a valid `T` that nothing else owns or frees, and it
    /// must stay valid until `deleter` runs.
    pub unsafe fn from_raw_with<D>(ptr: NonNull<T>, deleter: D) -> Self
    where
        D: Deleter<T> + 'static,
    {
        let header = Adopted::allocate(ptr, deleter);
        Shared::from_inner(Raw { header, ptr })
    }

    /// Wraps a raw pair whose strong reference the caller hands over.
    pub(crate) fn from_inner(raw: Raw<T>) -> Self {
        Shared {
            raw: Some(raw),
            phantom: PhantomData,
        }
    }

    /// Returns a handle sharing this group that exposes `f`'s result instead.
    ///
    /// ```
    /// use shptr::Shared;
    /// let pair = Shared::new((1, String::from("two")));
    /// let second = Shared::alias(&pair, |p| p.1.as_str());
    /// assert_eq!(&*second, "two");
    /// assert_eq!(Shared::use_count(&pair), 2);
    /// drop(pair);
    /// assert_eq!(&*second, "two");
    /// ```
    pub fn alias<U, F>(this: &Self, f: F) -> Shared<U>
    where
        T: 'static,
        U: ?Sized,
        F: FnOnce(&T) -> &U,
    {
        Shared::project(this.clone(), f)
    }

    /// Consuming form of [`Shared::alias`]: moves this handle's strong
    /// reference into a handle exposing `f`'s result.
    ///
    /// Empty handles project to empty handles without calling `f`.
    pub fn project<U, F>(this: Self, f: F) -> Shared<U>
    where
        T: 'static,
        U: ?Sized,
        F: FnOnce(&T) -> &U,
    {
        let Some(raw) = this.raw else {
            return Shared::empty();
        };
        let ptr = NonNull::from(f(&*this));
        // Forget `this` so it doesn't adjust the count, since we moved its
        // strong reference into the result.
        mem::forget(this);
        Shared::from_inner(Raw {
            header: raw.header,
            ptr,
        })
    }

    /// Returns a handle sharing this group that exposes `ptr`.
    ///
    /// Aliasing an empty handle returns an empty handle.
    ///
    /// # Safety
    /// `ptr` must stay valid for as long as the group's object is alive.
    pub unsafe fn alias_raw<U: ?Sized>(this: &Self, ptr: NonNull<U>) -> Shared<U> {
        match this.raw {
            None => Shared::empty(),
            Some(raw) => {
                // Safety: `this` keeps the control block allocated
                unsafe { raw.header.as_ref() }.inc_strong();
                Shared::from_inner(Raw {
                    header: raw.header,
                    ptr,
                })
            }
        }
    }

    /// Promotes `weak` to a strong handle, failing with
    /// [`Error::ExpiredReference`] if its object is already destroyed.
    ///
    /// See [`Weak::lock`] for the form that returns an empty handle instead.
    pub fn promote(weak: &Weak<T>) -> Result<Self, Error> {
        let raw = weak.raw.ok_or(Error::ExpiredReference)?;
        // Safety: the weak handle keeps the control block allocated
        if unsafe { raw.header.as_ref() }.try_inc_strong() {
            Ok(Shared::from_inner(raw))
        } else {
            Err(Error::ExpiredReference)
        }
    }

    /// Returns a [`Weak`] handle observing this group.
    pub fn downgrade(this: &Self) -> Weak<T> {
        match this.raw {
            None => Weak::new(),
            Some(raw) => {
                // Safety: `this` keeps the control block allocated
                unsafe { raw.header.as_ref() }.inc_weak();
                Weak::from_inner(raw)
            }
        }
    }

    /// Releases this handle's ownership, leaving it empty.
    pub fn reset(this: &mut Self) {
        if let Some(raw) = this.raw.take() {
            // Safety: we own one strong reference, consumed here
            unsafe { Header::dec_strong(raw.header) };
        }
    }

    /// Releases this handle's ownership and adopts `value` in its place.
    ///
    /// The new object's self-reference is not wired; see
    /// [`Shared::reset_to_observed`].
    pub fn reset_to(this: &mut Self, value: Box<T>) {
        let old = mem::replace(this, Shared::from_box(value));
        drop(old);
    }

    /// Exchanges the groups and exposed addresses of two handles. No count
    /// changes.
    pub fn swap(this: &mut Self, other: &mut Self) {
        mem::swap(&mut this.raw, &mut other.raw);
    }

    /// The exposed object, or `None` for an empty handle.
    pub fn get(this: &Self) -> Option<&T> {
        // Safety: while `this` holds a strong reference the object is alive
        this.raw.map(|raw| unsafe { raw.ptr.as_ref() })
    }

    /// The exposed address, or `None` for an empty handle.
    pub fn as_ptr(this: &Self) -> Option<NonNull<T>> {
        this.raw.map(|raw| raw.ptr)
    }

    /// Address of the object the control block manages. It differs from
    /// [`Shared::as_ptr`] for aliasing handles.
    pub fn root_address(this: &Self) -> Option<NonNull<u8>> {
        // Safety: `this` keeps the control block allocated
        this.raw.map(|raw| unsafe { Header::address(raw.header) })
    }

    /// Number of strong handles in this group, 0 if empty.
    pub fn use_count(this: &Self) -> usize {
        this.header().map_or(0, Header::strong)
    }

    /// Number of weak handles observing this group, 0 if empty.
    pub fn weak_count(this: &Self) -> usize {
        this.header().map_or(0, Header::weak)
    }

    /// Returns true if the handle owns nothing.
    pub fn is_empty(this: &Self) -> bool {
        this.raw.is_none()
    }

    /// Returns true if two handles expose the same address. Two empty handles
    /// are equal.
    ///
    /// This is not the same as sharing a group: aliasing handles of one group
    /// may expose different fields, and handles of different groups may expose
    /// the same static object.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Shared::address(this) == Shared::address(other)
    }

    /// Returns true if two handles share a control block.
    pub fn root_ptr_eq(this: &Self, other: &Self) -> bool {
        this.raw.map(|raw| raw.header) == other.raw.map(|raw| raw.header)
    }

    fn address(this: &Self) -> Option<NonNull<u8>> {
        this.raw.map(|raw| raw.ptr.cast::<u8>())
    }

    fn header(&self) -> Option<&Header> {
        // Safety: header is valid while we hold a strong reference, there's
        // just no way to spell the lifetime in Rust.
        self.raw.map(|raw| unsafe { raw.header.as_ref() })
    }
}

impl<T: ?Sized> Clone for Shared<T> {
    fn clone(&self) -> Self {
        if let Some(h) = self.header() {
            h.inc_strong();
        }
        Shared {
            raw: self.raw,
            phantom: PhantomData,
        }
    }

    /// Assigning a handle to itself (or to a handle of the same group and
    /// address) changes nothing; otherwise the new group is acquired before
    /// the old one is released.
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

impl<T: ?Sized> Drop for Shared<T> {
    fn drop(&mut self) {
        Shared::reset(self);
    }
}

impl<T: ?Sized> Default for Shared<T> {
    fn default() -> Self {
        Shared::empty()
    }
}

impl<T: ?Sized> Deref for Shared<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match Shared::get(self) {
            Some(value) => value,
            None => panic!("dereferenced an empty Shared handle"),
        }
    }
}

impl<T: ?Sized> AsRef<T> for Shared<T> {
    fn as_ref(&self) -> &T {
        self
    }
}

/// An exclusively owned box can be handed over to shared ownership.
///
/// This does not wire self-observation, since a conversion cannot tell whether
/// `T` is [`SelfObserving`]. Use [`Shared::from_box_observed`] for such types.
impl<T: ?Sized> From<Box<T>> for Shared<T> {
    fn from(value: Box<T>) -> Self {
        Shared::from_box(value)
    }
}

impl<T: ?Sized> TryFrom<&Weak<T>> for Shared<T> {
    type Error = Error;

    fn try_from(weak: &Weak<T>) -> Result<Self, Error> {
        Shared::promote(weak)
    }
}

/// Handles compare by identity: equal when they expose the same address.
impl<T: ?Sized, U: ?Sized> PartialEq<Shared<U>> for Shared<T> {
    fn eq(&self, other: &Shared<U>) -> bool {
        self.raw.map(|raw| raw.ptr.cast::<u8>()) == other.raw.map(|raw| raw.ptr.cast::<u8>())
    }
}

impl<T: ?Sized> Eq for Shared<T> {}

impl<T: ?Sized> Hash for Shared<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Shared::address(self).hash(state);
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Shared::get(self) {
            Some(value) => fmt::Debug::fmt(value, f),
            None => f.write_str("(empty)"),
        }
    }
}

impl<T: ?Sized> fmt::Pointer for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let address = Shared::address(self).map_or(ptr::null(), |p| p.as_ptr() as *const u8);
        fmt::Pointer::fmt(&address, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        control::Storage,
        testing::{init_logging, Drops},
    };
    use std::{format, string::String, vec, vec::Vec};

    fn counts<T: ?Sized>(x: &Shared<T>) -> (usize, usize) {
        (Shared::use_count(x), Shared::weak_count(x))
    }

    fn storage<T: ?Sized>(x: &Shared<T>) -> Storage {
        x.header().map(Header::storage).unwrap()
    }

    #[test]
    fn test_simple() {
        init_logging();
        let x = Shared::new(2);
        let y = x.clone();
        assert_eq!(*x, 2);
        assert!(Shared::ptr_eq(&x, &y));
        assert_eq!(counts(&y), (2, 0));
        drop(x);
        assert_eq!(*y, 2);
        assert_eq!(counts(&y), (1, 0));
    }

    #[test]
    fn test_empty() {
        let x: Shared<i32> = Shared::default();
        assert!(Shared::is_empty(&x));
        assert_eq!(Shared::get(&x), None);
        assert_eq!(Shared::as_ptr(&x), None);
        assert_eq!(Shared::root_address(&x), None);
        assert_eq!(counts(&x), (0, 0));
        assert_eq!(x, Shared::<u8>::empty());
        assert_eq!(format!("{:?}", x), "(empty)");
        assert_eq!(format!("{:p}", x), format!("{:p}", ptr::null::<u8>()));
    }

    #[test]
    #[should_panic(expected = "dereferenced an empty Shared handle")]
    fn test_deref_empty_panics() {
        let x: Shared<i32> = Shared::empty();
        let _value: i32 = *x;
    }

    #[test]
    fn test_destroyed_exactly_once() {
        let drops = Drops::default();
        let a = Shared::new(drops.track(()));
        let b = a.clone();
        let mut c = b.clone();
        let d = c.clone();
        drop(b);
        Shared::reset(&mut c);
        Shared::reset(&mut c);
        assert_eq!(drops.count(), 0);
        drop(a);
        assert_eq!(drops.count(), 0);
        drop(d);
        assert_eq!(drops.count(), 1);
    }

    #[test]
    fn test_move_transfers_ownership() {
        let drops = Drops::default();
        let mut a = Shared::new(drops.track(1));
        let b = mem::take(&mut a);
        assert!(Shared::is_empty(&a));
        assert_eq!(counts(&b), (1, 0));
        drop(a);
        assert_eq!(drops.count(), 0);
        drop(b);
        assert_eq!(drops.count(), 1);
    }

    #[test]
    fn test_from_box_reuses_allocation() {
        let boxed = Box::new(String::from("boxed"));
        let addr: *const String = &*boxed;
        let x = Shared::from_box(boxed);
        assert!(ptr::eq(&*x, addr));
        assert_eq!(storage(&x), Storage::Adopted);
        assert_eq!(Shared::root_address(&x), Shared::as_ptr(&x).map(NonNull::cast::<u8>));
    }

    #[test]
    fn test_new_is_embedded() {
        let x = Shared::new([1u8; 4]);
        assert_eq!(storage(&x), Storage::Embedded);
        assert_eq!(Shared::root_address(&x), Shared::as_ptr(&x).map(NonNull::cast::<u8>));
    }

    #[test]
    fn test_unsized_from_box() {
        let drops = Drops::default();
        let items: Box<[_]> = vec![drops.track(1), drops.track(2), drops.track(3)].into();
        let x: Shared<[_]> = items.into();
        assert_eq!(x.len(), 3);
        assert_eq!(x[1].value, 2);
        drop(x);
        assert_eq!(drops.count(), 3);
    }

    #[test]
    fn test_alias_shares_group() {
        let drops = Drops::default();
        let x = Shared::new(drops.track((1, 2)));
        let y = Shared::alias(&x, |p| &p.value.0);
        let z = Shared::alias(&x, |p| &p.value.1);
        assert_eq!((*y, *z), (1, 2));
        assert_eq!(counts(&z), (3, 0));
        assert!(Shared::root_ptr_eq(&y, &z));
        assert!(!Shared::ptr_eq(&y, &z));
        assert_eq!(Shared::root_address(&y), Shared::root_address(&x));

        drop(x);
        drop(y);
        assert_eq!(counts(&z), (1, 0));
        assert_eq!(drops.count(), 0);
        drop(z);
        assert_eq!(drops.count(), 1);
    }

    #[test]
    fn test_alias_exposes_member_address() {
        #[repr(C)]
        struct Pair {
            a: u32,
            b: u32,
        }
        let x = Shared::new(Pair { a: 1, b: 2 });
        let b = Shared::alias(&x, |p| &p.b);
        assert_eq!((x.a, *b), (1, 2));
        assert!(ptr::eq(&*b, &x.b));
        assert_eq!(Shared::root_address(&b), Shared::as_ptr(&x).map(NonNull::cast::<u8>));
        assert_ne!(Shared::as_ptr(&b).map(NonNull::cast::<u8>), Shared::root_address(&b));
        assert!(x != b);
    }

    #[test]
    fn test_project_consumes() {
        let x: Shared<[i32; 3]> = Shared::new([1, 2, 3]);
        let w = Shared::downgrade(&x);
        let y: Shared<[i32]> = Shared::project(x, |p| &p[..]);
        let z: Shared<i32> = Shared::project(y, |p| &p[1]);
        assert_eq!(*z, 2);
        assert_eq!(w.use_count(), 1);
        assert!(!w.expired());
        drop(z);
        assert!(w.expired());
    }

    #[test]
    fn test_project_empty_skips_closure() {
        let x: Shared<i32> = Shared::empty();
        let y: Shared<i32> = Shared::project(x, |_| unreachable!());
        assert!(Shared::is_empty(&y));
    }

    #[test]
    fn test_alias_raw() {
        static OTHER: u64 = 99;
        let x = Shared::new(1u8);
        let y = unsafe { Shared::alias_raw(&x, NonNull::from(&OTHER)) };
        assert_eq!(*y, 99);
        assert_eq!(counts(&x), (2, 0));
        assert!(Shared::root_ptr_eq(&Shared::project(y, |_| &0u8), &x));

        let empty: Shared<u8> = Shared::empty();
        let e = unsafe { Shared::alias_raw(&empty, NonNull::from(&OTHER)) };
        assert!(Shared::is_empty(&e));
    }

    #[test]
    fn test_trait_obj() {
        let x = Shared::new(2);
        let d = Shared::alias(&x, |p| p as &dyn fmt::Debug);
        assert_eq!(format!("{:?}", d), "2");
        let b: Shared<dyn fmt::Display> = Shared::from_box(Box::new(3));
        assert_eq!(format!("{}", &*b), "3");
    }

    #[test]
    fn test_reset_to() {
        let drops = Drops::default();
        let mut x = Shared::new(drops.track(1));
        let y = x.clone();
        Shared::reset_to(&mut x, Box::new(drops.track(2)));
        assert_eq!(x.value, 2);
        assert_eq!(counts(&x), (1, 0));
        assert_eq!(counts(&y), (1, 0));
        drop(y);
        assert_eq!(drops.count(), 1);
        drop(x);
        assert_eq!(drops.count(), 2);
    }

    #[test]
    fn test_swap() {
        let mut a = Shared::new(1);
        let mut b = Shared::new(2);
        Shared::swap(&mut a, &mut b);
        assert_eq!((*a, *b), (2, 1));
    }

    #[test]
    fn test_clone_from_same_group_is_noop() {
        let drops = Drops::default();
        let mut a = Shared::new(drops.track(()));
        let b = a.clone();
        a.clone_from(&b);
        assert_eq!(counts(&a), (2, 0));
        drop(b);
        a.clone_from(&a.clone());
        assert_eq!(counts(&a), (1, 0));
        assert_eq!(drops.count(), 0);
    }

    #[test]
    fn test_clone_from_other_group() {
        let drops = Drops::default();
        let mut a = Shared::new(drops.track(1));
        let b = Shared::new(drops.track(2));
        a.clone_from(&b);
        assert_eq!(drops.count(), 1);
        assert_eq!(a.value, 2);
        assert_eq!(counts(&b), (2, 0));
    }

    #[test]
    fn test_identity_eq_and_hash() {
        use std::collections::HashSet;

        let a = Shared::new(5);
        let b = Shared::new(5);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);

        let set: HashSet<_> = [a.clone(), a.clone(), b.clone()].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_promote() {
        let x = Shared::new(7);
        let w = Shared::downgrade(&x);
        let y = Shared::promote(&w).unwrap();
        assert_eq!(counts(&y), (2, 1));
        drop((x, y));
        assert_eq!(Shared::promote(&w), Err(Error::ExpiredReference));
        assert_eq!(
            Shared::<i32>::try_from(&Weak::new()),
            Err(Error::ExpiredReference)
        );
    }

    #[test]
    fn test_vec_of_handles() {
        let drops = Drops::default();
        let x = Shared::new(drops.track(0));
        let v: Vec<_> = (0..10).map(|_| x.clone()).collect();
        assert_eq!(Shared::use_count(&x), 11);
        drop(x);
        drop(v);
        assert_eq!(drops.count(), 1);
    }
}
