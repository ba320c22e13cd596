//! Deterministic reference counting shared by every [`BytesStore`] variant
//! and by mapped-file chunks.
//!
//! [`BytesStore`]: crate::store::BytesStore

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::{BytesError, Result};

/// An opaque identity token passed to `reserve`/`release`.
///
/// Two calls with the same `Owner` are additive: reserving twice with the
/// same owner and releasing once still leaves one outstanding reservation
/// for that owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Owner(u64);

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

impl Owner {
    /// The implicit owner every resource starts out reserved by.
    pub const INIT: Owner = Owner(0);

    /// Mints a fresh, process-unique owner identity.
    pub fn new() -> Owner {
        Owner(NEXT_OWNER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for Owner {
    fn default() -> Self {
        Owner::new()
    }
}

/// The atomic reference count backing a [`ReferenceCounted`] resource.
///
/// Count starts at 1, held by [`Owner::INIT`]. This type only tracks the
/// owner -> reservation-count map needed to answer `reserved_by`
/// correctly; full leak-attribution diagnostics (capturing a stack trace
/// per reservation) are out of scope, per the spec.
#[derive(Debug)]
pub struct RefCount {
    count: AtomicUsize,
    owners: Mutex<HashMap<Owner, usize>>,
}

impl RefCount {
    /// Creates a fresh count of 1, reserved by [`Owner::INIT`].
    pub fn new() -> Self {
        let mut owners = HashMap::new();
        owners.insert(Owner::INIT, 1);
        RefCount {
            count: AtomicUsize::new(1),
            owners: Mutex::new(owners),
        }
    }

    /// Current total reservation count. Zero means the resource has been
    /// released and any other operation on it must fail as `Closed`.
    pub fn get(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    fn bump(&self, owner: Owner, delta: isize) {
        let mut owners = self.owners.lock().unwrap();
        let entry = owners.entry(owner).or_insert(0);
        *entry = (*entry as isize + delta).max(0) as usize;
        if *entry == 0 {
            owners.remove(&owner);
        }
    }

    /// Increments the count unconditionally. Fails if the count is already
    /// zero - a released resource can never be reserved again.
    pub fn reserve(&self, owner: Owner, what: &str) -> Result<()> {
        loop {
            let current = self.count.load(Ordering::SeqCst);
            if current == 0 {
                return Err(BytesError::Closed(format!(
                    "cannot reserve {what}: already released"
                )));
            }
            if self
                .count
                .compare_exchange(
                    current,
                    current + 1,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok()
            {
                self.bump(owner, 1);
                return Ok(());
            }
        }
    }

    /// Atomic compare-and-increment: returns `false` instead of failing
    /// when the count is already zero.
    pub fn try_reserve(&self, owner: Owner) -> bool {
        loop {
            let current = self.count.load(Ordering::SeqCst);
            if current == 0 {
                return false;
            }
            if self
                .count
                .compare_exchange(
                    current,
                    current + 1,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok()
            {
                self.bump(owner, 1);
                return true;
            }
        }
    }

    /// Decrements the count. Returns `true` exactly once, the call under
    /// which the count reached zero, so the caller can run its
    /// `perform_release` hook.
    pub fn release(&self, owner: Owner) -> bool {
        self.bump(owner, -1);
        self.count.fetch_sub(1, Ordering::SeqCst) == 1
    }

    /// Like [`release`](Self::release), but asserts the count was exactly
    /// 1 before the call - i.e. this really is the last outstanding
    /// reservation.
    pub fn release_last(&self, owner: Owner) {
        let was = self.count.load(Ordering::SeqCst);
        assert_eq!(was, 1, "releaseLast called with {was} outstanding reservations");
        let reached_zero = self.release(owner);
        debug_assert!(reached_zero);
    }

    /// True iff `owner` holds at least one live reservation.
    pub fn reserved_by(&self, owner: Owner) -> bool {
        self.owners
            .lock()
            .unwrap()
            .get(&owner)
            .map(|&n| n > 0)
            .unwrap_or(false)
    }

    /// Any owners that still hold a reservation. Used by leak-trap tests
    /// (spec scenario S6) and by `MappedFile`'s release path, which logs
    /// surviving reservations before unmapping anyway.
    pub fn surviving_owners(&self) -> Vec<Owner> {
        self.owners.lock().unwrap().keys().copied().collect()
    }
}

impl Default for RefCount {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared reference-counting contract implemented by every store and
/// cursor. `perform_release` runs exactly once, when the count transitions
/// from 1 to 0.
pub trait ReferenceCounted {
    /// Human-readable name used in error messages (e.g. "native store").
    fn resource_name(&self) -> &str;

    /// Access to the backing [`RefCount`].
    fn ref_count_state(&self) -> &RefCount;

    /// Runs exactly once when the reservation count reaches zero. Frees
    /// the underlying region.
    fn perform_release(&self);

    /// Whether release of this resource's underlying memory may be
    /// deferred to a background worker. False for mapped regions - the OS
    /// may reuse the address range immediately after `munmap`, so those
    /// must release synchronously.
    fn can_release_in_background(&self) -> bool {
        false
    }

    /// See [`RefCount::reserve`].
    fn reserve(&self, owner: Owner) -> Result<()> {
        self.ref_count_state().reserve(owner, self.resource_name())
    }

    /// See [`RefCount::try_reserve`].
    fn try_reserve(&self, owner: Owner) -> bool {
        self.ref_count_state().try_reserve(owner)
    }

    /// See [`RefCount::release`]. Invokes `perform_release` exactly once,
    /// when the count reaches zero. Implementations that are eligible for
    /// background release (see [`can_release_in_background`]) are
    /// expected to null out the memory reference synchronously inside
    /// `perform_release` and only enqueue the actual deallocation to the
    /// deferred worker, so a late buggy access fails closed rather than
    /// touching freed memory.
    ///
    /// [`can_release_in_background`]: Self::can_release_in_background
    fn release(&self, owner: Owner) {
        if self.ref_count_state().release(owner) {
            self.perform_release();
        }
    }

    /// See [`RefCount::release_last`].
    fn release_last(&self, owner: Owner) {
        self.ref_count_state().release_last(owner);
        self.perform_release();
    }

    /// See [`RefCount::reserved_by`].
    fn reserved_by(&self, owner: Owner) -> bool {
        self.ref_count_state().reserved_by(owner)
    }

    /// Current reservation count.
    fn ref_count(&self) -> usize {
        self.ref_count_state().get()
    }
}
