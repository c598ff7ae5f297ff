use derive_more::{Display, From, Into};

/// Identifies the thread or process that issued an allocation request.
///
/// Only used to pair an allocation request with its completion. The value is opaque to the
/// tracker; event sources typically use the process or thread ID reported by the platform.
#[derive(Clone, Copy, Debug, Display, Eq, From, Hash, Into, Ord, PartialEq, PartialOrd)]
pub struct OwnerId(u64);

impl OwnerId {
    /// Creates an owner identity from its raw value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw value of the owner identity.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// The address of an allocated region.
///
/// At most one live allocation has a given address at any point in time,
/// though an address may be reused once the previous allocation has been freed.
#[derive(Clone, Copy, Debug, Display, Eq, From, Hash, Into, Ord, PartialEq, PartialOrd)]
#[display("{_0:#x}")]
pub struct Address(u64);

impl Address {
    /// The address returned by an allocator that failed to allocate.
    pub const NULL: Self = Self(0);

    /// Creates an address from its raw value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw value of the address.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Whether this is the null address, which signals a failed allocation.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Opaque handle for a call stack, as produced by a [`StackResolver`][crate::StackResolver].
///
/// The tracker attaches no meaning to the value beyond identity.
#[derive(Clone, Copy, Debug, Display, Eq, From, Hash, Into, Ord, PartialEq, PartialOrd)]
pub struct StackId(u64);

impl StackId {
    /// Attributed to allocations whose call stack could not be resolved.
    ///
    /// Such allocations still count toward the totals, they are just not attributable
    /// to a specific call site.
    pub const UNRESOLVED: Self = Self(u64::MAX);

    /// Creates a stack identity from its raw value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw value of the stack identity.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Whether this is the [`UNRESOLVED`][Self::UNRESOLVED] sentinel.
    #[must_use]
    pub const fn is_unresolved(self) -> bool {
        self.0 == u64::MAX
    }
}

/// Nanoseconds on the monotonic timeline of a [`Clock`][crate::Clock].
pub type Timestamp = u64;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(OwnerId: Send, Sync, Copy);
    assert_impl_all!(Address: Send, Sync, Copy);
    assert_impl_all!(StackId: Send, Sync, Copy);

    #[test]
    fn address_displays_as_hex() {
        assert_eq!(Address::new(0x1000).to_string(), "0x1000");
    }

    #[test]
    fn null_address() {
        assert!(Address::NULL.is_null());
        assert!(Address::new(0).is_null());
        assert!(!Address::new(1).is_null());
    }

    #[test]
    fn unresolved_stack_is_distinguishable() {
        assert!(StackId::UNRESOLVED.is_unresolved());
        assert!(!StackId::new(7).is_unresolved());
    }

    #[test]
    fn raw_value_conversions() {
        let owner: OwnerId = 42_u64.into();
        assert_eq!(owner.get(), 42);

        let raw: u64 = StackId::new(9).into();
        assert_eq!(raw, 9);
    }
}
