use std::fmt::Debug;

use thiserror::Error;

use crate::StackId;

/// Which address space a call stack should be interpreted in.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[expect(
    clippy::exhaustive_enums,
    reason = "stacks are either walked in user space or in the kernel, there is no third option"
)]
pub enum AddressSpace {
    /// The stack of the user-space code that called the allocator.
    User,

    /// The kernel stack, for allocations made by the kernel itself.
    Kernel,
}

/// The call stack of an allocation could not be turned into a [`StackId`].
///
/// The allocation is still tracked, attributed to [`StackId::UNRESOLVED`].
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
#[error("the call stack could not be resolved")]
#[expect(
    clippy::exhaustive_structs,
    reason = "marker type that resolver implementations need to construct"
)]
pub struct Unresolvable;

/// Turns the call context of an allocation into a stable stack identity.
///
/// Walking frames, deduplicating stacks and symbolizing them are the business of the
/// implementation. The tracker only needs equal call stacks to map to equal identities.
///
/// Implementations are invoked concurrently from every thread that reports events, so
/// they must be cheap and must not block.
#[cfg_attr(test, mockall::automock(type Context = u64;))]
pub trait StackResolver: Debug + Send + Sync {
    /// Whatever the event source hands over to identify the call site of an allocation,
    /// e.g. a register snapshot or a pre-walked list of return addresses.
    type Context;

    /// Resolves the call stack described by `context` in the given address space.
    ///
    /// # Errors
    ///
    /// Returns [`Unresolvable`] if no stack identity can be produced, for example because
    /// the resolver's own storage is full or the stack could not be walked.
    fn resolve_stack(
        &self,
        context: &Self::Context,
        space: AddressSpace,
    ) -> Result<StackId, Unresolvable>;
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use mockall::predicate::eq;

    use super::*;

    #[test]
    fn mock_resolver_receives_context_and_space() {
        let mut resolver = MockStackResolver::new();
        resolver
            .expect_resolve_stack()
            .with(eq(5_u64), eq(AddressSpace::Kernel))
            .times(1)
            .returning(|context, _| Ok(StackId::new(*context * 10)));

        assert_eq!(
            resolver.resolve_stack(&5, AddressSpace::Kernel),
            Ok(StackId::new(50))
        );
    }

    #[test]
    fn unresolvable_has_a_message() {
        assert_eq!(
            Unresolvable.to_string(),
            "the call stack could not be resolved"
        );
    }
}
