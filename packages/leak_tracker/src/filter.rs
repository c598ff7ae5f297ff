use crate::{OwnerId, Timestamp};

/// Decides whether an allocation request is tracked at all.
///
/// The decision is a pure function of the request and the configuration: no state is
/// shared between events, so admission never needs cross-event coordination.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Filter {
    owner: Option<OwnerId>,
    min_size: u64,
    max_size: u64,
    sample_stride: u64,
}

impl Filter {
    /// # Panics
    ///
    /// Panics if `sample_stride` is zero. The builder validates this before we get here.
    pub(crate) fn new(
        owner: Option<OwnerId>,
        min_size: u64,
        max_size: u64,
        sample_stride: u64,
    ) -> Self {
        assert!(sample_stride != 0, "sample stride must not be zero");

        Self {
            owner,
            min_size,
            max_size,
            sample_stride,
        }
    }

    /// Whether requests from `owner` are tracked at all.
    pub(crate) fn admit_owner(&self, owner: OwnerId) -> bool {
        self.owner.is_none_or(|only| only == owner)
    }

    /// Whether a request for `size` bytes observed at `now` is tracked.
    ///
    /// With a sample stride above one, only requests observed in a time bucket that is a
    /// multiple of the stride are admitted. This samples by time rather than by counting
    /// events, so the admitted fraction is approximate and not uniform.
    pub(crate) fn admit(&self, size: u64, now: Timestamp) -> bool {
        if size < self.min_size || size > self.max_size {
            return false;
        }

        self.sample_stride <= 1 || now.checked_rem(self.sample_stride) == Some(0)
    }
}

impl Default for Filter {
    fn default() -> Self {
        Self::new(None, 0, u64::MAX, 1)
    }
}
