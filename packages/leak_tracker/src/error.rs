use std::collections::TryReserveError;

use thiserror::Error;

/// Errors that can occur when setting up allocation tracking.
///
/// Once a [`Tracker`][crate::Tracker] exists, event processing never fails. Events that cannot
/// be attributed (filtered, unmatched, over capacity) are reported through the outcome types
/// and [`Diagnostics`][crate::Diagnostics] instead.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A configuration value was rejected when building a tracker or table.
    #[error("invalid configuration: '{setting}' {problem}")]
    InvalidConfiguration {
        /// Name of the setting that was rejected.
        setting: &'static str,

        /// A human-readable description of the problem.
        problem: String,
    },

    /// The fixed-size storage for a table could not be reserved.
    #[error("failed to reserve storage for {capacity} entries in the {table} table")]
    TableAllocation {
        /// Which table failed to allocate.
        table: &'static str,

        /// The number of entries that was requested.
        capacity: usize,

        /// Why the allocator refused the reservation.
        #[source]
        source: TryReserveError,
    },
}

/// A specialized `Result` type for tracker setup, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;
