// SPDX-License-Identifier: Apache-2.0

use thiserror::Error as DeriveError;

/// Failures that can occur while bringing a [`crate::Region`] into being.
///
/// Unlike [`EngineError`], none of these ever abort a live transaction —
/// they only ever surface from [`crate::Region::create`], before any
/// transaction exists.
#[derive(Debug, DeriveError, PartialEq, Eq)]
pub enum RegionError {
    #[error("alignment {0} is not a power of two")]
    InvalidAlignment(usize),

    #[error("size {size} is not a positive multiple of alignment {alignment}")]
    InvalidSize { size: usize, alignment: usize },

    #[error("failed to allocate {size} bytes aligned to {alignment}")]
    AllocationFailed { size: usize, alignment: usize },
}

/// Failures that can occur while a transaction is in flight.
///
/// Every variant here corresponds to an abort: the engine has already
/// rolled the transaction back and consumed it by the time this error
/// reaches the caller.
#[derive(Debug, DeriveError, PartialEq, Eq)]
pub enum EngineError {
    #[error("address is not contained in any live segment")]
    SegmentNotFound,

    #[error("segment is tombstoned by a pending free")]
    Tombstoned,

    #[error("failed to acquire the segment lock")]
    LockContention,

    #[error("transaction is read-only")]
    ReadOnly,

    #[error("root segment cannot be freed")]
    RootSegment,
}
