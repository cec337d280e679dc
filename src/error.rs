//! Error kinds surfaced to callers of the blob cache.
//!
//! Every externally visible failure boils down to one of the eight kinds
//! below. Internal invariant violations are not represented here — those are
//! programming errors and are reported through `assert!`/`panic!`, not
//! through `BlobError` (see the crate-level docs).

use thiserror::Error;

/// Errors surfaced by the blob cache's public API.
#[derive(Error, Debug)]
pub enum BlobError {
    /// Allocation failed.
    #[error("out of memory")]
    Memory,

    /// Exclusive-mode conflict, font-hint mismatch, or other mode-bit
    /// disagreement between a request and the entry it would join.
    #[error("access error: {0}")]
    Access(String),

    /// The source was cleared by the garbage collector.
    #[error("source expired")]
    Expired,

    /// A read or seek ran past the end of available data.
    #[error("end of data")]
    EndOfData,

    /// A nil handle, bad alignment, or bad flag combination was passed.
    #[error("invalid argument: {0}")]
    Invalid(String),

    /// A source method returned failure.
    #[error("source i/o error: {0}")]
    Io(String),
}

/// Result type for blob cache operations.
pub type BlobResult<T> = Result<T, BlobError>;
