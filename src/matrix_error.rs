//! MatrixError: unified error type for dist-csr public APIs.
//!
//! Construction, plan building and the collective finalisation step return
//! this type. Hot-path contract violations inside `assemble` are debug
//! assertions instead, see [`crate::sparse::distributed_csr`].

use thiserror::Error;

/// Unified error type for distributed CSR operations.
#[derive(Debug, Error)]
pub enum MatrixError {
    /// A CSR row received a different number of columns than reserved for it.
    #[error("pattern mismatch in row {row}: reserved {reserved} slots, inserted {inserted}")]
    PatternMismatch {
        row: usize,
        reserved: usize,
        inserted: usize,
    },
    /// The `(row, col)` pair is not part of the frozen sparsity pattern.
    #[error("entry ({row}, {col}) is not part of the sparsity pattern")]
    MissingEntry { row: usize, col: usize },
    /// Two sizes that must agree do not.
    #[error("dimension mismatch for {what}: expected {expected}, found {found}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    /// Row ownership bounds are malformed or do not match the communicator.
    #[error("invalid ownership bounds: {0}")]
    InvalidBounds(String),
    /// A global index falls outside every rank's ownership range.
    #[error("global index {index} is outside the global range [0, {size})")]
    IndexOutOfRange { index: usize, size: usize },
    /// An assembly-cycle operation was called in the wrong state.
    #[error("assembly state error: expected {expected:?}, found {found:?}")]
    AssemblyState {
        expected: crate::sparse::distributed_csr::AssemblyState,
        found: crate::sparse::distributed_csr::AssemblyState,
    },
    /// A sparse graph operation was called before/after finalisation.
    #[error("graph state error: {0}")]
    GraphState(&'static str),
    /// A point-to-point exchange with `neighbor` failed.
    #[error("communication error with rank {neighbor}: {source}")]
    CommError {
        neighbor: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// A received buffer does not decode into the expected wire records.
    #[error("wire format error: {0}")]
    WireFormat(String),
    /// A structural invariant does not hold.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}
