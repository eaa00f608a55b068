//! Structural invariant checks for CSR blocks, communication plans and the
//! distributed matrix.
//!
//! Checks run on construction in debug builds, or in release builds with the
//! `strict-invariants` / `check-invariants` features. They never run on the
//! assembly hot path.

use crate::matrix_error::MatrixError;

/// Trait for validating data structure invariants.
pub trait DebugInvariants {
    /// Panic on the first violated invariant when invariant checking is enabled.
    fn debug_assert_invariants(&self);
    /// Validate invariants and return the first error encountered.
    fn validate_invariants(&self) -> Result<(), MatrixError>;
}

/// Turn a failed condition into [`MatrixError::InvariantViolation`].
#[inline]
pub fn ensure(cond: bool, msg: impl FnOnce() -> String) -> Result<(), MatrixError> {
    if cond {
        Ok(())
    } else {
        Err(MatrixError::InvariantViolation(msg()))
    }
}

/// Run a fallible check and panic on error when invariant checking is enabled.
#[macro_export]
macro_rules! debug_invariants {
    ($expr:expr, $($ctx:tt)*) => {
        #[cfg(any(debug_assertions, feature = "strict-invariants", feature = "check-invariants"))]
        if let Err(e) = $expr {
            panic!(concat!("[invariants] ", $($ctx)*, ": {}"), e);
        }
    };
}
