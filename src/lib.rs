#![cfg_attr(docsrs, feature(doc_cfg))]
//! # dist-csr
//!
//! dist-csr is a row-distributed compressed sparse row matrix for finite-element
//! codes. Rows are partitioned across ranks by contiguous ownership ranges;
//! element matrices are scattered into it concurrently, contributions to rows
//! owned elsewhere are folded into their owners in one collective step, and
//! the assembled matrix applies itself to a distributed vector.
//!
//! ## Features
//! - Fixed-pattern CSR blocks with lock-free atomic value accumulation
//! - Diagonal/off-diagonal split with dense ghost-column numbering
//! - Edge-colored communication schedule: each rank talks to at most one peer
//!   per round and the whole plan is computed once per sparsity pattern
//! - Pluggable communication backends (serial, threads, MPI)
//!
//! ## Usage
//! ```toml
//! [dependencies]
//! dist-csr = "0.1"
//! # features = ["mpi-support"]
//! ```
//!
//! A cycle looks like
//! ```no_run
//! use dist_csr::prelude::*;
//!
//! # fn main() -> Result<(), MatrixError> {
//! let mut graph = DistributedSparseGraph::uniform(3, NoComm)?;
//! graph.add_entries(&[0, 1])?;
//! graph.add_entries(&[1, 2])?;
//! graph.finalize()?;
//!
//! let mut a = DistributedCsrMatrix::new(&graph)?;
//! a.begin_assemble()?;
//! let k = [[1.0, -1.0], [-1.0, 1.0]];
//! a.assemble(&k, &[0, 1]);
//! a.assemble(&k, &[1, 2]);
//! a.finalize_assemble()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Determinism
//! Floating-point addition is not associative: concurrent `assemble` calls
//! produce the same sums up to rounding, in an order that depends on thread
//! scheduling.

pub mod algs;
pub mod debug_invariants;
pub mod matrix_error;
pub mod sparse;

pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::communicator::{
        AssemblyCommTags, CommTag, Communicator, NoComm, RayonComm,
    };
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::matrix_error::MatrixError;
    pub use crate::sparse::{
        AssemblyState, CsrBlock, DenseElement, DistributedCsrMatrix, DistributedGraph,
        DistributedSparseGraph, ElementMatrix,
    };
}
