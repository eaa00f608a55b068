//! Sparse containers: local CSR blocks, the distributed sparsity graph and the
//! distributed CSR matrix with its assembly machinery.

pub mod atomic;
pub mod comm_plan;
pub mod csr_block;
pub mod distributed_csr;
pub mod element;
pub mod graph;
pub mod nonlocal;

pub use atomic::AtomicF64;
pub use comm_plan::{CommPlan, OwnedSlot, PeerPlan};
pub use csr_block::CsrBlock;
pub use distributed_csr::{AssemblyState, DistributedCsrMatrix};
pub use element::{DenseElement, ElementMatrix};
pub use graph::{DistributedGraph, DistributedSparseGraph, NonLocalGraph};
pub use nonlocal::NonLocalData;
