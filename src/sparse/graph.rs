//! Distributed sparsity graph: which global columns each row touches.
//!
//! Rows are partitioned by contiguous ownership ranges. A rank records the
//! entries its elements touch; entries in rows owned elsewhere are kept per
//! owning rank as [`NonLocalGraph`]s. [`DistributedSparseGraph::finalize`]
//! ships those entries to their owners, so that after finalisation every
//! owned row contains every column any rank will ever assemble into it.
//!
//! The matrix only consumes the read-only [`DistributedGraph`] view.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::Mutex;

use crate::algs::collective::exchange_records;
use crate::algs::coloring::compute_communication_schedule;
use crate::algs::communicator::{AssemblyCommTags, Communicator};
use crate::algs::search::{binary_search, owner_of};
use crate::algs::wire::WireEntry;
use crate::matrix_error::MatrixError;

/// Entries in rows owned by one remote rank, keyed by the row's local index on
/// that rank.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NonLocalGraph {
    rows: BTreeMap<usize, BTreeSet<usize>>,
}

impl NonLocalGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record global column `col` in remote-local row `row`.
    pub fn add(&mut self, row: usize, col: usize) {
        self.rows.entry(row).or_default().insert(col);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn nnz(&self) -> usize {
        self.rows.values().map(BTreeSet::len).sum()
    }

    /// `(remote_local_row, global_col)` pairs, ascending.
    pub fn entries(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.rows
            .iter()
            .flat_map(|(&row, cols)| cols.iter().map(move |&col| (row, col)))
    }
}

/// Read-only view of a distributed graph, as consumed by
/// [`DistributedCsrMatrix`](crate::sparse::distributed_csr::DistributedCsrMatrix).
pub trait DistributedGraph {
    type Comm: Communicator + Clone;
    type RowIter<'a>: Iterator<Item = usize>
    where
        Self: 'a;

    /// Global number of rows.
    fn size(&self) -> usize;

    fn comm(&self) -> &Self::Comm;

    /// `[first, end)` of the rows owned by this rank.
    fn local_bounds(&self) -> [usize; 2];

    /// Per-rank row offsets, `size + 1` entries.
    fn cpu_bounds(&self) -> &[usize];

    fn local_row_count(&self) -> usize {
        let [begin, end] = self.local_bounds();
        end - begin
    }

    /// Global column ids touched by owned row `local_row`, ascending.
    fn local_row(&self, local_row: usize) -> Self::RowIter<'_>;

    fn is_local(&self, global: usize) -> bool {
        let [begin, end] = self.local_bounds();
        global >= begin && global < end
    }

    /// Entries this rank contributes to rows owned by each rank (indexed by
    /// rank; this rank's own slot is empty).
    fn non_local_graphs(&self) -> &[NonLocalGraph];

    /// Whether remote contributions have been merged into the owned rows.
    fn is_finalized(&self) -> bool {
        true
    }
}

/// Concrete distributed graph builder.
///
/// Entries may be added concurrently from element loops (`add_*` take
/// `&self`); each owned row and each remote rank's graph has its own lock.
#[derive(Debug)]
pub struct DistributedSparseGraph<C: Communicator> {
    comm: C,
    cpu_bounds: Vec<usize>,
    local_bounds: [usize; 2],
    pending_local: Vec<Mutex<BTreeSet<usize>>>,
    pending_non_local: Vec<Mutex<NonLocalGraph>>,
    local_rows: Vec<Vec<usize>>,
    non_local: Vec<NonLocalGraph>,
    finalized: bool,
}

impl<C: Communicator + Clone> DistributedSparseGraph<C> {
    /// Graph with explicit per-rank row offsets.
    pub fn new(cpu_bounds: Vec<usize>, comm: C) -> Result<Self, MatrixError> {
        let size = comm.size();
        if cpu_bounds.len() != size + 1 {
            return Err(MatrixError::InvalidBounds(format!(
                "expected {} cpu bounds for {size} ranks, got {}",
                size + 1,
                cpu_bounds.len()
            )));
        }
        if cpu_bounds[0] != 0 || cpu_bounds.windows(2).any(|w| w[0] > w[1]) {
            return Err(MatrixError::InvalidBounds(format!(
                "cpu bounds must start at 0 and be non-decreasing: {cpu_bounds:?}"
            )));
        }
        let rank = comm.rank();
        let local_bounds = [cpu_bounds[rank], cpu_bounds[rank + 1]];
        let n_local = local_bounds[1] - local_bounds[0];
        Ok(Self {
            comm,
            cpu_bounds,
            local_bounds,
            pending_local: (0..n_local).map(|_| Mutex::new(BTreeSet::new())).collect(),
            pending_non_local: (0..size).map(|_| Mutex::new(NonLocalGraph::new())).collect(),
            local_rows: Vec::new(),
            non_local: Vec::new(),
            finalized: false,
        })
    }

    /// Graph over `global_size` rows split as evenly as possible, lower ranks
    /// taking the remainder.
    pub fn uniform(global_size: usize, comm: C) -> Result<Self, MatrixError> {
        let size = comm.size();
        let (chunk, rest) = (global_size / size, global_size % size);
        let mut bounds = Vec::with_capacity(size + 1);
        bounds.push(0);
        for r in 0..size {
            let len = chunk + usize::from(r < rest);
            bounds.push(bounds[r] + len);
        }
        Self::new(bounds, comm)
    }

    /// Record entry `(i, j)` in global ids.
    pub fn add_entry(&self, i: usize, j: usize) -> Result<(), MatrixError> {
        if self.finalized {
            return Err(MatrixError::GraphState("entries added after finalize"));
        }
        let n = self.size();
        for index in [i, j] {
            if index >= n {
                return Err(MatrixError::IndexOutOfRange { index, size: n });
            }
        }
        if self.is_local(i) {
            self.pending_local[i - self.local_bounds[0]].lock().insert(j);
        } else {
            let owner = owner_of(&self.cpu_bounds, i)
                .ok_or(MatrixError::IndexOutOfRange { index: i, size: n })?;
            self.pending_non_local[owner]
                .lock()
                .add(i - self.cpu_bounds[owner], j);
        }
        Ok(())
    }

    /// Record the full `ids × ids` block of a finite element.
    pub fn add_entries(&self, ids: &[usize]) -> Result<(), MatrixError> {
        self.add_entries_rect(ids, ids)
    }

    /// Record the `rows × cols` block.
    pub fn add_entries_rect(&self, rows: &[usize], cols: &[usize]) -> Result<(), MatrixError> {
        for &i in rows {
            for &j in cols {
                self.add_entry(i, j)?;
            }
        }
        Ok(())
    }

    /// Finalise with default tags. Collective.
    pub fn finalize(&mut self) -> Result<(), MatrixError> {
        self.finalize_with_tags(AssemblyCommTags::default())
    }

    /// Ship non-local entries to their owners and freeze the owned rows.
    ///
    /// Collective: every rank of the communicator must call it.
    pub fn finalize_with_tags(&mut self, tags: AssemblyCommTags) -> Result<(), MatrixError> {
        if self.finalized {
            return Err(MatrixError::GraphState("graph finalized twice"));
        }
        let mut local: Vec<BTreeSet<usize>> = std::mem::take(&mut self.pending_local)
            .into_iter()
            .map(Mutex::into_inner)
            .collect();
        let mut non_local: Vec<NonLocalGraph> = std::mem::take(&mut self.pending_non_local)
            .into_iter()
            .map(Mutex::into_inner)
            .collect();
        // own rows never end up here, but keep the slot empty regardless
        non_local[self.comm.rank()] = NonLocalGraph::new();

        let send_list: Vec<usize> = non_local
            .iter()
            .enumerate()
            .filter(|(_, g)| !g.is_empty())
            .map(|(r, _)| r)
            .collect();
        let schedule = compute_communication_schedule(&send_list, &self.comm, tags.schedule)?;

        let mut received = 0usize;
        for peer in schedule.iter().flatten().copied() {
            let offset = self.cpu_bounds[peer];
            let outgoing: Vec<WireEntry> = non_local[peer]
                .entries()
                .map(|(row, col)| WireEntry::new(offset + row, col))
                .collect();
            let incoming = exchange_records(&self.comm, peer, tags.graph, &outgoing)?;
            for e in &incoming {
                let (row, col) = (e.row(), e.col());
                if !self.is_local(row) || col >= self.size() {
                    return Err(MatrixError::WireFormat(format!(
                        "rank {peer} sent entry ({row}, {col}) not owned by rank {}",
                        self.comm.rank()
                    )));
                }
                local[row - self.local_bounds[0]].insert(col);
            }
            received += incoming.len();
        }

        self.local_rows = local
            .into_iter()
            .map(|cols| cols.into_iter().collect())
            .collect();
        self.non_local = non_local;
        self.finalized = true;
        log::debug!(
            "rank {}: graph finalized, {} local nnz ({} received), {} peers",
            self.comm.rank(),
            self.local_nnz(),
            received,
            schedule.iter().flatten().count()
        );
        Ok(())
    }

    /// Whether owned row `i` (global id) contains column `j`.
    pub fn has(&self, i: usize, j: usize) -> bool {
        if !self.is_local(i) {
            return false;
        }
        let li = i - self.local_bounds[0];
        if self.finalized {
            binary_search(&self.local_rows[li], &j).is_some()
        } else {
            self.pending_local[li].lock().contains(&j)
        }
    }

    /// Number of entries in owned rows.
    pub fn local_nnz(&self) -> usize {
        if self.finalized {
            self.local_rows.iter().map(Vec::len).sum()
        } else {
            self.pending_local.iter().map(|r| r.lock().len()).sum()
        }
    }
}

impl<C: Communicator + Clone> DistributedGraph for DistributedSparseGraph<C> {
    type Comm = C;
    type RowIter<'a>
        = std::iter::Copied<std::slice::Iter<'a, usize>>
    where
        Self: 'a;

    fn size(&self) -> usize {
        self.cpu_bounds[self.cpu_bounds.len() - 1]
    }

    fn comm(&self) -> &C {
        &self.comm
    }

    fn local_bounds(&self) -> [usize; 2] {
        self.local_bounds
    }

    fn cpu_bounds(&self) -> &[usize] {
        &self.cpu_bounds
    }

    fn local_row(&self, local_row: usize) -> Self::RowIter<'_> {
        self.local_rows[local_row].iter().copied()
    }

    fn non_local_graphs(&self) -> &[NonLocalGraph] {
        &self.non_local
    }

    fn is_finalized(&self) -> bool {
        self.finalized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{NoComm, RayonComm};

    #[test]
    fn uniform_bounds_spread_remainder() {
        let world = RayonComm::world(3);
        let g = DistributedSparseGraph::uniform(7, world[1].clone()).unwrap();
        assert_eq!(g.cpu_bounds(), &[0, 3, 5, 7]);
        assert_eq!(g.local_bounds(), [3, 5]);
        assert!(g.is_local(4) && !g.is_local(5));
    }

    #[test]
    fn malformed_bounds_are_rejected() {
        assert!(DistributedSparseGraph::new(vec![0, 2, 1], NoComm).is_err());
        assert!(DistributedSparseGraph::new(vec![1, 2], NoComm).is_err());
        assert!(DistributedSparseGraph::new(vec![0, 4], NoComm).is_ok());
    }

    #[test]
    fn serial_graph_rows_are_sorted() {
        let mut g = DistributedSparseGraph::uniform(3, NoComm).unwrap();
        g.add_entries(&[2, 0]).unwrap();
        g.add_entry(1, 1).unwrap();
        assert!(g.add_entry(3, 0).is_err());
        g.finalize().unwrap();
        let row0: Vec<_> = g.local_row(0).collect();
        assert_eq!(row0, vec![0, 2]);
        assert_eq!(g.local_nnz(), 5);
        assert!(g.has(2, 0) && !g.has(1, 0));
        assert!(matches!(g.add_entry(0, 1), Err(MatrixError::GraphState(_))));
    }

    #[test]
    fn finalize_ships_entries_to_owner() {
        let world = RayonComm::world(2);
        let graphs = std::thread::scope(|s| {
            let handles: Vec<_> = world
                .iter()
                .cloned()
                .map(|comm| {
                    s.spawn(move || {
                        let mut g = DistributedSparseGraph::uniform(4, comm).unwrap();
                        if g.comm().rank() == 1 {
                            // element touching one row owned by rank 0
                            g.add_entries(&[1, 2]).unwrap();
                        }
                        g.finalize().unwrap();
                        g
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .collect::<Vec<_>>()
        });

        let (g0, g1) = (&graphs[0], &graphs[1]);
        assert!(g0.has(1, 1) && g0.has(1, 2));
        assert!(g1.has(2, 1) && g1.has(2, 2));
        assert_eq!(g1.non_local_graphs()[0].entries().collect::<Vec<_>>(), vec![(1, 1), (1, 2)]);
        assert!(g0.non_local_graphs().iter().all(NonLocalGraph::is_empty));
    }
}
