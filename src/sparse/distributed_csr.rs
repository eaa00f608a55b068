//! Row-distributed CSR matrix with finite-element style assembly.
//!
//! Each rank stores its owned rows as two [`CsrBlock`]s: the diagonal block
//! (columns owned by this rank, indexed locally) and the off-diagonal block
//! (columns owned elsewhere, indexed densely through the sorted ghost-column
//! list). Contributions to rows owned by other ranks are accumulated in
//! [`NonLocalData`] and folded into their owners by [`CommPlan`] in
//! `finalize_assemble`.
//!
//! # Assembly cycle
//! ```text
//! Idle --begin_assemble--> Assembling --finalize_assemble--> Idle
//!                            |   ^
//!                            assemble (concurrent, &self)
//! ```
//! `begin_assemble` zeroes only the non-local accumulators; owned values are
//! reset by the caller (`set_value(0.0)`) when a fresh cycle is wanted.
//! `finalize_assemble` is collective: every rank must call it once per cycle.

use rayon::prelude::*;

use crate::algs::collective::sum_all;
use crate::algs::communicator::{AssemblyCommTags, Communicator};
use crate::algs::search::{binary_search, owner_of};
use crate::debug_invariants::{DebugInvariants, ensure};
use crate::matrix_error::MatrixError;
use crate::sparse::comm_plan::{CommPlan, OwnedSlot};
use crate::sparse::csr_block::CsrBlock;
use crate::sparse::element::ElementMatrix;
use crate::sparse::graph::DistributedGraph;
use crate::sparse::nonlocal::NonLocalData;

/// State of the assembly cycle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum AssemblyState {
    #[default]
    Idle,
    Assembling,
}

/// Distributed CSR matrix over communicator `C`.
#[derive(Debug)]
pub struct DistributedCsrMatrix<C: Communicator> {
    comm: C,
    tags: AssemblyCommTags,
    global_size: usize,
    local_bounds: [usize; 2],
    cpu_bounds: Vec<usize>,
    diag: CsrBlock,
    off_diag: CsrBlock,
    /// Global ids of the off-diagonal columns; position = dense local id.
    off_diag_global_ids: Vec<usize>,
    non_local: NonLocalData,
    plan: CommPlan,
    state: AssemblyState,
}

impl<C: Communicator + Clone> DistributedCsrMatrix<C> {
    /// Build the matrix pattern and communication plan from a finalised graph.
    /// Collective.
    pub fn new<G>(graph: &G) -> Result<Self, MatrixError>
    where
        G: DistributedGraph<Comm = C>,
    {
        Self::with_tags(graph, AssemblyCommTags::default())
    }

    /// As [`new`](Self::new), with explicit message tags.
    pub fn with_tags<G>(graph: &G, tags: AssemblyCommTags) -> Result<Self, MatrixError>
    where
        G: DistributedGraph<Comm = C>,
    {
        if !graph.is_finalized() {
            return Err(MatrixError::GraphState(
                "matrix built from a graph that was not finalized",
            ));
        }
        let comm = graph.comm().clone();
        let local_bounds = graph.local_bounds();
        let cpu_bounds = graph.cpu_bounds().to_vec();
        if cpu_bounds.len() != comm.size() + 1 {
            return Err(MatrixError::InvalidBounds(format!(
                "{} cpu bounds for {} ranks",
                cpu_bounds.len(),
                comm.size()
            )));
        }
        let n_local = graph.local_row_count();
        let is_local = |j: usize| j >= local_bounds[0] && j < local_bounds[1];

        // 1) count both blocks and collect ghost columns
        let (mut diag_nnz, mut off_nnz) = (0usize, 0usize);
        let mut ghosts = Vec::new();
        for i in 0..n_local {
            for j in graph.local_row(i) {
                if is_local(j) {
                    diag_nnz += 1;
                } else {
                    off_nnz += 1;
                    ghosts.push(j);
                }
            }
        }

        // 2) dense off-diagonal ids, ascending in global id
        ghosts.sort_unstable();
        ghosts.dedup();
        let off_diag_global_ids = ghosts;

        // 3) diagonal block
        let mut diag = CsrBlock::reserve(n_local, n_local, diag_nnz);
        for i in 0..n_local {
            let cols = graph
                .local_row(i)
                .filter(|&j| is_local(j))
                .map(|j| j - local_bounds[0]);
            diag.push_row(i, cols)?;
        }
        diag.finish_pattern()?;

        // 4) off-diagonal block
        let mut off_diag = CsrBlock::reserve(n_local, off_diag_global_ids.len(), off_nnz);
        for i in 0..n_local {
            let mut cols = Vec::new();
            for j in graph.local_row(i).filter(|&j| !is_local(j)) {
                let local_j = binary_search(&off_diag_global_ids, &j)
                    .ok_or(MatrixError::MissingEntry { row: local_bounds[0] + i, col: j })?;
                cols.push(local_j);
            }
            off_diag.push_row(i, cols)?;
        }
        off_diag.finish_pattern()?;

        // 5) non-local accumulators and the plan that ships them
        let non_local_graphs = graph.non_local_graphs();
        let non_local = NonLocalData::from_keys(non_local_graphs.iter().enumerate().flat_map(
            |(owner, g)| {
                let offset = cpu_bounds[owner];
                g.entries().map(move |(row, col)| (offset + row, col))
            },
        ));
        let resolve = |row: usize, col: usize| {
            owned_slot(&diag, &off_diag, &off_diag_global_ids, local_bounds, row, col)
        };
        let plan = CommPlan::build(
            &comm,
            tags,
            non_local_graphs,
            &cpu_bounds,
            &non_local,
            resolve,
        )?;

        log::debug!(
            "rank {}: rows [{}, {}), diag nnz {}, off-diag nnz {} over {} ghost columns, {} non-local entries, {} colors",
            comm.rank(),
            local_bounds[0],
            local_bounds[1],
            diag.nnz(),
            off_diag.nnz(),
            off_diag_global_ids.len(),
            non_local.len(),
            plan.n_colors()
        );

        let matrix = Self {
            comm,
            tags,
            global_size: graph.size(),
            local_bounds,
            cpu_bounds,
            diag,
            off_diag,
            off_diag_global_ids,
            non_local,
            plan,
            state: AssemblyState::Idle,
        };
        crate::debug_invariants!(matrix.validate_invariants(), "DistributedCsrMatrix::new");
        Ok(matrix)
    }
}

impl<C: Communicator> DistributedCsrMatrix<C> {
    #[inline]
    pub fn comm(&self) -> &C {
        &self.comm
    }

    #[inline]
    pub fn diag_block(&self) -> &CsrBlock {
        &self.diag
    }

    #[inline]
    pub fn off_diag_block(&self) -> &CsrBlock {
        &self.off_diag
    }

    /// Global ids of the off-diagonal columns, indexed by their dense local id.
    /// This is the import list a ghost exchange must fill before
    /// [`mult_and_add`](Self::mult_and_add).
    #[inline]
    pub fn off_diag_global_ids(&self) -> &[usize] {
        &self.off_diag_global_ids
    }

    #[inline]
    pub fn local_bounds(&self) -> [usize; 2] {
        self.local_bounds
    }

    #[inline]
    pub fn cpu_bounds(&self) -> &[usize] {
        &self.cpu_bounds
    }

    /// Global number of rows (and columns).
    #[inline]
    pub fn global_size(&self) -> usize {
        self.global_size
    }

    #[inline]
    pub fn local_row_count(&self) -> usize {
        self.local_bounds[1] - self.local_bounds[0]
    }

    #[inline]
    pub fn state(&self) -> AssemblyState {
        self.state
    }

    #[inline]
    pub fn comm_plan(&self) -> &CommPlan {
        &self.plan
    }

    #[inline]
    pub fn non_local_data(&self) -> &NonLocalData {
        &self.non_local
    }

    #[inline]
    pub fn is_local(&self, global: usize) -> bool {
        global >= self.local_bounds[0] && global < self.local_bounds[1]
    }

    #[inline]
    pub fn local_id(&self, global: usize) -> usize {
        global - self.local_bounds[0]
    }

    #[inline]
    pub fn global_id(&self, local: usize) -> usize {
        local + self.local_bounds[0]
    }

    /// Index of `global` relative to the first row owned by `owner`.
    #[inline]
    pub fn remote_local_id(&self, global: usize, owner: usize) -> usize {
        global - self.cpu_bounds[owner]
    }

    #[inline]
    pub fn remote_global_id(&self, remote_local: usize, owner: usize) -> usize {
        remote_local + self.cpu_bounds[owner]
    }

    /// Dense off-diagonal column id of a ghost column.
    #[inline]
    pub fn off_diag_local_id(&self, global: usize) -> Option<usize> {
        binary_search(&self.off_diag_global_ids, &global)
    }

    /// Rank owning global row `row`.
    pub fn owner_rank(&self, row: usize) -> Option<usize> {
        owner_of(&self.cpu_bounds, row)
    }

    /// Owned value slot of global `(row, col)`; `row` must be owned here.
    #[inline]
    pub fn local_slot(&self, row: usize, col: usize) -> Option<OwnedSlot> {
        owned_slot(
            &self.diag,
            &self.off_diag,
            &self.off_diag_global_ids,
            self.local_bounds,
            row,
            col,
        )
    }

    /// Current value of owned entry `(row, col)` in global ids.
    pub fn local_value(&self, row: usize, col: usize) -> Option<f64> {
        self.local_slot(row, col).map(|slot| match slot {
            OwnedSlot::Diag(k) => self.diag.cell_at(k).load(),
            OwnedSlot::OffDiag(k) => self.off_diag.cell_at(k).load(),
        })
    }

    /// Current partial sum held for non-owned entry `(row, col)`.
    pub fn non_local_value(&self, row: usize, col: usize) -> Option<f64> {
        self.non_local.get(row, col)
    }

    /// Stored entries in owned rows.
    pub fn local_nnz(&self) -> usize {
        self.diag.nnz() + self.off_diag.nnz()
    }

    /// Stored entries over all ranks. Collective.
    pub fn global_nnz(&self) -> Result<usize, MatrixError> {
        sum_all(&self.comm, self.tags.reduce, self.local_nnz())
    }

    /// Overwrite every owned value with `value`.
    pub fn set_value(&mut self, value: f64) {
        self.diag.set_value(value);
        self.off_diag.set_value(value);
    }

    /// Multiply every owned value by `factor`.
    pub fn scale(&mut self, factor: f64) {
        self.diag.scale(factor);
        self.off_diag.scale(factor);
    }

    /// Start a cycle: zero the non-local accumulators.
    pub fn begin_assemble(&mut self) -> Result<(), MatrixError> {
        if self.state != AssemblyState::Idle {
            return Err(MatrixError::AssemblyState {
                expected: AssemblyState::Idle,
                found: self.state,
            });
        }
        self.non_local.zero();
        self.state = AssemblyState::Assembling;
        Ok(())
    }

    /// Add the dense `element` at rows/columns `equation_ids`.
    ///
    /// Safe to call from many threads at once. `element` must be square of
    /// side `equation_ids.len()`, and every `(row, col)` pair must be in the
    /// pattern the matrix was built from; both are checked in debug builds
    /// only.
    pub fn assemble<E>(&self, element: &E, equation_ids: &[usize])
    where
        E: ElementMatrix + ?Sized,
    {
        debug_assert_eq!(self.state, AssemblyState::Assembling, "assemble outside a cycle");
        debug_assert_eq!(
            element.size1(),
            equation_ids.len(),
            "element rows do not match equation ids"
        );
        debug_assert_eq!(
            element.size2(),
            equation_ids.len(),
            "element columns do not match equation ids"
        );

        for (i, &row) in equation_ids.iter().enumerate() {
            if self.is_local(row) {
                let local_row = row - self.local_bounds[0];
                for (j, &col) in equation_ids.iter().enumerate() {
                    let v = element.at(i, j);
                    if self.is_local(col) {
                        self.diag.add(local_row, col - self.local_bounds[0], v);
                    } else {
                        match self.off_diag_local_id(col) {
                            Some(local_col) => self.off_diag.add(local_row, local_col, v),
                            None => debug_assert!(false, "({row}, {col}) is not in the pattern"),
                        }
                    }
                }
            } else {
                for (j, &col) in equation_ids.iter().enumerate() {
                    match self.non_local.slot(row, col) {
                        Some(k) => {
                            self.non_local.cell_at(k).fetch_add(element.at(i, j));
                        }
                        None => debug_assert!(false, "({row}, {col}) is not in the pattern"),
                    }
                }
            }
        }
    }

    /// Fold every rank's non-local partial sums into their owners.
    ///
    /// Collective: every rank must call it, once per cycle, in the same order
    /// relative to other collectives on the same communicator.
    pub fn finalize_assemble(&mut self) -> Result<(), MatrixError> {
        if self.state != AssemblyState::Assembling {
            return Err(MatrixError::AssemblyState {
                expected: AssemblyState::Assembling,
                found: self.state,
            });
        }
        self.plan.execute(
            &self.comm,
            self.tags.values,
            &self.non_local,
            &self.diag,
            &self.off_diag,
        )?;
        self.state = AssemblyState::Idle;
        Ok(())
    }

    /// `output += A * input`.
    ///
    /// `local_input` is indexed by owned column (`global - local_bounds[0]`),
    /// `remote_input` by off-diagonal id and must hold current values of the
    /// columns in [`off_diag_global_ids`](Self::off_diag_global_ids).
    pub fn mult_and_add(
        &self,
        output: &mut [f64],
        local_input: &[f64],
        remote_input: &[f64],
    ) -> Result<(), MatrixError> {
        self.diag.mult_and_add(output, local_input)?;
        self.off_diag.mult_and_add(output, remote_input)
    }

    /// Owned rows as `(global_row, global_col, value)` triplets, row-major.
    pub fn local_triplets(&self) -> Vec<(usize, usize, f64)> {
        (0..self.local_row_count())
            .into_par_iter()
            .flat_map_iter(|i| {
                let row = self.global_id(i);
                let mut entries: Vec<(usize, usize, f64)> = self
                    .diag
                    .row(i)
                    .map(|(j, v)| (row, self.global_id(j), v))
                    .chain(
                        self.off_diag
                            .row(i)
                            .map(|(j, v)| (row, self.off_diag_global_ids[j], v)),
                    )
                    .collect();
                entries.sort_unstable_by_key(|&(_, col, _)| col);
                entries
            })
            .collect()
    }
}

fn owned_slot(
    diag: &CsrBlock,
    off_diag: &CsrBlock,
    off_diag_global_ids: &[usize],
    local_bounds: [usize; 2],
    row: usize,
    col: usize,
) -> Option<OwnedSlot> {
    let owned = |g: usize| g >= local_bounds[0] && g < local_bounds[1];
    if !owned(row) {
        return None;
    }
    let local_row = row - local_bounds[0];
    if owned(col) {
        diag.slot(local_row, col - local_bounds[0]).map(OwnedSlot::Diag)
    } else {
        let local_col = binary_search(off_diag_global_ids, &col)?;
        off_diag.slot(local_row, local_col).map(OwnedSlot::OffDiag)
    }
}

impl<C: Communicator> DebugInvariants for DistributedCsrMatrix<C> {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "DistributedCsrMatrix");
    }

    fn validate_invariants(&self) -> Result<(), MatrixError> {
        self.diag.validate_invariants()?;
        self.off_diag.validate_invariants()?;
        self.plan.validate_invariants()?;
        let n_local = self.local_row_count();
        ensure(self.diag.nrows() == n_local && self.off_diag.nrows() == n_local, || {
            format!("blocks do not have {n_local} rows")
        })?;
        ensure(self.off_diag.ncols() == self.off_diag_global_ids.len(), || {
            "off-diagonal width differs from ghost column count".to_string()
        })?;
        ensure(
            self.off_diag_global_ids.windows(2).all(|w| w[0] < w[1]),
            || "ghost columns are not strictly ascending".to_string(),
        )?;
        ensure(
            self.off_diag_global_ids.iter().all(|&g| !self.is_local(g) && g < self.global_size),
            || "ghost column list contains an owned or out-of-range column".to_string(),
        )?;
        ensure(
            self.non_local.keys().iter().all(|&(row, _)| !self.is_local(row)),
            || "non-local data holds an owned row".to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::sparse::graph::DistributedSparseGraph;

    fn serial_chain(n: usize) -> DistributedCsrMatrix<NoComm> {
        let mut g = DistributedSparseGraph::uniform(n, NoComm).unwrap();
        for e in 0..n - 1 {
            g.add_entries(&[e, e + 1]).unwrap();
        }
        g.finalize().unwrap();
        DistributedCsrMatrix::new(&g).unwrap()
    }

    #[test]
    fn serial_matrix_has_no_off_diagonal_part() {
        let a = serial_chain(4);
        assert_eq!(a.diag_block().nnz(), 10);
        assert_eq!(a.off_diag_block().nnz(), 0);
        assert!(a.off_diag_global_ids().is_empty());
        assert_eq!(a.comm_plan().n_colors(), 0);
        assert_eq!(a.global_nnz().unwrap(), 10);
    }

    #[test]
    fn serial_assembly_cycle() {
        let mut a = serial_chain(3);
        a.begin_assemble().unwrap();
        let k = [[1.0, -1.0], [-1.0, 1.0]];
        a.assemble(&k, &[0, 1]);
        a.assemble(&k, &[1, 2]);
        a.finalize_assemble().unwrap();
        assert_eq!(a.local_value(1, 1), Some(2.0));
        assert_eq!(a.local_value(0, 2), None);

        let mut y = vec![0.0; 3];
        a.mult_and_add(&mut y, &[1.0, 2.0, 3.0], &[]).unwrap();
        assert_eq!(y, vec![-1.0, 0.0, 1.0]);
    }

    #[test]
    fn cycle_state_is_enforced() {
        let mut a = serial_chain(2);
        assert!(matches!(
            a.finalize_assemble(),
            Err(MatrixError::AssemblyState { expected: AssemblyState::Assembling, .. })
        ));
        a.begin_assemble().unwrap();
        assert!(a.begin_assemble().is_err());
        a.finalize_assemble().unwrap();
        assert_eq!(a.state(), AssemblyState::Idle);
    }

    #[test]
    fn unfinalized_graph_is_rejected() {
        let g = DistributedSparseGraph::uniform(2, NoComm).unwrap();
        assert!(matches!(
            DistributedCsrMatrix::new(&g),
            Err(MatrixError::GraphState(_))
        ));
    }

    #[test]
    fn scale_and_reset() {
        let mut a = serial_chain(2);
        a.begin_assemble().unwrap();
        a.assemble(&[[2.0, 1.0], [1.0, 2.0]], &[0, 1]);
        a.finalize_assemble().unwrap();
        a.scale(0.5);
        assert_eq!(a.local_value(0, 0), Some(1.0));
        assert_eq!(a.local_value(0, 1), Some(0.5));
        a.set_value(0.0);
        assert!(a.local_triplets().iter().all(|&(_, _, v)| v == 0.0));
    }

    #[test]
    fn owner_and_id_conversions() {
        let a = serial_chain(5);
        assert_eq!(a.owner_rank(4), Some(0));
        assert_eq!(a.owner_rank(5), None);
        assert_eq!(a.global_id(a.local_id(3)), 3);
        assert_eq!(a.remote_global_id(a.remote_local_id(2, 0), 0), 2);
    }
}
