//! Fixed-shape communication plan for folding non-local partial sums into
//! their owners' rows.
//!
//! Built once per sparsity pattern: for every color of the schedule the plan
//! records which non-local accumulators to send (in order) and which owned
//! value slots the peer's values are added into (in order). Steady-state
//! execution is then a copy, one paired exchange and an add per color, with
//! no metadata on the wire.

use crate::algs::coloring::{Schedule, compute_communication_schedule};
use crate::algs::collective::exchange_records;
use crate::algs::communicator::{AssemblyCommTags, CommTag, Communicator};
use crate::algs::wire::{WireEntry, cast_slice, cast_slice_mut};
use crate::debug_invariants::{DebugInvariants, ensure};
use crate::matrix_error::MatrixError;
use crate::sparse::csr_block::CsrBlock;
use crate::sparse::graph::NonLocalGraph;
use crate::sparse::nonlocal::NonLocalData;

/// An owned value slot: a position in the diagonal or off-diagonal block's
/// value array.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OwnedSlot {
    Diag(usize),
    OffDiag(usize),
}

/// Exchange with one peer, index-aligned: `send_slots[k]` fills
/// `send_buffer[k]`, `recv_buffer[k]` is added into `recv_slots[k]`.
#[derive(Clone, Debug)]
pub struct PeerPlan {
    pub peer: usize,
    pub send_slots: Vec<usize>,
    pub recv_slots: Vec<OwnedSlot>,
    send_buffer: Vec<f64>,
    recv_buffer: Vec<f64>,
}

impl PeerPlan {
    pub fn send_len(&self) -> usize {
        self.send_buffer.len()
    }

    pub fn recv_len(&self) -> usize {
        self.recv_buffer.len()
    }
}

/// One entry per color; `None` means this rank idles in that round.
#[derive(Clone, Debug, Default)]
pub struct CommPlan {
    rounds: Vec<Option<PeerPlan>>,
}

impl CommPlan {
    /// Collectively build the plan.
    ///
    /// `non_local_graphs[r]` holds this rank's entries in rows owned by `r`
    /// (keyed by row index local to `r`), `cpu_bounds` the global row
    /// offsets, `non_local` the accumulators for exactly those entries, and
    /// `resolve` maps a global `(row, col)` in an owned row to its slot.
    pub fn build<C, F>(
        comm: &C,
        tags: AssemblyCommTags,
        non_local_graphs: &[NonLocalGraph],
        cpu_bounds: &[usize],
        non_local: &NonLocalData,
        resolve: F,
    ) -> Result<Self, MatrixError>
    where
        C: Communicator + ?Sized,
        F: Fn(usize, usize) -> Option<OwnedSlot>,
    {
        // 1) ranks we owe contributions to
        let send_list: Vec<usize> = non_local_graphs
            .iter()
            .enumerate()
            .filter(|(_, g)| !g.is_empty())
            .map(|(r, _)| r)
            .collect();

        // 2) rounds
        let schedule: Schedule = compute_communication_schedule(&send_list, comm, tags.schedule)?;

        // 3) per round: our send slots, one index exchange, their recv slots
        let mut rounds = Vec::with_capacity(schedule.len());
        for color in &schedule {
            let Some(peer) = *color else {
                rounds.push(None);
                continue;
            };
            let graph = non_local_graphs
                .get(peer)
                .ok_or(MatrixError::IndexOutOfRange {
                    index: peer,
                    size: non_local_graphs.len(),
                })?;
            let offset = cpu_bounds[peer];

            let mut send_slots = Vec::with_capacity(graph.nnz());
            let mut send_ij = Vec::with_capacity(graph.nnz());
            for (remote_row, col) in graph.entries() {
                let row = offset + remote_row;
                let slot = non_local
                    .slot(row, col)
                    .ok_or(MatrixError::MissingEntry { row, col })?;
                send_slots.push(slot);
                send_ij.push(WireEntry::new(row, col));
            }

            let recv_ij = exchange_records(comm, peer, tags.plan, &send_ij)?;
            let mut recv_slots = Vec::with_capacity(recv_ij.len());
            for e in &recv_ij {
                let (row, col) = (e.row(), e.col());
                let slot = resolve(row, col).ok_or(MatrixError::MissingEntry { row, col })?;
                recv_slots.push(slot);
            }

            log::debug!(
                "rank {} <-> {peer}: send {} values, receive {}",
                comm.rank(),
                send_slots.len(),
                recv_slots.len()
            );
            rounds.push(Some(PeerPlan {
                peer,
                send_buffer: vec![0.0; send_slots.len()],
                recv_buffer: vec![0.0; recv_slots.len()],
                send_slots,
                recv_slots,
            }));
        }

        let plan = Self { rounds };
        crate::debug_invariants!(plan.validate_invariants(), "CommPlan::build");
        Ok(plan)
    }

    /// Number of colors, idle ones included.
    pub fn n_colors(&self) -> usize {
        self.rounds.len()
    }

    /// Peer of every color (`None` for idle rounds).
    pub fn schedule(&self) -> Schedule {
        self.rounds
            .iter()
            .map(|r| r.as_ref().map(|p| p.peer))
            .collect()
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerPlan> + '_ {
        self.rounds.iter().flatten()
    }

    /// Run one reduction: for every active color, pack the non-local
    /// accumulators, exchange with the peer, and add what arrives into the
    /// owned slots.
    pub fn execute<C>(
        &mut self,
        comm: &C,
        tag: CommTag,
        non_local: &NonLocalData,
        diag: &CsrBlock,
        off_diag: &CsrBlock,
    ) -> Result<(), MatrixError>
    where
        C: Communicator + ?Sized,
    {
        for round in self.rounds.iter_mut().flatten() {
            for (buf, &slot) in round.send_buffer.iter_mut().zip(&round.send_slots) {
                *buf = non_local.cell_at(slot).load();
            }
            comm.send_recv(
                round.peer,
                tag,
                cast_slice(&round.send_buffer),
                cast_slice_mut(&mut round.recv_buffer),
            )?;
            for (&v, slot) in round.recv_buffer.iter().zip(&round.recv_slots) {
                let cell = match *slot {
                    OwnedSlot::Diag(k) => diag.cell_at(k),
                    OwnedSlot::OffDiag(k) => off_diag.cell_at(k),
                };
                cell.fetch_add(v);
            }
            log::trace!(
                "rank {}: reduced {} values from rank {}",
                comm.rank(),
                round.recv_buffer.len(),
                round.peer
            );
        }
        Ok(())
    }
}

impl DebugInvariants for CommPlan {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "CommPlan");
    }

    fn validate_invariants(&self) -> Result<(), MatrixError> {
        let mut seen = std::collections::HashSet::new();
        for p in self.peers() {
            ensure(p.send_slots.len() == p.send_buffer.len(), || {
                format!("send slots and buffer for rank {} differ in length", p.peer)
            })?;
            ensure(p.recv_slots.len() == p.recv_buffer.len(), || {
                format!("recv slots and buffer for rank {} differ in length", p.peer)
            })?;
            ensure(seen.insert(p.peer), || {
                format!("rank {} scheduled in more than one color", p.peer)
            })?;
        }
        Ok(())
    }
}
