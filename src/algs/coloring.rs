//! Communication scheduling: assign every pair of communicating ranks to a
//! round ("color") so that no rank takes part in two exchanges per round.
//!
//! Requests are directed (rank `a` has contributions for rank `b`), but a
//! paired `send_recv` needs both sides, so the request graph is symmetrised
//! first. The undirected graph is then edge-colored greedily: pairs are
//! visited in ascending `(min, max)` order and each one takes the smallest
//! color free at both endpoints. A greedy edge coloring never needs more than
//! `2Δ - 1` colors for maximum degree `Δ`.

use std::collections::BTreeSet;

use crate::algs::collective::{gather_to_root, scatter_from_root};
use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::wire::WireIndex;
use crate::matrix_error::MatrixError;

/// Per-rank schedule: `schedule[color]` is the peer for that round, or `None`
/// when the rank idles during it. All ranks' schedules have the same length.
pub type Schedule = Vec<Option<usize>>;

/// Color the symmetrised request graph. `requests[r]` lists the ranks `r`
/// needs to send to; the result holds one [`Schedule`] per rank.
pub fn color_requests(requests: &[Vec<usize>]) -> Result<Vec<Schedule>, MatrixError> {
    let n = requests.len();
    let mut pairs = BTreeSet::new();
    for (r, peers) in requests.iter().enumerate() {
        for &p in peers {
            if p >= n {
                return Err(MatrixError::IndexOutOfRange { index: p, size: n });
            }
            if p != r {
                pairs.insert((r.min(p), r.max(p)));
            }
        }
    }

    let mut busy: Vec<Vec<bool>> = vec![Vec::new(); n];
    let mut schedules: Vec<Schedule> = vec![Vec::new(); n];
    let mut n_colors = 0;
    for (a, b) in pairs {
        let color = (0..)
            .find(|&c| !is_busy(&busy[a], c) && !is_busy(&busy[b], c))
            .unwrap_or(0);
        for (me, other) in [(a, b), (b, a)] {
            if busy[me].len() <= color {
                busy[me].resize(color + 1, false);
                schedules[me].resize(color + 1, None);
            }
            busy[me][color] = true;
            schedules[me][color] = Some(other);
        }
        n_colors = n_colors.max(color + 1);
    }

    for s in &mut schedules {
        s.resize(n_colors, None);
    }
    Ok(schedules)
}

#[inline]
fn is_busy(row: &[bool], color: usize) -> bool {
    row.get(color).copied().unwrap_or(false)
}

/// Collectively compute this rank's schedule from its `send_list`.
///
/// Rank 0 gathers all send lists, colors the pair graph and scatters each
/// rank's row back. Must be called by every rank. Every scattered row starts
/// with a status record, so a request the root rejects fails on all ranks
/// instead of leaving the others waiting for their row.
pub fn compute_communication_schedule<C>(
    send_list: &[usize],
    comm: &C,
    tag: CommTag,
) -> Result<Schedule, MatrixError>
where
    C: Communicator + ?Sized,
{
    let local: Vec<WireIndex> = send_list.iter().copied().map(WireIndex::of).collect();
    let gathered = gather_to_root(comm, 0, tag, &local)?;

    let parts = gathered.map(|all| {
        let requests: Vec<Vec<usize>> = all
            .iter()
            .map(|peers| peers.iter().filter_map(WireIndex::get).collect())
            .collect();
        match color_requests(&requests) {
            Ok(schedules) => {
                log::debug!(
                    "communication schedule: {} ranks, {} colors",
                    schedules.len(),
                    schedules.first().map_or(0, Vec::len)
                );
                schedules
                    .into_iter()
                    .map(|s| {
                        std::iter::once(WireIndex::of(0))
                            .chain(s.into_iter().map(WireIndex::from_option))
                            .collect()
                    })
                    .collect::<Vec<Vec<WireIndex>>>()
            }
            Err(e) => {
                log::debug!("communication schedule rejected: {e}");
                let bad = match e {
                    MatrixError::IndexOutOfRange { index, .. } => WireIndex::of(index),
                    _ => WireIndex::none(),
                };
                vec![vec![WireIndex::none(), bad]; requests.len()]
            }
        }
    });

    let mine = scatter_from_root(comm, 0, tag.offset(2), parts.as_deref())?;
    match mine.split_first() {
        Some((status, row)) if status.get().is_some() => {
            Ok(row.iter().map(WireIndex::get).collect())
        }
        Some((_, [bad, ..])) => Err(MatrixError::IndexOutOfRange {
            index: bad.get().unwrap_or(comm.size()),
            size: comm.size(),
        }),
        _ => Err(MatrixError::WireFormat(
            "communication schedule row without status".to_string(),
        )),
    }
}
