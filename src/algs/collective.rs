//! Setup-time collectives built from the pairwise [`Communicator::send_recv`].
//!
//! Variable-length exchanges go in two stages, like section completion does:
//! first the record count, then the payload. The gather/scatter helpers use a
//! transient root; they are meant for one-time plan construction only and are
//! never called from the assembly cycle.

use bytemuck::{Pod, Zeroable};

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::wire::{WireCount, WireIndex, cast_slice, cast_slice_mut};
use crate::matrix_error::MatrixError;

/// Exchange a list of records of unknown length with `peer`.
///
/// Uses `tag` for the count and `tag.offset(1)` for the payload.
pub fn exchange_records<C, T>(
    comm: &C,
    peer: usize,
    tag: CommTag,
    send: &[T],
) -> Result<Vec<T>, MatrixError>
where
    C: Communicator + ?Sized,
    T: Pod + Zeroable,
{
    // 1) sizes
    let out_count = WireCount::new(send.len());
    let mut in_count = WireCount::default();
    comm.send_recv(
        peer,
        tag,
        cast_slice(std::slice::from_ref(&out_count)),
        cast_slice_mut(std::slice::from_mut(&mut in_count)),
    )?;

    // 2) payload, received straight into a typed (hence aligned) buffer
    let mut recv = vec![T::zeroed(); in_count.get()];
    comm.send_recv(
        peer,
        tag.offset(1),
        cast_slice(send),
        cast_slice_mut(&mut recv),
    )?;
    Ok(recv)
}

/// Gather every rank's `local` records on `root`.
///
/// Returns `Some(per_rank)` on the root and `None` elsewhere.
pub fn gather_to_root<C, T>(
    comm: &C,
    root: usize,
    tag: CommTag,
    local: &[T],
) -> Result<Option<Vec<Vec<T>>>, MatrixError>
where
    C: Communicator + ?Sized,
    T: Pod + Zeroable,
{
    if comm.rank() != root {
        exchange_records::<C, T>(comm, root, tag, local)?;
        return Ok(None);
    }
    let mut all = Vec::with_capacity(comm.size());
    for r in 0..comm.size() {
        if r == root {
            all.push(local.to_vec());
        } else {
            all.push(exchange_records::<C, T>(comm, r, tag, &[])?);
        }
    }
    Ok(Some(all))
}

/// Hand `parts[r]` from `root` to every rank `r`; returns this rank's part.
///
/// `parts` is only read on the root and must then hold `comm.size()` entries.
pub fn scatter_from_root<C, T>(
    comm: &C,
    root: usize,
    tag: CommTag,
    parts: Option<&[Vec<T>]>,
) -> Result<Vec<T>, MatrixError>
where
    C: Communicator + ?Sized,
    T: Pod + Zeroable,
{
    if comm.rank() != root {
        return exchange_records::<C, T>(comm, root, tag, &[]);
    }
    let parts = parts.ok_or_else(|| {
        MatrixError::InvariantViolation("scatter root called without parts".to_string())
    })?;
    if parts.len() != comm.size() {
        return Err(MatrixError::DimensionMismatch {
            what: "scatter parts",
            expected: comm.size(),
            found: parts.len(),
        });
    }
    for (r, part) in parts.iter().enumerate() {
        if r != root {
            exchange_records::<C, T>(comm, r, tag, part)?;
        }
    }
    Ok(parts[root].clone())
}

/// Broadcast `data` from `root` to all ranks.
pub fn broadcast<C, T>(
    comm: &C,
    root: usize,
    tag: CommTag,
    data: &[T],
) -> Result<Vec<T>, MatrixError>
where
    C: Communicator + ?Sized,
    T: Pod + Zeroable,
{
    if comm.rank() == root {
        let parts = vec![data.to_vec(); comm.size()];
        scatter_from_root(comm, root, tag, Some(&parts))
    } else {
        scatter_from_root::<C, T>(comm, root, tag, None)
    }
}

/// Sum `value` over all ranks; every rank receives the total.
///
/// Uses `tag`/`tag+1` for the gather and `tag+2`/`tag+3` for the broadcast.
pub fn sum_all<C>(comm: &C, tag: CommTag, value: usize) -> Result<usize, MatrixError>
where
    C: Communicator + ?Sized,
{
    let gathered = gather_to_root(comm, 0, tag, &[WireIndex::of(value)])?;
    let total = gathered.map(|all| {
        all.iter()
            .flatten()
            .filter_map(WireIndex::get)
            .sum::<usize>()
    });
    let local = [WireIndex::of(total.unwrap_or(0))];
    let out = broadcast(comm, 0, tag.offset(2), &local)?;
    out.first()
        .and_then(WireIndex::get)
        .ok_or_else(|| MatrixError::WireFormat("sum_all: empty broadcast".to_string()))
}
