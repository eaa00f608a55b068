//! Fixed, little-endian wire records for setup-time exchanges.
//!
//! Index records (counts, ranks, `(row, col)` pairs) are stored pre-LE with
//! `.to_le()` and decoded with `.from_le()`. Steady-state value buffers are
//! plain `f64` slices and are not wrapped.

use bytemuck::{Pod, Zeroable};

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

/// Count of records following in the next message.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u64,
}

impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u64).to_le(),
        }
    }

    pub fn get(&self) -> usize {
        u64::from_le(self.n_le) as usize
    }
}

/// A single index (rank, global id, or color slot) carried on the wire.
///
/// `u64::MAX` is reserved as the "no entry" sentinel, see [`WireIndex::none`].
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable, PartialEq, Eq)]
pub struct WireIndex {
    pub id_le: u64,
}

impl WireIndex {
    pub fn of(id: usize) -> Self {
        Self {
            id_le: (id as u64).to_le(),
        }
    }

    pub fn none() -> Self {
        Self {
            id_le: u64::MAX.to_le(),
        }
    }

    pub fn from_option(id: Option<usize>) -> Self {
        id.map_or_else(Self::none, Self::of)
    }

    pub fn get(&self) -> Option<usize> {
        match u64::from_le(self.id_le) {
            u64::MAX => None,
            v => Some(v as usize),
        }
    }
}

/// A `(global_row, global_col)` matrix entry.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable, PartialEq, Eq)]
pub struct WireEntry {
    pub row_le: u64,
    pub col_le: u64,
}

impl WireEntry {
    pub fn new(row: usize, col: usize) -> Self {
        Self {
            row_le: (row as u64).to_le(),
            col_le: (col as u64).to_le(),
        }
    }

    pub fn row(&self) -> usize {
        u64::from_le(self.row_le) as usize
    }

    pub fn col(&self) -> usize {
        u64::from_le(self.col_le) as usize
    }
}

static_assertions::assert_eq_size!(WireCount, u64);
static_assertions::assert_eq_size!(WireIndex, u64);
static_assertions::assert_eq_size!(WireEntry, [u64; 2]);
