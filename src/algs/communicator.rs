//! Thin façade over single-rank, intra-process (threads) or inter-process (MPI)
//! message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees). The only
//! primitive is a blocking, paired [`Communicator::send_recv`]: both peers call
//! it with each other's rank and the same tag, each side's send buffer lands in
//! the other side's receive buffer. Every exchange the matrix performs, setup
//! and steady state alike, is built from it.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::matrix_error::MatrixError;

/// A message tag. Distinct protocol phases use distinct tags so that their
/// messages can never be matched against each other.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommTag(u16);

impl CommTag {
    #[inline]
    pub const fn new(tag: u16) -> Self {
        Self(tag)
    }

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Tag `n` steps after this one (wrapping).
    #[inline]
    pub const fn offset(self, n: u16) -> Self {
        Self(self.0.wrapping_add(n))
    }
}

/// Communication tags for graph finalisation, plan construction and the
/// steady-state assembly exchange.
///
/// Record exchanges use two consecutive tags (count, payload), and the
/// schedule/reduction collectives use two record exchanges each, so the
/// phases are spaced accordingly. Deserialising a partial table fills the
/// missing phases from [`AssemblyCommTags::default`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyCommTags {
    /// Shipping non-local graph rows to their owners.
    pub graph: CommTag,
    /// Gathering send lists and scattering the coloring.
    pub schedule: CommTag,
    /// One-time `(row, col)` index exchange while building the plan.
    pub plan: CommTag,
    /// Value exchange in every `finalize_assemble`.
    pub values: CommTag,
    /// Scalar reductions (`sum_all`).
    pub reduce: CommTag,
}

impl AssemblyCommTags {
    /// Construct tags from a base, assigning deterministic offsets per phase.
    #[inline]
    pub const fn from_base(base: CommTag) -> Self {
        Self {
            graph: base,
            schedule: base.offset(2),
            plan: base.offset(6),
            values: base.offset(8),
            reduce: base.offset(10),
        }
    }
}

impl Default for AssemblyCommTags {
    fn default() -> Self {
        Self::from_base(CommTag::new(0xC5A0))
    }
}

/// Blocking pairwise communication interface.
pub trait Communicator: Send + Sync {
    /// Rank of this process.
    fn rank(&self) -> usize;
    /// Number of ranks in the world.
    fn size(&self) -> usize;

    /// Send `send` to `peer` and receive exactly `recv.len()` bytes from it.
    ///
    /// Both sides must call this with each other's rank and the same `tag`.
    /// Returns only once both directions completed.
    fn send_recv(
        &self,
        peer: usize,
        tag: CommTag,
        send: &[u8],
        recv: &mut [u8],
    ) -> Result<(), MatrixError>;
}

/// Compile-time no-op comm for pure serial use: one rank, no peers.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn send_recv(
        &self,
        peer: usize,
        _tag: CommTag,
        _send: &[u8],
        _recv: &mut [u8],
    ) -> Result<(), MatrixError> {
        Err(MatrixError::CommError {
            neighbor: peer,
            source: "NoComm has no peers".into(),
        })
    }
}

// --- RayonComm: intra-process / multi-thread ---
type Key = (usize, usize, u16); // (src, dst, tag)
type Mailbox = DashMap<Key, VecDeque<Bytes>>;

static MAILBOX: Lazy<Arc<Mailbox>> = Lazy::new(|| Arc::new(DashMap::new()));

/// In-process communicator: every rank is a thread, messages travel through a
/// shared mailbox. Delivery is FIFO per `(src, dst, tag)`, like MPI's
/// non-overtaking rule, so repeated exchanges on the same tag stay paired.
#[derive(Clone, Debug)]
pub struct RayonComm {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
}

impl RayonComm {
    /// A rank attached to the process-wide mailbox.
    ///
    /// Worlds created this way share one mailbox; concurrent worlds must use
    /// disjoint tags. Prefer [`RayonComm::world`].
    pub fn new(rank: usize, size: usize) -> Self {
        Self {
            rank,
            size,
            mailbox: Arc::clone(&MAILBOX),
        }
    }

    /// All `size` ranks of a fresh world with a private mailbox.
    pub fn world(size: usize) -> Vec<Self> {
        let mailbox = Arc::new(DashMap::new());
        (0..size)
            .map(|rank| Self {
                rank,
                size,
                mailbox: Arc::clone(&mailbox),
            })
            .collect()
    }

    fn post(&self, peer: usize, tag: CommTag, buf: &[u8]) {
        self.mailbox
            .entry((self.rank, peer, tag.as_u16()))
            .or_default()
            .push_back(Bytes::copy_from_slice(buf));
    }

    fn take(&self, peer: usize, tag: CommTag) -> Bytes {
        let key = (peer, self.rank, tag.as_u16());
        loop {
            if let Some(mut queue) = self.mailbox.get_mut(&key) {
                if let Some(bytes) = queue.pop_front() {
                    return bytes;
                }
            }
            std::thread::yield_now();
        }
    }
}

impl Communicator for RayonComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send_recv(
        &self,
        peer: usize,
        tag: CommTag,
        send: &[u8],
        recv: &mut [u8],
    ) -> Result<(), MatrixError> {
        if peer >= self.size || peer == self.rank {
            return Err(MatrixError::CommError {
                neighbor: peer,
                source: format!("rank {} cannot exchange with rank {peer}", self.rank).into(),
            });
        }
        self.post(peer, tag, send);
        let bytes = self.take(peer, tag);
        if bytes.len() != recv.len() {
            return Err(MatrixError::CommError {
                neighbor: peer,
                source: format!("expected {} bytes, got {}", recv.len(), bytes.len()).into(),
            });
        }
        recv.copy_from_slice(&bytes);
        Ok(())
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use mpi::Threading;
    use mpi::environment::Universe;
    use mpi::traits::*;
    use parking_lot::Mutex;

    /// MPI world communicator. Keeps the universe alive; MPI is finalised
    /// when the last clone is dropped.
    ///
    /// MPI is initialised with `MPI_THREAD_SERIALIZED` and every call into it
    /// goes through one lock shared by all clones, so `&MpiComm` may be used
    /// from any thread.
    #[derive(Clone)]
    pub struct MpiComm {
        universe: Arc<Universe>,
        lock: Arc<Mutex<()>>,
        rank: usize,
        size: usize,
    }

    // SAFETY: `Universe` is only reached through `send_recv`, which holds
    // `lock` for the whole MPI call, and the library granted at least
    // `Threading::Serialized`, which permits calls from any thread as long as
    // no two overlap. Dropping the last clone finalises MPI once.
    unsafe impl Send for MpiComm {}
    unsafe impl Sync for MpiComm {}

    impl MpiComm {
        /// Initialise MPI.
        ///
        /// Returns `None` if MPI was already initialised or the library does
        /// not provide serialized multi-threaded access.
        pub fn new() -> Option<Self> {
            let (universe, granted) = mpi::initialize_with_threading(Threading::Serialized)?;
            if !matches!(granted, Threading::Serialized | Threading::Multiple) {
                log::warn!("MPI granted {granted:?}, serialized threading is required");
                return None;
            }
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Some(Self {
                universe: Arc::new(universe),
                lock: Arc::new(Mutex::new(())),
                rank,
                size,
            })
        }
    }

    impl Communicator for MpiComm {
        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn send_recv(
            &self,
            peer: usize,
            tag: CommTag,
            send: &[u8],
            recv: &mut [u8],
        ) -> Result<(), MatrixError> {
            if peer >= self.size {
                return Err(MatrixError::CommError {
                    neighbor: peer,
                    source: format!("rank {peer} outside world of size {}", self.size).into(),
                });
            }
            let _guard = self.lock.lock();
            let world = self.universe.world();
            let process = world.process_at_rank(peer as i32);
            let tag = i32::from(tag.as_u16());
            let status = mpi::point_to_point::send_receive_into_with_tags(
                send, &process, tag, recv, &process, tag,
            );
            let count = status.count(u8::equivalent_datatype());
            if usize::try_from(count).ok() != Some(recv.len()) {
                return Err(MatrixError::CommError {
                    neighbor: peer,
                    source: format!("expected {} bytes, got {count}", recv.len()).into(),
                });
            }
            Ok(())
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rayon_roundtrip_two_ranks() {
        let mut world = RayonComm::world(2);
        let comm1 = world.pop().unwrap();
        let comm0 = world.pop().unwrap();
        let tag = CommTag::new(7);

        let handle = std::thread::spawn(move || {
            let mut recv = [0u8; 4];
            comm1.send_recv(0, tag, &[5, 6, 7, 8], &mut recv).unwrap();
            recv
        });

        let mut recv = [0u8; 4];
        comm0.send_recv(1, tag, &[1, 2, 3, 4], &mut recv).unwrap();
        assert_eq!(recv, [5, 6, 7, 8]);
        assert_eq!(handle.join().unwrap(), [1, 2, 3, 4]);
    }

    #[test]
    fn repeated_exchanges_stay_ordered() {
        let mut world = RayonComm::world(2);
        let comm1 = world.pop().unwrap();
        let comm0 = world.pop().unwrap();
        let tag = CommTag::new(3);

        let handle = std::thread::spawn(move || {
            let mut seen = Vec::new();
            for round in 0..50u8 {
                let mut recv = [0u8; 1];
                comm1.send_recv(0, tag, &[round], &mut recv).unwrap();
                seen.push(recv[0]);
            }
            seen
        });
        let mut seen = Vec::new();
        for round in 0..50u8 {
            let mut recv = [0u8; 1];
            comm0.send_recv(1, tag, &[100 + round], &mut recv).unwrap();
            seen.push(recv[0]);
        }
        assert_eq!(seen, (0..50).collect::<Vec<u8>>());
        assert_eq!(handle.join().unwrap(), (100..150).collect::<Vec<u8>>());
    }

    #[test]
    fn length_mismatch_is_reported() {
        let mut world = RayonComm::world(2);
        let comm1 = world.pop().unwrap();
        let comm0 = world.pop().unwrap();
        let tag = CommTag::new(9);

        let handle = std::thread::spawn(move || {
            let mut recv = [0u8; 2];
            comm1.send_recv(0, tag, &[1, 2, 3], &mut recv)
        });
        let mut recv = [0u8; 2];
        let err = comm0.send_recv(1, tag, &[1, 2], &mut recv);
        assert!(matches!(err, Err(MatrixError::CommError { neighbor: 1, .. })));
        assert!(handle.join().unwrap().is_ok());
    }

    #[test]
    fn self_exchange_is_rejected() {
        let comm = RayonComm::world(1).pop().unwrap();
        let mut recv = [0u8; 0];
        assert!(comm.send_recv(0, CommTag::new(1), &[], &mut recv).is_err());
        assert!(NoComm.send_recv(1, CommTag::new(1), &[], &mut recv).is_err());
    }

    #[test]
    fn tags_are_spaced_per_phase() {
        let tags = AssemblyCommTags::from_base(CommTag::new(100));
        assert_eq!(tags.graph.as_u16(), 100);
        assert_eq!(tags.schedule.as_u16(), 102);
        assert_eq!(tags.plan.as_u16(), 106);
        assert_eq!(tags.values.as_u16(), 108);
        assert_eq!(tags.reduce.as_u16(), 110);
    }

    #[test]
    fn partial_tag_table_keeps_defaults() {
        let tags: AssemblyCommTags = serde_json::from_str(r#"{ "values": 900 }"#).unwrap();
        let defaults = AssemblyCommTags::default();
        assert_eq!(tags.values, CommTag::new(900));
        assert_eq!(tags.graph, defaults.graph);
        assert_eq!(tags.reduce, defaults.reduce);
    }
}
