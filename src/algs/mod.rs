//! Communication and search algorithms shared by the sparse containers.

pub mod coloring;
pub mod collective;
pub mod communicator;
pub mod search;
pub mod wire;

pub use coloring::compute_communication_schedule;
pub use communicator::{AssemblyCommTags, CommTag, Communicator, NoComm, RayonComm};
