//! Typed messages exchanged with worker processes and the supervisor seam
//! that spawns them.

pub mod messages;
pub mod supervisor;
