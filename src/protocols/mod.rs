//! Protocol implementations.
//!
//! - `zds`: workload registration protocol spoken with the node agent

pub mod zds;
