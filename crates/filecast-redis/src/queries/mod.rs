//! Redis-backed implementations of the core backend contracts.

pub mod objects;
pub mod queue;
