//! Replaying adapters that answer from cassettes.

pub mod transport;
