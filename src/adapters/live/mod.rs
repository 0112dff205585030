//! Live adapters for real network interactions.

pub mod transport;
