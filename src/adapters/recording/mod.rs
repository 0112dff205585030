//! Recording adapters that pass through to live and capture interactions.

pub mod transport;
