//! Port implementations.

pub mod clients;
pub mod live;
pub mod recording;
pub mod replaying;
