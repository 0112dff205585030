//! Cassettes: the on-disk record of interactions, and the rules for
//! writing, sanitizing, and matching them.

pub mod fingerprint;
pub mod format;
pub mod matcher;
pub mod sanitize;
pub mod session;
pub mod store;

pub use format::{Cassette, CassetteMetadata, ClientKind, HttpRequest, HttpResponse, Interaction};
pub use store::{CassetteStore, FileCassetteStore};
