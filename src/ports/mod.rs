//! Port traits defining external boundaries.
//!
//! Outbound calls cross two boundaries: a client adapter turns a
//! client-specific call into an HTTP exchange, and a transport carries the
//! exchange to the network or a cassette. Implementations live in
//! `src/adapters/`.

pub mod client;
pub mod transport;

pub use client::{CallOutcome, ClientAdapter, OutgoingCall};
pub use transport::{Transport, TransportFactory, TransportFuture};
