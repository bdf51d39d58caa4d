//! In-process loopback components (§1: "insofar as they define testable
//! contracts; the spec describes what they must simulate, not their
//! internal test plumbing"). Not a production substitute for a real
//! telephony platform or a real upstream Realtime API — these exist so
//! this crate's own tests can exercise the wire schemas without a live
//! network peer.

pub mod realtime_server;
pub mod telephony_client;
