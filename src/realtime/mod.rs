//! Realtime Client (§4.4): the upstream WebSocket connection, its
//! reconnect/backoff machinery, and the two small collaborators it
//! leans on (a sliding-window rate limiter and a bounded output queue).

pub mod client;
pub mod queue;
pub mod rate_limit;
