//! Protocol Models (§6): pure data definitions and validation for both
//! telephony dialects and the upstream Realtime API. No I/O lives here.

pub mod audiocodes;
pub mod realtime;
pub mod twilio;
