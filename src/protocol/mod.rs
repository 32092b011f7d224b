//! Wire-level event and model types for the Realtime API, trimmed to the
//! surface this client actually consumes and produces.

pub mod client_events;
pub mod models;
pub mod server_events;
