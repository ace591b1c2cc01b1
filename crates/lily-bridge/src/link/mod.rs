//! Persistent WebSocket link to the conversational backend.
//!
//! One connection at a time, owned by a background task that multiplexes
//! reads, writes and the heartbeat in a single `select!` loop. Requests are
//! matched to responses by envelope id; everything else the backend sends
//! is surfaced as a [`LinkEvent`]. Reconnects with exponential backoff.

mod backoff;
mod client;
mod connection;
mod pending;
mod resolver;
mod types;


pub use backoff::Backoff;
pub use client::{BackendLink, PendingResponse};
pub use resolver::{EndpointResolver, StaticEndpoint};
pub use types::{LinkConfig, LinkEvent, LinkState, LinkStats};
