//! Connectivity-aware request handling.
//!
//! [`NetworkStage`] is the middleware, [`NetworkCoordinator`] owns the
//! offline queue. While offline, `GET`/`HEAD` requests are served from the
//! response cache or queued and replayed on reconnect; other methods are only
//! queued when the caller opts in.

mod coordinator;
mod policy;
mod sentinel;
mod stage;

pub use coordinator::{NetworkCoordinator, QueuedReply};
pub use policy::{NetworkConfig, NetworkPolicy};
pub use sentinel::{NetworkExtra, OFFLINE_MESSAGE};
pub(crate) use sentinel::offline_response;
pub use stage::NetworkStage;
