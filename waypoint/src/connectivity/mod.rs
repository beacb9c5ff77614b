//! Connectivity monitoring.
//!
//! [`ConnectivityMonitor`] combines a link-level [`NetworkSignal`] with
//! outbound [`ReachabilityProbe`]s and broadcasts `online`/`offline`
//! transitions. The network stage reads it to decide whether a request can
//! go out, and the offline queue drains when it reports `online` again.

mod monitor;
mod probe;
mod signal;

pub use monitor::{ConnectivityConfig, ConnectivityMonitor, ConnectivityState, NetworkStatus};
pub use probe::{HttpProbe, ReachabilityProbe};
pub use signal::{AssumeConnected, InterfaceKind, ManualSignal, NetworkSignal, SignalError};
