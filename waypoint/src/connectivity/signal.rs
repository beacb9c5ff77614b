//! Link-level connectivity signals.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

/// Kind of a network interface reported by a [`NetworkSignal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceKind {
    /// Wireless LAN.
    Wifi,
    /// Mobile data.
    Cellular,
    /// Wired LAN.
    Ethernet,
    /// VPN tunnel.
    Vpn,
    /// Anything else (loopback, bluetooth, unknown).
    Other,
}

impl InterfaceKind {
    /// Whether this interface can carry traffic to the internet.
    pub fn is_routable(&self) -> bool {
        !matches!(self, Self::Other)
    }
}

impl fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Wifi => "wifi",
            Self::Cellular => "cellular",
            Self::Ethernet => "ethernet",
            Self::Vpn => "vpn",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// Error reported by a [`NetworkSignal`].
#[derive(Debug, Clone, Error)]
#[error("network signal unavailable: {0}")]
pub struct SignalError(pub String);

/// Source of link-level connectivity information.
///
/// Implement this over the platform API that lists active interfaces. The
/// monitor only trusts it to say whether a link is *up*; internet
/// reachability is confirmed separately by a
/// [`ReachabilityProbe`](super::ReachabilityProbe).
#[async_trait]
pub trait NetworkSignal: Send + Sync {
    /// Interfaces that are currently up.
    async fn interfaces(&self) -> Result<Vec<InterfaceKind>, SignalError>;

    /// Stream that yields whenever the set of interfaces may have changed.
    fn changes(&self) -> BoxStream<'static, ()>;
}

/// Signal that always reports an ethernet link.
///
/// Use it where the platform offers no interface information. Online and
/// offline are then decided by the reachability probes alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeConnected;

#[async_trait]
impl NetworkSignal for AssumeConnected {
    async fn interfaces(&self) -> Result<Vec<InterfaceKind>, SignalError> {
        Ok(vec![InterfaceKind::Ethernet])
    }

    fn changes(&self) -> BoxStream<'static, ()> {
        stream::pending().boxed()
    }
}

type Reading = Result<Vec<InterfaceKind>, SignalError>;

/// Signal driven by the host application.
///
/// Clones share state. Every call to [`set_interfaces`](Self::set_interfaces)
/// or [`fail`](Self::fail) emits a change event.
///
/// ```
/// use waypoint::connectivity::{InterfaceKind, ManualSignal};
///
/// let signal = ManualSignal::new(vec![InterfaceKind::Wifi]);
/// signal.set_interfaces(Vec::new());
/// ```
#[derive(Debug, Clone)]
pub struct ManualSignal {
    sender: Arc<watch::Sender<Reading>>,
}

impl ManualSignal {
    /// Creates a signal reporting `interfaces`.
    pub fn new(interfaces: Vec<InterfaceKind>) -> Self {
        let (sender, _) = watch::channel(Ok(interfaces));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Replaces the reported interfaces.
    pub fn set_interfaces(&self, interfaces: Vec<InterfaceKind>) {
        self.sender.send_replace(Ok(interfaces));
    }

    /// Makes the next reads fail with `reason`.
    pub fn fail(&self, reason: impl Into<String>) {
        self.sender.send_replace(Err(SignalError(reason.into())));
    }
}

impl Default for ManualSignal {
    fn default() -> Self {
        Self::new(vec![InterfaceKind::Ethernet])
    }
}

#[async_trait]
impl NetworkSignal for ManualSignal {
    async fn interfaces(&self) -> Result<Vec<InterfaceKind>, SignalError> {
        self.sender.borrow().clone()
    }

    fn changes(&self) -> BoxStream<'static, ()> {
        let receiver = self.sender.subscribe();
        stream::unfold(receiver, |mut receiver| async move {
            receiver.changed().await.ok()?;
            Some(((), receiver))
        })
        .boxed()
    }
}
