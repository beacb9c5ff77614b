//! Shared fixtures for the client integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use url::Url;
use waypoint::connectivity::{ManualSignal, ReachabilityProbe};
use waypoint::{Client, ClientConfig};

/// Installs a test-writer subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("waypoint=debug")
        .with_test_writer()
        .try_init();
}

/// Probe whose answer is switched by the test.
#[derive(Clone)]
pub struct FakeProbe {
    reachable: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl FakeProbe {
    pub fn new(reachable: bool) -> Self {
        Self {
            reachable: Arc::new(AtomicBool::new(reachable)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReachabilityProbe for FakeProbe {
    async fn probe(&self, _url: &Url, _timeout: Duration) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reachable.load(Ordering::SeqCst)
    }
}

/// Configuration trusting the link state alone, with short delays.
pub fn test_config() -> ClientConfig {
    let mut config = ClientConfig::default();
    config.connectivity.probe_endpoints = Vec::new();
    config.network.retry_delay = Duration::from_millis(10);
    config.auth.retry_delay = Duration::from_millis(10);
    config
}

/// Initialized client against `base_url` whose link is driven by `signal`.
pub async fn client_with_signal(base_url: &str, signal: &ManualSignal) -> Client {
    init_tracing();
    let client = Client::builder(base_url)
        .config(test_config())
        .signal(signal.clone())
        .build()
        .unwrap();
    assert!(client.initialize().await);
    client
}

/// Takes the client offline and waits for the monitor to notice.
pub async fn go_offline(client: &Client, signal: &ManualSignal) {
    signal.set_interfaces(Vec::new());
    client.refresh_network_status().await;
    assert!(client.is_offline());
}

/// Brings the client back online.
pub async fn go_online(client: &Client, signal: &ManualSignal) {
    signal.set_interfaces(vec![waypoint::connectivity::InterfaceKind::Wifi]);
    client.refresh_network_status().await;
    assert!(client.is_online());
}
