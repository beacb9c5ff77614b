//! Connectivity monitor behaviour against scripted signals and probes.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FakeProbe, init_tracing};
use futures::StreamExt;
use waypoint::connectivity::{
    ConnectivityConfig, ConnectivityMonitor, InterfaceKind, ManualSignal, NetworkStatus,
};

fn monitor(signal: &ManualSignal, probe: &FakeProbe, endpoints: &[&str]) -> ConnectivityMonitor {
    init_tracing();
    let config = ConnectivityConfig {
        probe_endpoints: endpoints.iter().map(|e| (*e).to_owned()).collect(),
        poll_interval: Duration::from_secs(3600),
        ..ConnectivityConfig::default()
    };
    ConnectivityMonitor::new(Arc::new(signal.clone()), Arc::new(probe.clone()), config)
}

#[tokio::test]
async fn link_up_but_every_probe_failing_is_offline() {
    let signal = ManualSignal::new(vec![InterfaceKind::Wifi]);
    let probe = FakeProbe::new(false);
    let monitor = monitor(
        &signal,
        &probe,
        &["http://a.test/ping", "http://b.test/ping", "http://c.test/ping"],
    );

    assert_eq!(monitor.status(), NetworkStatus::Unknown);
    assert!(monitor.initialize().await);

    assert_eq!(monitor.status(), NetworkStatus::Offline);
    assert!(monitor.is_offline());
    assert_eq!(probe.calls(), 3);
    monitor.dispose();
}

#[tokio::test]
async fn first_reachable_endpoint_stops_probing() {
    let signal = ManualSignal::new(vec![InterfaceKind::Cellular]);
    let probe = FakeProbe::new(true);
    let monitor = monitor(&signal, &probe, &["http://a.test/ping", "http://b.test/ping"]);

    assert_eq!(monitor.refresh().await, NetworkStatus::Online);
    assert_eq!(probe.calls(), 1);
}

#[tokio::test]
async fn no_routable_interface_skips_probes() {
    let signal = ManualSignal::new(vec![InterfaceKind::Other]);
    let probe = FakeProbe::new(true);
    let monitor = monitor(&signal, &probe, &["http://a.test/ping"]);

    assert_eq!(monitor.refresh().await, NetworkStatus::Offline);
    assert_eq!(probe.calls(), 0);
}

#[tokio::test]
async fn status_stream_emits_only_on_change() {
    let signal = ManualSignal::new(vec![InterfaceKind::Wifi]);
    let probe = FakeProbe::new(true);
    let monitor = monitor(&signal, &probe, &[]);
    let mut statuses = monitor.status_stream();

    monitor.refresh().await;
    monitor.refresh().await;
    signal.set_interfaces(Vec::new());
    monitor.refresh().await;
    monitor.refresh().await;
    signal.set_interfaces(vec![InterfaceKind::Ethernet]);
    monitor.refresh().await;

    let mut seen = Vec::new();
    for _ in 0..3 {
        let status = tokio::time::timeout(Duration::from_secs(1), statuses.next())
            .await
            .unwrap()
            .unwrap();
        seen.push(status);
    }
    assert_eq!(
        seen,
        vec![
            NetworkStatus::Online,
            NetworkStatus::Offline,
            NetworkStatus::Online
        ]
    );
    assert!(
        tokio::time::timeout(Duration::from_millis(50), statuses.next())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn signal_failure_reports_unknown_and_init_retries() {
    let signal = ManualSignal::new(vec![InterfaceKind::Wifi]);
    signal.fail("permission denied");
    let probe = FakeProbe::new(true);
    let monitor = monitor(&signal, &probe, &[]);

    assert!(!monitor.initialize().await);
    let state = monitor.state();
    assert_eq!(state.status, NetworkStatus::Unknown);
    assert!(!state.initialized);
    assert!(state.last_error.unwrap().contains("permission denied"));

    signal.set_interfaces(vec![InterfaceKind::Wifi]);
    assert!(monitor.initialize().await);
    assert!(monitor.is_online());
    assert!(monitor.state().last_error.is_none());
}

#[tokio::test]
async fn watcher_follows_signal_changes() {
    let signal = ManualSignal::new(vec![InterfaceKind::Wifi]);
    let probe = FakeProbe::new(true);
    let monitor = monitor(&signal, &probe, &[]);
    assert!(monitor.initialize().await);
    assert!(monitor.is_online());

    let mut statuses = monitor.status_stream();
    signal.set_interfaces(Vec::new());

    let status = tokio::time::timeout(Duration::from_secs(1), statuses.next())
        .await
        .unwrap();
    assert_eq!(status, Some(NetworkStatus::Offline));
    assert!(monitor.is_offline());

    monitor.dispose();
    assert!(!monitor.state().initialized);
}

#[test]
fn default_probe_endpoints() {
    let config = ConnectivityConfig::default();
    assert_eq!(
        config.probe_endpoints,
        [
            "https://www.google.com/generate_204",
            "https://cloudflare.com/cdn-cgi/trace",
            "https://captive.apple.com/hotspot-detect.html",
        ]
    );
    assert_eq!(config.probe_timeout, Duration::from_secs(5));
}
