//! Orchestrator integration tests
//!
//! Drives start/stop, reconnect and resource tracking against an
//! in-memory cluster.

mod common;

use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::broadcast;
use tokio::time::timeout;

use kf_core::config::ReconnectConfig;
use kf_core::ipc::{CommandOutcome, IpcEvent};
use kf_core::store::ConfigStore;
use kf_core::{ClusterRef, ConfigId, ProxyResource, ResourceKind, SessionState};
use kf_orchestrator::monitor::{ConnectivityProbe, NetworkMonitor};
use kf_orchestrator::resources::ResourceTracker;

use common::{eventually, tcp_config, test_settings, udp_config, wait_for_state, Harness};

async fn assert_tcp_echo(address: &str) {
    let mut client = TcpStream::connect(address).await.unwrap();
    client.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    timeout(Duration::from_secs(2), client.read_exact(&mut buf))
        .await
        .expect("echo timed out")
        .unwrap();
    assert_eq!(&buf, b"ping");
}

async fn assert_udp_echo(client: &UdpSocket, target: SocketAddr, payload: &[u8]) {
    client.send_to(payload, target).await.unwrap();
    let mut buf = [0u8; 1500];
    let (len, _) = timeout(Duration::from_secs(2), client.recv_from(&mut buf))
        .await
        .expect("udp echo timed out")
        .unwrap();
    assert_eq!(&buf[..len], payload);
}

async fn next_config_event(
    rx: &mut broadcast::Receiver<IpcEvent>,
    id: ConfigId,
    running: bool,
) {
    let expected = IpcEvent::ConfigStateChanged {
        config_id: id,
        is_running: running,
    };
    timeout(Duration::from_secs(5), async {
        loop {
            if rx.recv().await.unwrap() == expected {
                break;
            }
        }
    })
    .await
    .expect("event never arrived");
}

fn free_port() -> u16 {
    StdTcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[tokio::test]
async fn test_start_tcp_forward_relays_traffic() {
    let h = Harness::new(vec![tcp_config(1)]);

    let results = h.orchestrator.start(vec![tcp_config(1)]).await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, CommandOutcome::Running);
    assert!(h.orchestrator.status(ConfigId(1)));

    let address = results[0].local_address.clone().unwrap();
    assert_tcp_echo(&address).await;
    assert_tcp_echo(&address).await;

    let session = h.session(1);
    assert_eq!(session.state(), SessionState::Active);
    assert_eq!(session.reconnects(), 0);
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let h = Harness::new(vec![tcp_config(1)]);

    let first = h.orchestrator.start(vec![tcp_config(1)]).await;
    assert!(first[0].is_ok());

    let second = h.orchestrator.start(vec![tcp_config(1)]).await;
    assert_eq!(second[0].status, CommandOutcome::Failed);
    assert_eq!(second[0].error_kind.as_deref(), Some("already_running"));
    assert_eq!(h.orchestrator.registry().len(), 1);
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let h = Harness::new(vec![tcp_config(1)]);

    let status = h.orchestrator.stop_one(ConfigId(1)).await;
    assert_eq!(status.status, CommandOutcome::Stopped);
    assert_eq!(status.warning.as_deref(), Some("not running"));

    h.orchestrator.start(vec![tcp_config(1)]).await;
    let session = h.session(1);

    let status = h.orchestrator.stop_one(ConfigId(1)).await;
    assert_eq!(status.status, CommandOutcome::Stopped);
    assert!(status.warning.is_none());
    assert_eq!(session.state(), SessionState::Stopped);
    assert!(!h.orchestrator.status(ConfigId(1)));

    let again = h.orchestrator.stop_one(ConfigId(1)).await;
    assert_eq!(again.status, CommandOutcome::Stopped);
    assert!(h.orchestrator.registry().is_empty());
    assert_eq!(h.orchestrator.registry().lock_count(), 0);
}

#[tokio::test]
async fn test_batch_reports_each_config_in_order() {
    let mut missing_port = tcp_config(2);
    missing_port.remote_port = 0;
    let mut unsupported = tcp_config(3);
    unsupported.workload_type = "deployment".into();
    let unsaved = tcp_config(0);

    let h = Harness::new(vec![]);
    let results = h
        .orchestrator
        .start(vec![
            tcp_config(1),
            missing_port,
            unsupported,
            unsaved,
            tcp_config(5),
        ])
        .await;

    let ids: Vec<i64> = results.iter().map(|r| r.config_id.0).collect();
    assert_eq!(ids, vec![1, 2, 3, 0, 5]);

    let kinds: Vec<Option<&str>> = results.iter().map(|r| r.error_kind.as_deref()).collect();
    assert_eq!(
        kinds,
        vec![
            None,
            Some("invalid_config"),
            Some("unsupported_workload"),
            Some("invalid_config"),
            None
        ]
    );

    assert_eq!(h.orchestrator.registry().ids(), vec![ConfigId(1), ConfigId(5)]);
}

#[tokio::test]
async fn test_direct_target_missing_fails_start() {
    let h = Harness::new(vec![]);
    h.cluster.set_fail_resolve(true);

    let results = h.orchestrator.start(vec![tcp_config(1)]).await;
    assert_eq!(results[0].error_kind.as_deref(), Some("target_not_found"));
    assert!(h.orchestrator.registry().is_empty());
}

#[tokio::test]
async fn test_local_address_conflict() {
    let port = free_port();
    let mut first = tcp_config(1);
    first.local_port = port;
    let mut second = tcp_config(2);
    second.local_port = port;

    let h = Harness::new(vec![]);
    assert!(h.orchestrator.start(vec![first]).await[0].is_ok());

    let results = h.orchestrator.start(vec![second]).await;
    assert_eq!(results[0].error_kind.as_deref(), Some("address_in_use"));
    assert!(results[0].error.as_deref().unwrap().contains("config 1"));
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_auto_loopback_picks_free_alias() {
    let mut first = tcp_config(1);
    first.local_address = None;
    first.auto_loopback_address = true;
    let mut second = first.clone();
    second.id = ConfigId(2);

    let h = Harness::new(vec![]);
    let results = h.orchestrator.start(vec![first]).await;
    assert!(results[0].local_address.as_deref().unwrap().starts_with("127.0.0.2:"));

    let results = h.orchestrator.start(vec![second]).await;
    assert!(results[0].local_address.as_deref().unwrap().starts_with("127.0.0.3:"));
}

#[tokio::test]
async fn test_proxy_start_stop_leaves_no_resources() {
    let h = Harness::new(vec![udp_config(1)]);

    let results = h.orchestrator.start(vec![udp_config(1)]).await;
    assert!(results[0].is_ok());
    assert_eq!(h.cluster.resource_count(), 1);

    let proxy = h.session(1).proxy().unwrap();
    assert_eq!(proxy.config_id, Some(ConfigId(1)));
    assert_eq!(proxy.kind, ResourceKind::Pod);

    let status = h.orchestrator.stop_one(ConfigId(1)).await;
    assert!(status.warning.is_none());
    assert_eq!(h.cluster.resource_count(), 0);
    assert!(!h.orchestrator.status(ConfigId(1)));
}

#[tokio::test]
async fn test_failed_proxy_deploy_registers_nothing() {
    let h = Harness::new(vec![]);
    h.cluster.set_fail_open(true);

    let results = h.orchestrator.start(vec![udp_config(1)]).await;
    assert_eq!(results[0].error_kind.as_deref(), Some("connection_refused"));
    assert!(h.orchestrator.registry().is_empty());
    assert_eq!(h.cluster.resource_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_start_stop_stays_consistent() {
    let h = Harness::new(vec![udp_config(1)]);

    let mut tasks = Vec::new();
    for i in 0..20 {
        let orchestrator = Arc::clone(&h.orchestrator);
        tasks.push(tokio::spawn(async move {
            if i % 2 == 0 {
                orchestrator.start(vec![udp_config(1)]).await;
            } else {
                orchestrator.stop(vec![ConfigId(1)]).await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    // Registry and cluster agree on whatever state won
    let registered = h.orchestrator.registry().len();
    assert!(registered <= 1);
    assert_eq!(h.cluster.resource_count(), registered);
    if let Some(session) = h.orchestrator.registry().get(ConfigId(1)) {
        assert!(session.state().is_live());
    }

    h.orchestrator.stop_all().await;
    assert!(h.orchestrator.registry().is_empty());
    assert_eq!(h.cluster.resource_count(), 0);
}

#[tokio::test]
async fn test_tcp_session_reconnects_after_refusal() {
    let mut settings = test_settings();
    settings.reconnect = ReconnectConfig {
        initial: Duration::from_millis(20),
        max: Duration::from_millis(50),
        multiplier: 2.0,
        jitter: 0.0,
        max_attempts: 100,
    };
    let h = Harness::with_settings(vec![], settings);

    let results = h.orchestrator.start(vec![tcp_config(1)]).await;
    let address = results[0].local_address.clone().unwrap();
    let session = h.session(1);

    h.cluster.set_fail_open(true);
    let _client = TcpStream::connect(&address).await.unwrap();
    wait_for_state(&session, SessionState::Reconnecting).await;
    assert!(h.orchestrator.status(ConfigId(1)));

    h.cluster.set_fail_open(false);
    wait_for_state(&session, SessionState::Active).await;
    assert_eq!(session.reconnects(), 1);
    assert_eq!(session.last_error().unwrap().kind(), "connection_refused");

    assert_tcp_echo(&address).await;
}

#[tokio::test]
async fn test_clients_accepted_while_reconnecting_are_served() {
    let mut settings = test_settings();
    settings.reconnect = ReconnectConfig {
        initial: Duration::from_millis(20),
        max: Duration::from_millis(50),
        multiplier: 2.0,
        jitter: 0.0,
        max_attempts: 100,
    };
    let h = Harness::with_settings(vec![], settings);

    let results = h.orchestrator.start(vec![tcp_config(1)]).await;
    let address = results[0].local_address.clone().unwrap();
    let session = h.session(1);

    h.cluster.set_fail_open(true);
    let _first = TcpStream::connect(&address).await.unwrap();
    wait_for_state(&session, SessionState::Reconnecting).await;

    let mut waiting = TcpStream::connect(&address).await.unwrap();
    waiting.write_all(b"held").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    h.cluster.set_fail_open(false);
    wait_for_state(&session, SessionState::Active).await;

    let mut buf = [0u8; 4];
    timeout(Duration::from_secs(2), waiting.read_exact(&mut buf))
        .await
        .expect("client held during reconnect was never served")
        .unwrap();
    assert_eq!(&buf, b"held");
}

#[tokio::test]
async fn test_session_fails_when_budget_is_spent() {
    let h = Harness::new(vec![tcp_config(1)]);
    let mut events = h.orchestrator.subscribe();

    let results = h.orchestrator.start(vec![tcp_config(1)]).await;
    let address = results[0].local_address.clone().unwrap();
    let session = h.session(1);
    next_config_event(&mut events, ConfigId(1), true).await;

    h.cluster.set_fail_open(true);
    let _client = TcpStream::connect(&address).await.unwrap();

    next_config_event(&mut events, ConfigId(1), false).await;
    assert_eq!(session.state(), SessionState::Failed);
    assert!(!h.orchestrator.status(ConfigId(1)));
    assert!(h.orchestrator.registry().is_empty());

    // A failed config can be started again
    h.cluster.set_fail_open(false);
    assert!(h.orchestrator.start(vec![tcp_config(1)]).await[0].is_ok());
}

#[tokio::test]
async fn test_udp_session_recovers_from_severed_stream() {
    let h = Harness::new(vec![udp_config(1)]);

    let results = h.orchestrator.start(vec![udp_config(1)]).await;
    let target: SocketAddr = results[0].local_address.as_deref().unwrap().parse().unwrap();
    let session = h.session(1);

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    assert_udp_echo(&client, target, b"query-1").await;

    h.cluster.sever();
    eventually(|| session.reconnects() == 1).await;
    assert_eq!(session.state(), SessionState::Active);
    assert_eq!(h.cluster.deploys(), 1);

    assert_udp_echo(&client, target, b"query-2").await;
}

#[tokio::test]
async fn test_vanished_proxy_pod_is_redeployed() {
    let h = Harness::new(vec![udp_config(1)]);

    let results = h.orchestrator.start(vec![udp_config(1)]).await;
    let target: SocketAddr = results[0].local_address.as_deref().unwrap().parse().unwrap();
    let session = h.session(1);
    let original = session.proxy().unwrap().name;

    h.cluster.vanish(&original);
    h.cluster.sever();
    eventually(|| session.reconnects() == 1).await;

    assert_eq!(h.cluster.deploys(), 2);
    let replacement = session.proxy().unwrap().name;
    assert_ne!(replacement, original);
    assert_eq!(h.cluster.resource_count(), 1);

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    assert_udp_echo(&client, target, b"again").await;

    h.orchestrator.stop_one(ConfigId(1)).await;
    assert_eq!(h.cluster.resource_count(), 0);
}

#[tokio::test]
async fn test_stop_during_slow_redeploy_releases_new_pod() {
    let h = Harness::new(vec![udp_config(1)]);
    h.orchestrator.start(vec![udp_config(1)]).await;
    let session = h.session(1);
    let original = session.proxy().unwrap().name;

    h.cluster.set_deploy_delay(Duration::from_millis(500));
    h.cluster.vanish(&original);
    h.cluster.sever();
    wait_for_state(&session, SessionState::Reconnecting).await;
    eventually(|| h.cluster.deploys() == 2).await;

    let status = h.orchestrator.stop_one(ConfigId(1)).await;
    assert_eq!(status.status, CommandOutcome::Stopped);
    assert!(status.warning.is_none());
    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(h.cluster.resource_count(), 0, "redeployed pod outlived the stop");
}

#[tokio::test]
async fn test_offline_wait_does_not_spend_budget() {
    let h = Harness::new(vec![tcp_config(1)]);

    let results = h.orchestrator.start(vec![tcp_config(1)]).await;
    let address = results[0].local_address.clone().unwrap();
    let session = h.session(1);

    h.connectivity.send_replace(false);
    h.cluster.set_fail_open(true);
    let _client = TcpStream::connect(&address).await.unwrap();
    eventually(|| session.is_suspect()).await;

    // Far longer than the whole retry budget
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(session.state(), SessionState::Active);
    assert!(h.orchestrator.status(ConfigId(1)));

    h.cluster.set_fail_open(false);
    h.connectivity.send_replace(true);
    eventually(|| session.reconnects() == 1).await;
    assert!(!session.is_suspect());
    assert_tcp_echo(&address).await;
}

struct SwitchProbe(AtomicBool);

#[async_trait]
impl ConnectivityProbe for SwitchProbe {
    async fn is_reachable(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[tokio::test]
async fn test_monitor_marks_and_wakes_sessions() {
    let mut settings = test_settings();
    settings.reconnect.initial = Duration::from_secs(30);
    settings.reconnect.max = Duration::from_secs(30);
    let Harness {
        orchestrator,
        cluster,
        connectivity,
        ..
    } = Harness::with_settings(vec![], settings);

    let probe = Arc::new(SwitchProbe(AtomicBool::new(true)));
    let monitor = NetworkMonitor::new(
        Arc::clone(&probe) as Arc<dyn ConnectivityProbe>,
        Arc::clone(orchestrator.registry()),
        connectivity,
        Duration::from_secs(60),
    );

    orchestrator.start(vec![tcp_config(1), tcp_config(2)]).await;
    let idle = orchestrator.registry().get(ConfigId(1)).unwrap();
    let broken = orchestrator.registry().get(ConfigId(2)).unwrap();

    // Lost: active sessions become suspect
    probe.0.store(false, Ordering::SeqCst);
    assert!(!monitor.poll_once().await);
    assert!(!monitor.is_healthy());
    assert!(idle.is_suspect());

    // Restored: suspect flags clear
    probe.0.store(true, Ordering::SeqCst);
    assert!(monitor.poll_once().await);
    assert!(!idle.is_suspect());

    // A reconnect sleeping out a long backoff retries as soon as the network returns
    cluster.set_fail_open(true);
    let _client = TcpStream::connect(broken.local_addr()).await.unwrap();
    wait_for_state(&broken, SessionState::Reconnecting).await;
    eventually(|| broken.last_error().is_some()).await;

    cluster.set_fail_open(false);
    probe.0.store(false, Ordering::SeqCst);
    monitor.poll_once().await;
    probe.0.store(true, Ordering::SeqCst);
    monitor.poll_once().await;

    timeout(Duration::from_secs(5), async {
        while broken.state() != SessionState::Active {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("retry was not woken early");
    assert_eq!(broken.reconnects(), 1);
    assert_eq!(idle.reconnects(), 0);
}

#[tokio::test]
async fn test_mixed_batch_tcp_and_udp() {
    let h = Harness::new(vec![tcp_config(1), udp_config(2)]);

    let results = h.orchestrator.start_all().await.unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.status == CommandOutcome::Running));

    let resources = h.cluster.resources();
    assert_eq!(resources.len(), 1);
    assert_eq!(resources[0].config_id, Some(ConfigId(2)));

    let states = h.orchestrator.config_states().await.unwrap();
    assert!(states.iter().all(|s| s.is_running));

    let sessions = h.orchestrator.sessions();
    assert_eq!(sessions[0].mode, "direct/service");
    assert_eq!(sessions[1].mode, "proxy/udp-service");
    assert!(sessions[1].proxy_pod.is_some());

    let stopped = h.orchestrator.stop_all().await;
    assert!(stopped.iter().all(|r| r.status == CommandOutcome::Stopped));
    assert_eq!(h.cluster.resource_count(), 0);
    assert!(h.orchestrator.registry().is_empty());

    // Stopped configs start again
    let again = h.orchestrator.start_all().await.unwrap();
    assert_eq!(again.len(), 2);
}

#[tokio::test]
async fn test_slow_cleanup_becomes_warning() {
    let h = Harness::new(vec![udp_config(1)]);
    h.orchestrator.start(vec![udp_config(1)]).await;
    h.cluster.set_teardown_delay(Duration::from_secs(5));

    let status = timeout(Duration::from_secs(2), h.orchestrator.stop_one(ConfigId(1)))
        .await
        .expect("stop must not wait for the cluster");
    assert_eq!(status.status, CommandOutcome::Stopped);
    assert!(status.warning.unwrap().contains("timed out"));
    assert!(!h.orchestrator.status(ConfigId(1)));
}

#[tokio::test]
async fn test_slow_proxy_sweep_becomes_warning() {
    let h = Harness::new(vec![udp_config(2)]);
    h.orchestrator.start(vec![udp_config(2)]).await;
    h.cluster.set_sweep_delay(Duration::from_secs(5));

    let status = timeout(
        Duration::from_secs(2),
        h.orchestrator.stop_proxy_forward(ConfigId(2), "default"),
    )
    .await
    .expect("proxy sweep must be bounded by the cleanup timeout");
    assert_eq!(status.status, CommandOutcome::Stopped);
    let warning = status.warning.unwrap();
    assert!(warning.contains("proxy sweep"));
    assert!(warning.contains("timed out"));
    assert!(!h.orchestrator.status(ConfigId(2)));
}

#[tokio::test]
async fn test_stop_proxy_forward_sweeps_leftovers() {
    let h = Harness::new(vec![udp_config(2)]);
    h.orchestrator.start(vec![udp_config(2)]).await;
    h.cluster.insert_resource(ProxyResource {
        cluster: ClusterRef::default(),
        namespace: "default".into(),
        kind: ResourceKind::Pod,
        name: "kftray-forward-test-udp-old".into(),
        config_id: Some(ConfigId(2)),
        created_at_millis: None,
        status: "Running".into(),
        orphaned: false,
    });
    assert_eq!(h.cluster.resource_count(), 2);

    let status = h.orchestrator.stop_proxy_forward(ConfigId(2), "default").await;
    assert_eq!(status.status, CommandOutcome::Stopped);
    assert_eq!(h.cluster.resource_count(), 0);
}

fn leftover(name: &str, config_id: Option<i64>) -> ProxyResource {
    ProxyResource {
        cluster: ClusterRef::default(),
        namespace: "default".into(),
        kind: ResourceKind::Pod,
        name: name.into(),
        config_id: config_id.map(ConfigId),
        created_at_millis: None,
        status: "Running".into(),
        orphaned: false,
    }
}

#[tokio::test]
async fn test_orphans_are_detected_and_cleaned() {
    let h = Harness::new(vec![udp_config(1), udp_config(7)]);
    let tracker = ResourceTracker::new(Arc::clone(&h.orchestrator));

    h.orchestrator.start(vec![udp_config(1)]).await;
    // Config 7 exists but is not running
    h.cluster.insert_resource(leftover("kftray-forward-test-udp-stale", Some(7)));
    // Config 9 was deleted from the store
    h.cluster.insert_resource(leftover("kftray-forward-test-udp-deleted", Some(9)));
    h.cluster.insert_resource(leftover("kftray-forward-test-udp-unlabelled", None));

    let groups = tracker.list(&ClusterRef::default(), None).await.unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].namespace, "default");

    let orphaned: Vec<&str> = groups[0]
        .resources
        .iter()
        .filter(|r| r.orphaned)
        .map(|r| r.name.as_str())
        .collect();
    assert_eq!(
        orphaned,
        vec![
            "kftray-forward-test-udp-deleted",
            "kftray-forward-test-udp-stale",
            "kftray-forward-test-udp-unlabelled",
        ]
    );

    let report = tracker.cleanup_all(&ClusterRef::default()).await.unwrap();
    assert_eq!(report.deleted, 3);
    assert_eq!(report.message(), "Successfully deleted 3 resources");

    // Only the live session's pod survives
    let remaining = h.cluster.resources();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].config_id, Some(ConfigId(1)));
    assert!(h.orchestrator.status(ConfigId(1)));
}

#[tokio::test]
async fn test_deleting_owned_resource_stops_session() {
    let h = Harness::new(vec![udp_config(3)]);
    let tracker = ResourceTracker::new(Arc::clone(&h.orchestrator));

    h.orchestrator.start(vec![udp_config(3)]).await;
    let proxy = h.session(3).proxy().unwrap();

    tracker.delete(&proxy).await.unwrap();
    assert!(!h.orchestrator.status(ConfigId(3)));
    assert_eq!(h.cluster.resource_count(), 0);
}

#[tokio::test]
async fn test_config_states_cover_store_and_registry() {
    let h = Harness::new(vec![tcp_config(1), tcp_config(2)]);
    h.orchestrator.start(vec![tcp_config(2)]).await;

    let states = h.orchestrator.config_states().await.unwrap();
    let flags: Vec<(i64, bool)> = states.iter().map(|s| (s.config_id.0, s.is_running)).collect();
    assert_eq!(flags, vec![(1, false), (2, true)]);

    h.store.delete(ConfigId(2)).await.unwrap();
    let states = h.orchestrator.config_states().await.unwrap();
    assert_eq!(states.len(), 2, "running sessions stay visible after a store delete");
}

#[tokio::test]
async fn test_state_change_events() {
    let h = Harness::new(vec![tcp_config(1)]);
    let mut events = h.orchestrator.subscribe();

    h.orchestrator.start(vec![tcp_config(1)]).await;
    next_config_event(&mut events, ConfigId(1), true).await;

    h.orchestrator.stop_one(ConfigId(1)).await;
    next_config_event(&mut events, ConfigId(1), false).await;
}
