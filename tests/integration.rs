//! Integration tests for `dns-redirect`.
//!
//! Everything except the tests marked `#[ignore]` runs against the in-memory
//! host in `common`. The ignored ones touch the live OS and need an elevated
//! Windows session:
//!
//! ```bash
//! cargo test -- --ignored
//! ```

mod common;

use common::{Sim, orchestrator, settings_on_disk};
use dns_redirect::adapter::IpFamily;
use dns_redirect::service::ServiceStatus;
use dns_redirect::{
    AdapterDnsBackup, AdapterScope, Error, Outcome, PortConflict, SilentObserver, StartMode,
    StatusObserver,
};
use std::sync::atomic::{AtomicUsize, Ordering};

const RESOLVER: &str = "AcrylicDNSProxySvc";
const PROXY: &str = "SNIBypass";

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(ToString::to_string).collect()
}

/// Answers every reclaim prompt with `answer` and counts the prompts.
struct Confirm {
    answer: bool,
    asked: AtomicUsize,
}

impl Confirm {
    const fn new(answer: bool) -> Self {
        Self {
            answer,
            asked: AtomicUsize::new(0),
        }
    }
}

impl StatusObserver for Confirm {
    fn confirm_reclaim(&self, _conflicts: &[PortConflict]) -> bool {
        self.asked.fetch_add(1, Ordering::SeqCst);
        self.answer
    }
}

// ---------------------------------------------------------------------------
// Start / stop lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn start_redirects_and_stop_restores() {
    let dir = tempfile::tempdir().unwrap();
    let sim = Sim::two_adapters();
    sim.install_service(RESOLVER, false);
    let orch = orchestrator(&sim, dir.path());

    assert_eq!(orch.select_adapter("Ethernet").await.unwrap(), Outcome::Completed);
    assert_eq!(
        orch.start(StartMode::Interactive, &SilentObserver).await.unwrap(),
        Outcome::Completed
    );

    let eth = sim.adapter("Ethernet");
    assert_eq!(eth.ipv4, ["127.0.0.1"]);
    assert_eq!(eth.ipv6, ["::1"]);
    assert_eq!(sim.running_count(PROXY), 1);
    assert!(sim.service_running(RESOLVER));
    assert!(sim.state().flushes > 0);
    assert!(orch.runtime_state().await.is_running());

    let saved = settings_on_disk(&orch);
    assert_eq!(saved.selected_adapter.as_deref(), Some("Ethernet"));
    assert_eq!(
        saved.adapter_backups["Ethernet"],
        AdapterDnsBackup {
            ipv4_servers: strings(&["8.8.8.8", "1.1.1.1"]),
            ipv6_servers: strings(&["2001:4860:4860::8888"]),
            ipv4_auto: false,
            ipv6_auto: false,
        }
    );

    assert_eq!(orch.stop(&SilentObserver).await.unwrap(), Outcome::Completed);

    let eth = sim.adapter("Ethernet");
    assert_eq!(eth.ipv4, ["8.8.8.8", "1.1.1.1"]);
    assert_eq!(eth.ipv6, ["2001:4860:4860::8888"]);
    assert_eq!(sim.running_count(PROXY), 0);
    assert!(!sim.service_running(RESOLVER));
    assert!(orch.runtime_state().await.is_idle());
    assert!(settings_on_disk(&orch).adapter_backups.is_empty());
}

#[tokio::test]
async fn automatic_dns_survives_a_session() {
    let dir = tempfile::tempdir().unwrap();
    let sim = Sim::two_adapters();
    sim.install_service(RESOLVER, false);
    let orch = orchestrator(&sim, dir.path());

    orch.select_adapter("Wi-Fi").await.unwrap();
    orch.start(StartMode::Interactive, &SilentObserver).await.unwrap();
    let backup = settings_on_disk(&orch).adapter_backups["Wi-Fi"].clone();
    assert!(backup.ipv4_auto && backup.ipv6_auto);

    orch.stop(&SilentObserver).await.unwrap();
    let wifi = sim.adapter("Wi-Fi");
    assert!(wifi.ipv4.is_empty() && wifi.ipv6.is_empty());
    // The other adapter was never touched.
    assert!(sim.state().dns_writes.iter().all(|(name, _, _)| name == "Wi-Fi"));
}

#[tokio::test]
async fn concurrent_start_is_rejected_as_busy() {
    let dir = tempfile::tempdir().unwrap();
    let sim = Sim::two_adapters();
    sim.install_service(RESOLVER, false);
    let orch = orchestrator(&sim, dir.path());
    orch.select_adapter("Ethernet").await.unwrap();

    let (a, b) = tokio::join!(
        orch.start(StartMode::Interactive, &SilentObserver),
        orch.start(StartMode::Interactive, &SilentObserver),
    );
    let outcomes = [a.unwrap(), b.unwrap()];
    assert!(outcomes.contains(&Outcome::Completed));
    assert!(outcomes.contains(&Outcome::Busy));
    assert_eq!(sim.state().spawned.len(), 1);
}

#[tokio::test]
async fn second_start_skips_running_parts() {
    let dir = tempfile::tempdir().unwrap();
    let sim = Sim::two_adapters();
    sim.install_service(RESOLVER, false);
    let orch = orchestrator(&sim, dir.path());
    orch.select_adapter("Ethernet").await.unwrap();

    orch.start(StartMode::Interactive, &SilentObserver).await.unwrap();
    orch.start(StartMode::Interactive, &SilentObserver).await.unwrap();

    assert_eq!(sim.state().spawned.len(), 1);
    // The adapter was already on loopback; the original backup is kept.
    assert_eq!(
        settings_on_disk(&orch).adapter_backups["Ethernet"].ipv4_servers,
        ["8.8.8.8", "1.1.1.1"]
    );
}

#[tokio::test]
async fn stop_when_idle_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let sim = Sim::two_adapters();
    let orch = orchestrator(&sim, dir.path());

    assert_eq!(orch.stop(&SilentObserver).await.unwrap(), Outcome::Completed);
    orch.select_adapter("Ethernet").await.unwrap();
    assert_eq!(orch.stop(&SilentObserver).await.unwrap(), Outcome::Completed);

    let s = sim.state();
    assert!(s.dns_writes.is_empty());
    assert!(s.spawned.is_empty());
    assert!(s.killed.is_empty());
}

#[tokio::test]
async fn restore_without_backup_is_a_noop() {
    let dir = tempfile::tempdir().unwrap();
    let sim = Sim::two_adapters();
    let orch = orchestrator(&sim, dir.path());

    let adapters = orch.list_adapters(AdapterScope::All).await.unwrap();
    let eth = common::find(&adapters, "Ethernet");
    assert_eq!(orch.restore_dns(&eth, true).await.unwrap(), Outcome::Completed);
    assert!(sim.state().dns_writes.is_empty());
}

#[tokio::test]
async fn loopback_then_restore_returns_original_state() {
    let dir = tempfile::tempdir().unwrap();
    let sim = Sim::two_adapters();
    let orch = orchestrator(&sim, dir.path());

    for name in ["Ethernet", "Wi-Fi"] {
        let before = sim.adapter(name);
        let adapters = orch.list_adapters(AdapterScope::All).await.unwrap();
        let adapter = common::find(&adapters, name);

        orch.set_loopback_dns(&adapter).await.unwrap();
        assert_eq!(sim.adapter(name).ipv4, ["127.0.0.1"]);

        orch.restore_dns(&adapter, true).await.unwrap();
        let after = sim.adapter(name);
        assert_eq!(after.ipv4, before.ipv4);
        assert_eq!(after.ipv6, before.ipv6);
        assert!(!settings_on_disk(&orch).adapter_backups.contains_key(name));
    }
}

#[tokio::test]
async fn start_without_selection_fails_before_any_change() {
    let dir = tempfile::tempdir().unwrap();
    let sim = Sim::two_adapters();
    let orch = orchestrator(&sim, dir.path());

    let err = orch.start(StartMode::Interactive, &SilentObserver).await.unwrap_err();
    assert!(matches!(err, Error::NoAdapterSelected));
    assert!(sim.state().spawned.is_empty());
}

#[tokio::test]
async fn start_with_vanished_adapter_fails_before_any_change() {
    let dir = tempfile::tempdir().unwrap();
    let sim = Sim::two_adapters();
    let orch = orchestrator(&sim, dir.path());
    orch.select_adapter("Wi-Fi").await.unwrap();
    sim.remove_adapter("Wi-Fi");

    let err = orch.start(StartMode::Interactive, &SilentObserver).await.unwrap_err();
    assert!(matches!(err, Error::AdapterNotFound { ref name } if name == "Wi-Fi"));
    assert!(sim.state().spawned.is_empty());
}

#[tokio::test]
async fn selecting_unknown_adapter_fails() {
    let dir = tempfile::tempdir().unwrap();
    let sim = Sim::two_adapters();
    let orch = orchestrator(&sim, dir.path());

    let err = orch.select_adapter("Bluetooth").await.unwrap_err();
    assert!(matches!(err, Error::AdapterNotFound { .. }));
    assert_eq!(orch.settings().snapshot().selected_adapter, None);
}

#[tokio::test]
async fn dns_falls_back_to_second_strategy() {
    let dir = tempfile::tempdir().unwrap();
    let sim = Sim::two_adapters();
    sim.install_service(RESOLVER, false);
    sim.fail_strategy(IpFamily::V4, "primary");
    let orch = orchestrator(&sim, dir.path());
    orch.select_adapter("Ethernet").await.unwrap();

    orch.start(StartMode::Interactive, &SilentObserver).await.unwrap();
    assert_eq!(sim.adapter("Ethernet").ipv4, ["127.0.0.1"]);
}

#[tokio::test]
async fn start_fails_when_no_family_can_be_set() {
    let dir = tempfile::tempdir().unwrap();
    let sim = Sim::two_adapters();
    sim.install_service(RESOLVER, false);
    for family in [IpFamily::V4, IpFamily::V6] {
        sim.fail_strategy(family, "primary");
        sim.fail_strategy(family, "fallback");
    }
    let orch = orchestrator(&sim, dir.path());
    orch.select_adapter("Ethernet").await.unwrap();

    let err = orch.start(StartMode::Interactive, &SilentObserver).await.unwrap_err();
    assert!(matches!(err, Error::DnsApplyFailed { .. }));
    // Earlier steps are not rolled back.
    assert_eq!(sim.running_count(PROXY), 1);
    assert!(sim.service_running(RESOLVER));
}

#[tokio::test]
async fn start_tolerates_one_failing_family() {
    let dir = tempfile::tempdir().unwrap();
    let sim = Sim::two_adapters();
    sim.install_service(RESOLVER, false);
    sim.fail_strategy(IpFamily::V6, "primary");
    sim.fail_strategy(IpFamily::V6, "fallback");
    let orch = orchestrator(&sim, dir.path());
    orch.select_adapter("Ethernet").await.unwrap();

    orch.start(StartMode::Interactive, &SilentObserver).await.unwrap();
    let eth = sim.adapter("Ethernet");
    assert_eq!(eth.ipv4, ["127.0.0.1"]);
    assert_eq!(eth.ipv6, ["2001:4860:4860::8888"]);
}

#[tokio::test]
async fn failed_restore_keeps_backup_and_finishes_stop() {
    let dir = tempfile::tempdir().unwrap();
    let sim = Sim::two_adapters();
    sim.install_service(RESOLVER, false);
    let orch = orchestrator(&sim, dir.path());
    orch.select_adapter("Ethernet").await.unwrap();
    orch.start(StartMode::Interactive, &SilentObserver).await.unwrap();

    sim.fail_strategy(IpFamily::V4, "primary");
    sim.fail_strategy(IpFamily::V4, "fallback");
    let err = orch.stop(&SilentObserver).await.unwrap_err();
    assert!(matches!(err, Error::DnsApplyFailed { .. }));

    assert_eq!(sim.running_count(PROXY), 0);
    assert!(!sim.service_running(RESOLVER));
    assert!(settings_on_disk(&orch).adapter_backups.contains_key("Ethernet"));
}

#[tokio::test]
async fn stop_keeps_backup_of_missing_adapter() {
    let dir = tempfile::tempdir().unwrap();
    let sim = Sim::two_adapters();
    sim.install_service(RESOLVER, false);
    let orch = orchestrator(&sim, dir.path());
    orch.select_adapter("Ethernet").await.unwrap();
    orch.start(StartMode::Interactive, &SilentObserver).await.unwrap();

    sim.remove_adapter("Ethernet");
    orch.stop(&SilentObserver).await.unwrap();
    assert!(settings_on_disk(&orch).adapter_backups.contains_key("Ethernet"));
    assert_eq!(sim.running_count(PROXY), 0);
}

#[tokio::test]
async fn switching_adapter_mid_session_moves_redirection() {
    let dir = tempfile::tempdir().unwrap();
    let sim = Sim::two_adapters();
    sim.install_service(RESOLVER, false);
    let orch = orchestrator(&sim, dir.path());
    orch.select_adapter("Ethernet").await.unwrap();
    orch.start(StartMode::Interactive, &SilentObserver).await.unwrap();

    assert_eq!(orch.select_adapter("Wi-Fi").await.unwrap(), Outcome::Completed);

    assert_eq!(sim.adapter("Ethernet").ipv4, ["8.8.8.8", "1.1.1.1"]);
    assert_eq!(sim.adapter("Wi-Fi").ipv4, ["127.0.0.1"]);
    let saved = settings_on_disk(&orch);
    assert_eq!(saved.selected_adapter.as_deref(), Some("Wi-Fi"));
    assert!(!saved.adapter_backups.contains_key("Ethernet"));
    assert!(saved.adapter_backups["Wi-Fi"].ipv4_auto);
}

#[tokio::test]
async fn failed_restore_blocks_adapter_switch() {
    let dir = tempfile::tempdir().unwrap();
    let sim = Sim::two_adapters();
    sim.install_service(RESOLVER, false);
    let orch = orchestrator(&sim, dir.path());
    orch.select_adapter("Ethernet").await.unwrap();
    orch.start(StartMode::Interactive, &SilentObserver).await.unwrap();

    sim.lock_adapter_dns("Ethernet");
    let err = orch.select_adapter("Wi-Fi").await.unwrap_err();
    assert!(matches!(err, Error::DnsApplyFailed { ref adapter } if adapter == "Ethernet"));

    assert_eq!(sim.adapter("Ethernet").ipv4, ["127.0.0.1"]);
    assert!(sim.adapter("Wi-Fi").ipv4.is_empty());
    let saved = settings_on_disk(&orch);
    assert_eq!(saved.selected_adapter.as_deref(), Some("Ethernet"));
    assert!(saved.adapter_backups.contains_key("Ethernet"));
    assert!(!saved.adapter_backups.contains_key("Wi-Fi"));

    // Once the old adapter can be written again the switch goes through.
    sim.unlock_adapter_dns("Ethernet");
    assert_eq!(orch.select_adapter("Wi-Fi").await.unwrap(), Outcome::Completed);
    assert_eq!(sim.adapter("Ethernet").ipv4, ["8.8.8.8", "1.1.1.1"]);
    assert_eq!(sim.adapter("Wi-Fi").ipv4, ["127.0.0.1"]);
}

// ---------------------------------------------------------------------------
// Port conflicts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unattended_start_records_port_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let sim = Sim::two_adapters();
    sim.install_service(RESOLVER, false);
    let nginx = sim.occupy_port(80, "nginx");
    let orch = orchestrator(&sim, dir.path());
    orch.select_adapter("Ethernet").await.unwrap();

    let err = orch.start(StartMode::Unattended, &SilentObserver).await.unwrap_err();
    assert!(matches!(err, Error::PortConflict { ref ports } if ports == &[80]));
    assert_eq!(orch.pending_port_conflict(), [PortConflict { port: 80, pid: nginx }]);
    assert!(sim.state().spawned.is_empty());
    assert!(sim.state().processes.contains_key(&nginx));

    orch.reclaim_ports().await.unwrap();
    assert!(orch.pending_port_conflict().is_empty());
    assert!(!sim.state().processes.contains_key(&nginx));
    assert_eq!(
        orch.start(StartMode::Unattended, &SilentObserver).await.unwrap(),
        Outcome::Completed
    );
}

#[tokio::test]
async fn interactive_start_reclaims_after_confirmation() {
    let dir = tempfile::tempdir().unwrap();
    let sim = Sim::two_adapters();
    sim.install_service(RESOLVER, false);
    let nginx = sim.occupy_port(443, "nginx");
    let orch = orchestrator(&sim, dir.path());
    orch.select_adapter("Ethernet").await.unwrap();

    let observer = Confirm::new(true);
    orch.start(StartMode::Interactive, &observer).await.unwrap();
    assert_eq!(observer.asked.load(Ordering::SeqCst), 1);
    assert_eq!(sim.state().killed, [nginx]);
    assert_eq!(sim.running_count(PROXY), 1);
}

#[tokio::test]
async fn interactive_start_declined_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let sim = Sim::two_adapters();
    let nginx = sim.occupy_port(80, "nginx");
    let orch = orchestrator(&sim, dir.path());
    orch.select_adapter("Ethernet").await.unwrap();

    let err = orch.start(StartMode::Interactive, &Confirm::new(false)).await.unwrap_err();
    assert!(err.is_port_conflict());
    assert!(sim.state().processes.contains_key(&nginx));
    assert!(sim.state().spawned.is_empty());
    assert!(orch.pending_port_conflict().is_empty());
}

#[tokio::test]
async fn system_listener_is_freed_by_stopping_its_service() {
    let dir = tempfile::tempdir().unwrap();
    let sim = Sim::two_adapters();
    sim.system_listener("W3SVC", &[80, 443]);
    let orch = orchestrator(&sim, dir.path());

    assert_eq!(orch.port_conflicts().await.unwrap().len(), 2);
    orch.reclaim_ports().await.unwrap();
    assert!(!sim.service_running("W3SVC"));
    assert!(orch.port_conflicts().await.unwrap().is_empty());
    assert!(sim.state().killed.is_empty());
}

#[tokio::test]
async fn reclaim_reports_ports_still_held() {
    let dir = tempfile::tempdir().unwrap();
    let sim = Sim::two_adapters();
    let stubborn = sim.occupy_port(443, "antivirus");
    sim.state().unkillable.insert(stubborn);
    sim.occupy_port(80, "nginx");
    let orch = orchestrator(&sim, dir.path());

    let err = orch.reclaim_ports().await.unwrap_err();
    assert!(matches!(err, Error::PortConflict { ref ports } if ports == &[443]));
}

#[tokio::test]
async fn own_process_never_conflicts() {
    let dir = tempfile::tempdir().unwrap();
    let sim = Sim::two_adapters();
    sim.state().ports.insert(80, std::process::id());
    let orch = orchestrator(&sim, dir.path());

    assert!(orch.port_conflicts().await.unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Resolver service
// ---------------------------------------------------------------------------

#[tokio::test]
async fn resolver_install_and_uninstall_are_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let sim = Sim::two_adapters();
    let orch = orchestrator(&sim, dir.path());
    let resolver = orch.resolver();

    resolver.install().await.unwrap();
    resolver.install().await.unwrap();
    assert!(resolver.is_installed());
    let spec = sim.state().services[RESOLVER].spec.clone().unwrap();
    assert_eq!(spec.start_type, dns_redirect::service::StartType::Manual);
    assert!(spec.binary_path.ends_with("Data/Acrylic/AcrylicService.exe"));

    sim.state().processes.insert(1, "AcrylicService".into());
    resolver.uninstall().await.unwrap();
    resolver.uninstall().await.unwrap();
    assert!(!resolver.is_installed());
    assert_eq!(sim.running_count("AcrylicService"), 0);
}

#[tokio::test]
async fn resolver_install_waits_out_pending_deletion() {
    let dir = tempfile::tempdir().unwrap();
    let sim = Sim::two_adapters();
    sim.state().services.insert(
        RESOLVER.into(),
        common::SimService {
            marked_for_delete: true,
            ..Default::default()
        },
    );
    let orch = orchestrator(&sim, dir.path());

    let err = orch.resolver().install().await.unwrap_err();
    assert!(matches!(err, Error::Service { operation: "install", .. }));
}

#[tokio::test]
async fn resolver_start_fails_when_not_installed() {
    let dir = tempfile::tempdir().unwrap();
    let sim = Sim::two_adapters();
    let orch = orchestrator(&sim, dir.path());
    orch.select_adapter("Ethernet").await.unwrap();

    let err = orch.start(StartMode::Interactive, &SilentObserver).await.unwrap_err();
    assert!(matches!(err, Error::Service { operation: "start", .. }));
    // The adapter is only redirected once both parts are up.
    assert_eq!(sim.adapter("Ethernet").ipv4, ["8.8.8.8", "1.1.1.1"]);
}

#[tokio::test]
async fn hit_log_is_configured_on_start() {
    let dir = tempfile::tempdir().unwrap();
    let acrylic = dir.path().join("Data").join("Acrylic");
    std::fs::create_dir_all(&acrylic).unwrap();
    let ini = acrylic.join("AcrylicConfiguration.ini");
    std::fs::write(
        &ini,
        "[GlobalSection]\r\nPrimaryServerAddress=1.1.1.1\r\nHitLogFileName=\r\n\r\n[AllowedAddressesSection]\r\nIP1=*\r\n",
    )
    .unwrap();

    let sim = Sim::two_adapters();
    sim.install_service(RESOLVER, false);
    let orch = orchestrator(&sim, dir.path());
    orch.settings().update(|s| s.resolver_hit_log = true);
    orch.select_adapter("Ethernet").await.unwrap();

    orch.start(StartMode::Interactive, &SilentObserver).await.unwrap();

    let content = std::fs::read_to_string(&ini).unwrap();
    assert!(content.contains("PrimaryServerAddress=1.1.1.1\r\n"));
    assert!(content.contains("HitLogFileWhat=XHCFRU\r\n"));
    assert!(content.contains("HitLogFullDump=Yes\r\n"));
    assert!(content.contains("HitLogMaxPendingHits=0\r\n"));
    assert!(content.contains("HitLog-"));
    assert!(content.contains("[AllowedAddressesSection]\r\nIP1=*\r\n"));
    assert_eq!(sim.state().hit_log_started.len(), 1);

    orch.stop(&SilentObserver).await.unwrap();
    let s = sim.state();
    assert_eq!(s.hit_log_stopped, s.hit_log_started);
}

#[test]
fn resolver_status_reports_lifecycle() {
    let sim = Sim::two_adapters();
    let supervisor = dns_redirect::ServiceSupervisor::new(std::sync::Arc::new(sim.clone()));

    assert_eq!(supervisor.status(RESOLVER).unwrap(), ServiceStatus::Absent);
    sim.install_service(RESOLVER, false);
    assert_eq!(supervisor.status(RESOLVER).unwrap(), ServiceStatus::Stopped);
    sim.install_service(RESOLVER, true);
    assert_eq!(supervisor.status(RESOLVER).unwrap(), ServiceStatus::Running);
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[tokio::test]
async fn auto_switch_flag_is_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let sim = Sim::two_adapters();
    let orch = orchestrator(&sim, dir.path());

    orch.set_auto_switch(false).await.unwrap();
    assert!(!settings_on_disk(&orch).auto_switch_adapter);
    orch.set_auto_switch(true).await.unwrap();
    assert!(settings_on_disk(&orch).auto_switch_adapter);
}

#[tokio::test]
async fn adapter_listing_respects_scope() {
    let dir = tempfile::tempdir().unwrap();
    let sim = Sim::two_adapters();
    sim.state()
        .adapters
        .push(common::SimAdapter::new("", "{AAAAAAAA-0000-0000-0000-000000000003}", 9, &[], &[]));
    let orch = orchestrator(&sim, dir.path());

    assert_eq!(orch.list_adapters(AdapterScope::All).await.unwrap().len(), 3);
    assert_eq!(orch.list_adapters(AdapterScope::FriendlyNameOnly).await.unwrap().len(), 2);
    assert_eq!(orch.default_adapter().await.unwrap().friendly_name, "Ethernet");
}

// ---------------------------------------------------------------------------
// Live OS
// ---------------------------------------------------------------------------

#[cfg(any(windows, target_os = "linux"))]
#[test]
fn system_tcp_table_finds_own_listener() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let table = dns_redirect::platform::system_tcp_table().unwrap();

    assert_eq!(table.owner_pid(port, IpFamily::V4).unwrap(), std::process::id());
}

#[cfg(windows)]
#[tokio::test]
#[ignore = "requires an elevated Windows session"]
async fn live_adapters_are_listed() {
    let host = dns_redirect::platform::system_host().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let config = dns_redirect::OrchestratorConfig::for_base_dir(dir.path());
    let settings = dns_redirect::SettingsStore::load(&config.settings_path);
    let orch = dns_redirect::ProxyOrchestrator::new(host, config, settings);

    let adapters = orch.list_adapters(AdapterScope::FriendlyNameOnly).await.unwrap();
    assert!(!adapters.is_empty());
    assert!(orch.default_adapter().await.is_some());
}

#[cfg(not(windows))]
#[test]
fn system_host_is_unsupported_off_windows() {
    assert!(matches!(
        dns_redirect::platform::system_host(),
        Err(Error::Unsupported { .. })
    ));
}
