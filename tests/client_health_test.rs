//! Integration tests for the client facade and health classification.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use omnisight_ipc::cache::{FreshnessCache, Reading, Source};
use omnisight_ipc::command::{CommandChannel, CommandType};
use omnisight_ipc::health::HealthStatus;
use omnisight_ipc::sim::Simulator;
use omnisight_ipc::snapshot::ManualClock;
use omnisight_ipc::types::ProducerState;
use omnisight_ipc::{IpcClient, IpcConfig, IpcError};
use serde_json::json;
use tempfile::TempDir;

const T0: u64 = 1_700_000_000_000;

fn config_in(dir: &TempDir) -> IpcConfig {
    let mut config = IpcConfig::default();
    config.paths.shm_dir = dir.path().join("shm");
    config.paths.snapshot_dir = dir.path().join("snapshots");
    config.paths.command_path = dir.path().join("omnisight_cmd");
    config.paths.ack_path = dir.path().join("omnisight_cmd_ack");
    config.shm.enabled = false;
    config.command.poll_interval = Duration::from_millis(5);
    config.command.default_timeout = Duration::from_millis(500);
    config.command.ping_timeout = Duration::from_millis(300);
    config
}

fn client_with_clock(config: &IpcConfig, clock: Arc<ManualClock>) -> IpcClient {
    let cache = FreshnessCache::builder(&config.paths.snapshot_dir)
        .high_frequency_window(config.freshness.high_frequency)
        .low_frequency_window(config.freshness.low_frequency)
        .clock(clock)
        .build();
    IpcClient::from_parts(config.clone(), cache, CommandChannel::from_config(config))
}

/// Simulated producer stepping at a fixed timestamp on a background thread.
struct Producer {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<bool>>,
}

impl Producer {
    fn spawn(config: &IpcConfig, now_ms: u64) -> Self {
        let mut simulator = Simulator::from_config(config).unwrap();
        // First outputs exist before the caller proceeds.
        simulator.step(now_ms).unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = std::thread::spawn(move || {
            while !flag.load(Ordering::Relaxed) {
                if !simulator.step(now_ms).unwrap() {
                    return false;
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            true
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Stop and report whether the simulator was still running.
    fn stop(mut self) -> bool {
        self.stop.store(true, Ordering::Relaxed);
        self.handle
            .take()
            .map(|h| h.join().unwrap())
            .unwrap_or(false)
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[test]
fn test_absent_producer_is_unhealthy() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    let client = client_with_clock(&config, Arc::new(ManualClock::new(T0)));

    let report = client.health_check();
    assert_eq!(report.status, HealthStatus::Unhealthy);
    assert!(!report.signals.shm_or_snapshot_accessible);
    assert!(!report.signals.data_fresh);
    assert!(!report.signals.producer_responsive);
    assert_eq!(report.producer_state, None);
    assert_eq!(report.detections_age_ms, None);

    assert_eq!(client.get_detections(), Reading::Unavailable);
    let err = client
        .send_command(CommandType::Ping, json!({}), None)
        .unwrap_err();
    assert!(matches!(err, IpcError::Unavailable { .. }), "got {:?}", err);
}

#[test]
fn test_running_producer_is_healthy() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    let producer = Producer::spawn(&config, T0);
    let clock = Arc::new(ManualClock::new(T0 + 40));
    let client = client_with_clock(&config, clock);

    let report = client.health_check();
    assert_eq!(report.status, HealthStatus::Healthy, "{:?}", report);
    assert_eq!(report.producer_state, Some(ProducerState::Running));
    assert_eq!(report.detections_age_ms, Some(40));

    match client.get_tracks() {
        Reading::Fresh { value, source } => {
            assert_eq!(source, Source::Snapshot);
            assert_eq!(value.tracks.len(), 3);
        }
        other => panic!("expected fresh tracks, got {:?}", other),
    }
    assert!(client.get_timelines().is_fresh());
    assert!(client.get_stats().value().is_some_and(|s| s.is_running));

    assert!(producer.stop());
}

#[test]
fn test_unresponsive_producer_is_degraded() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    // One step writes every snapshot, then the producer stops answering.
    Simulator::from_config(&config).unwrap().step(T0).unwrap();
    let client = client_with_clock(&config, Arc::new(ManualClock::new(T0 + 100)));

    let report = client.health_check();
    assert_eq!(report.status, HealthStatus::Degraded);
    assert!(report.signals.shm_or_snapshot_accessible);
    assert!(report.signals.data_fresh);
    assert!(!report.signals.producer_responsive);
}

#[test]
fn test_stale_data_is_degraded_and_flaps_back() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    let producer = Producer::spawn(&config, T0);
    let clock = Arc::new(ManualClock::new(T0));
    let client = client_with_clock(&config, clock.clone());

    assert_eq!(client.health_check().status, HealthStatus::Healthy);

    clock.set(T0 + 5001);
    let report = client.health_check();
    assert_eq!(report.status, HealthStatus::Degraded);
    assert!(report.signals.shm_or_snapshot_accessible);
    assert!(!report.signals.data_fresh);
    assert_eq!(report.detections_age_ms, Some(5001));

    // No history: the next check starts from scratch.
    clock.set(T0 + 10);
    assert_eq!(client.health_check().status, HealthStatus::Healthy);

    drop(producer);
}

#[test]
fn test_shutdown_command_stops_simulator() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    let producer = Producer::spawn(&config, T0);
    let client = client_with_clock(&config, Arc::new(ManualClock::new(T0)));

    let ack = client
        .send_command(CommandType::Shutdown, json!({}), Some(Duration::from_secs(2)))
        .unwrap();
    assert!(ack.is_success());
    assert!(!producer.stop());

    // Snapshots remain, so the last values are still served.
    assert!(client.get_status().is_available());
}

#[tokio::test]
async fn test_async_command_through_client() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    let _producer = Producer::spawn(&config, T0);
    let client = client_with_clock(&config, Arc::new(ManualClock::new(T0)));

    let ack = client
        .send_command_async(CommandType::RefreshTimelines, json!({}), None)
        .await
        .unwrap();
    assert!(ack.is_success());
}

#[test]
fn test_client_clones_share_cache() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    Simulator::from_config(&config).unwrap().step(T0).unwrap();
    let client = client_with_clock(&config, Arc::new(ManualClock::new(T0)));
    let other = client.clone();

    assert!(client.get_detections().is_fresh());
    assert_eq!(other.cache_stats().detections.snapshot_hits, 1);
}
