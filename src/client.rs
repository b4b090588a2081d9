//! Client facade used by the API tier.
//!
//! [`IpcClient`] bundles the freshness cache and the command channel behind
//! the seven operations request handlers call. It is cheap to clone; all
//! clones share one cache.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::cache::{CacheStats, FreshnessCache, Reading};
use crate::command::{CommandAck, CommandChannel, CommandType};
use crate::config::IpcConfig;
use crate::error::IpcResult;
use crate::health::{HealthReport, HealthSignals};
use crate::types::{DetectionSet, ProducerStats, ProducerStatus, TimelineSet, Timestamped, TrackSet};

struct Inner {
    config: IpcConfig,
    cache: FreshnessCache,
    commands: CommandChannel,
}

/// Shared handle to the IPC data plane.
///
/// # Example
/// ```no_run
/// use omnisight_ipc::{IpcClient, IpcConfig, Reading};
///
/// let client = IpcClient::new(IpcConfig::default());
/// match client.get_detections() {
///     Reading::Fresh { value, .. } => println!("{} detections", value.detections.len()),
///     Reading::Stale { value, age, .. } => println!("stale ({age:?}): {}", value.detections.len()),
///     Reading::Unavailable => println!("producer not started"),
/// }
/// ```
#[derive(Clone)]
pub struct IpcClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for IpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcClient")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl IpcClient {
    /// Client wired to the producer resources named in `config`.
    pub fn new(config: IpcConfig) -> Self {
        let cache = FreshnessCache::from_config(&config);
        let commands = CommandChannel::from_config(&config);
        Self::from_parts(config, cache, commands)
    }

    /// Client over explicitly constructed components.
    pub fn from_parts(config: IpcConfig, cache: FreshnessCache, commands: CommandChannel) -> Self {
        tracing::debug!(
            snapshot_dir = %config.paths.snapshot_dir.display(),
            shm = config.shm.enabled,
            "IPC client created"
        );
        Self {
            inner: Arc::new(Inner {
                config,
                cache,
                commands,
            }),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &IpcConfig {
        &self.inner.config
    }

    /// Latest detections.
    pub fn get_detections(&self) -> Reading<DetectionSet> {
        self.inner.cache.detections()
    }

    /// Latest tracked objects.
    pub fn get_tracks(&self) -> Reading<TrackSet> {
        self.inner.cache.tracks()
    }

    /// Latest timeline predictions.
    pub fn get_timelines(&self) -> Reading<TimelineSet> {
        self.inner.cache.timelines()
    }

    /// Latest producer statistics.
    pub fn get_stats(&self) -> Reading<ProducerStats> {
        self.inner.cache.stats()
    }

    /// Latest producer status.
    pub fn get_status(&self) -> Reading<ProducerStatus> {
        self.inner.cache.status()
    }

    /// Send a command and block until acknowledged or timed out.
    ///
    /// `timeout` defaults to `command.default_timeout`.
    pub fn send_command(
        &self,
        command_type: CommandType,
        data: Value,
        timeout: Option<Duration>,
    ) -> IpcResult<CommandAck> {
        let timeout = timeout.unwrap_or(self.inner.config.command.default_timeout);
        self.inner.commands.send(command_type, data, timeout)
    }

    /// Async variant of [`send_command`](Self::send_command).
    pub async fn send_command_async(
        &self,
        command_type: CommandType,
        data: Value,
        timeout: Option<Duration>,
    ) -> IpcResult<CommandAck> {
        let timeout = timeout.unwrap_or(self.inner.config.command.default_timeout);
        self.inner
            .commands
            .send_async(command_type, data, timeout)
            .await
    }

    /// Recompute producer health from scratch.
    ///
    /// Performs one detections read and one status read through the cache,
    /// and one ping bounded by `command.ping_timeout`.
    pub fn health_check(&self) -> HealthReport {
        let cache = &self.inner.cache;

        let detections = cache.detections();
        let now_ms = cache.clock().now_ms();
        let detections_age = detections
            .value()
            .and_then(Timestamped::timestamp_ms)
            .map(|ts| Duration::from_millis(now_ms.saturating_sub(ts)));
        let data_fresh = detections_age.is_some_and(|age| age <= cache.detections_window());

        let shm_or_snapshot_accessible = cache.any_shm_attached()
            || cache.status_snapshot_readable()
            || cache.detections_snapshot_readable();

        let producer_responsive = self
            .inner
            .commands
            .ping(self.inner.config.command.ping_timeout);

        let producer_state = cache.status().into_value().map(|status| status.status);

        let report = HealthReport::new(
            HealthSignals {
                shm_or_snapshot_accessible,
                data_fresh,
                producer_responsive,
            },
            producer_state,
            detections_age,
        );
        tracing::debug!(
            status = %report.status,
            accessible = shm_or_snapshot_accessible,
            fresh = data_fresh,
            responsive = producer_responsive,
            "Health check"
        );
        report
    }

    /// Per-category read counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.cache_stats()
    }
}
