//! # OMNISIGHT IPC
//!
//! Consumer side of the data plane between the OMNISIGHT perception core (the
//! producer, a separate process) and its API tier. The producer publishes
//! detections, tracked objects and timeline predictions through shared memory
//! and mirrors everything, plus stats and status, into JSON snapshot files.
//! Commands travel the other way over a named pipe and are acknowledged
//! through an append-only file.
//!
//! ## Crate Structure
//!
//! - **`frame`**: Binary frame layout shared with the producer. Header
//!   validation, CRC32 checksums and fixed-size record codecs.
//! - **`shm`**: Memory-mapped regions and readiness signals (POSIX named
//!   semaphores). Requires the default `shm` feature.
//! - **`snapshot`**: JSON snapshot files with timestamp-based staleness, and the
//!   [`Clock`](snapshot::Clock) abstraction used for it.
//! - **`cache`**: The freshness cache. Every read goes shared memory, then
//!   snapshot, then last known good value, and returns a [`Reading`].
//! - **`command`**: Correlated request/acknowledgment over the command pipe.
//! - **`health`**: Tri-state health classification from three signals.
//! - **`client`**: [`IpcClient`], the facade request handlers use.
//! - **`config`**: Figment-based configuration (defaults, TOML, environment).
//! - **`tracing_setup`**: Subscriber installation for binaries and tests.
//! - **`sim`**: A stand-in producer for tests and local demos.
//! - **`types`**: Domain records and their JSON shapes.
//! - **`error`**: [`IpcError`] and [`IpcResult`].
//!
//! ## Example
//! ```no_run
//! use omnisight_ipc::{CommandType, IpcClient, IpcConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = IpcClient::new(IpcConfig::load()?);
//! println!("{:?}", client.health_check().status);
//!
//! let ack = client.send_command(CommandType::Ping, serde_json::json!({}), None)?;
//! assert!(ack.is_success());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod client;
pub mod command;
pub mod config;
pub mod error;
pub mod frame;
pub mod health;
#[cfg(feature = "shm")]
pub mod shm;
pub mod sim;
pub mod snapshot;
pub mod tracing_setup;
pub mod types;

pub use cache::{CacheStats, FreshnessCache, Reading, Source};
pub use client::IpcClient;
pub use command::{AckStatus, CommandAck, CommandChannel, CommandRequest, CommandType};
pub use config::IpcConfig;
pub use error::{IpcError, IpcResult};
pub use health::{HealthReport, HealthStatus};
pub use types::{DetectionSet, ProducerStats, ProducerStatus, TimelineSet, TrackSet};
