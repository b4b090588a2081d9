//! Command/acknowledgment channel to the producer.
//!
//! Requests are single JSON lines `{type, request_id, timestamp, data}` written
//! to the producer's command pipe. The producer appends acknowledgments
//! `{request_id, status, timestamp, message}` to an ack file, which this side
//! polls for the matching `request_id`.
//!
//! # Concurrency
//!
//! One outstanding command per caller is the supported pattern. Scanning is
//! non-destructive, so acks addressed to other requests are left in place,
//! but concurrent senders sharing one ack file are not demultiplexed beyond
//! that and the producer may truncate the file at any time.
//!
//! A request abandoned on timeout is not retracted; the producer may still
//! act on it.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config::IpcConfig;
use crate::error::{IpcError, IpcResult};

/// Directives understood by the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandType {
    /// Liveness probe
    Ping,
    /// Apply a configuration change
    ConfigUpdate,
    /// Recompute timeline predictions now
    RefreshTimelines,
    /// Synchronize with swarm neighbors
    SyncSwarm,
    /// Stop the producer
    Shutdown,
}

impl CommandType {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            CommandType::Ping => "PING",
            CommandType::ConfigUpdate => "CONFIG_UPDATE",
            CommandType::RefreshTimelines => "REFRESH_TIMELINES",
            CommandType::SyncSwarm => "SYNC_SWARM",
            CommandType::Shutdown => "SHUTDOWN",
        }
    }
}

impl std::fmt::Display for CommandType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "PING" => Ok(CommandType::Ping),
            "CONFIG_UPDATE" => Ok(CommandType::ConfigUpdate),
            "REFRESH_TIMELINES" => Ok(CommandType::RefreshTimelines),
            "SYNC_SWARM" => Ok(CommandType::SyncSwarm),
            "SHUTDOWN" => Ok(CommandType::Shutdown),
            other => Err(format!("unknown command type '{}'", other)),
        }
    }
}

/// Outbound request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Directive
    #[serde(rename = "type")]
    pub command_type: CommandType,
    /// Correlation id
    pub request_id: String,
    /// Send time, milliseconds since epoch
    pub timestamp: u64,
    /// Command-specific payload
    #[serde(default)]
    pub data: Value,
}

impl CommandRequest {
    /// New request with a fresh UUID v4 correlation id.
    pub fn new(command_type: CommandType, data: Value) -> Self {
        Self {
            command_type,
            request_id: Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().timestamp_millis().max(0) as u64,
            data,
        }
    }
}

/// Outcome reported by the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    /// Command applied
    Success,
    /// Command rejected or failed
    Error,
    /// Any other status string
    #[serde(other)]
    Unknown,
}

/// Inbound acknowledgment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandAck {
    /// Correlation id of the request being acknowledged
    pub request_id: String,
    /// Outcome
    pub status: AckStatus,
    /// Producer time, milliseconds since epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    /// Optional human-readable detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CommandAck {
    /// Whether the producer reported success.
    pub fn is_success(&self) -> bool {
        self.status == AckStatus::Success
    }
}

/// Outbound transport: accepts one serialized request line at a time.
pub trait CommandSink: Send {
    /// Deliver one line (without trailing newline).
    fn send_line(&mut self, line: &str) -> IpcResult<()>;
}

/// Inbound transport: a non-destructive, position-addressed ack log.
pub trait AckSource: Send + Sync {
    /// Current end of the log. Acks for a request sent now appear after it.
    fn position(&self) -> IpcResult<u64>;

    /// Find the ack for `request_id` at or after `from`, without consuming
    /// anything.
    fn find_since(&self, from: u64, request_id: &str) -> IpcResult<Option<CommandAck>>;
}

/// Writes requests to the producer's command pipe (or a regular file).
///
/// The path is opened for each request write-only, append and non-blocking,
/// so a FIFO with no reader fails at once instead of blocking. It is never
/// created from this side.
#[derive(Debug, Clone)]
pub struct FileCommandSink {
    path: PathBuf,
}

impl FileCommandSink {
    /// Sink writing to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn open(&self) -> IpcResult<File> {
        let mut options = OpenOptions::new();
        options.append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.custom_flags(libc::O_NONBLOCK);
        }
        options.open(&self.path).map_err(|e| {
            let unavailable = e.kind() == ErrorKind::NotFound;
            #[cfg(unix)]
            let unavailable = unavailable || e.raw_os_error() == Some(libc::ENXIO);
            if unavailable {
                IpcError::unavailable("command pipe", &self.path, e)
            } else {
                IpcError::Io(e)
            }
        })
    }
}

impl CommandSink for FileCommandSink {
    fn send_line(&mut self, line: &str) -> IpcResult<()> {
        let mut file = self.open()?;
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        file.write_all(&buf)?;
        Ok(())
    }
}

/// Reads acknowledgments appended to a file by the producer.
#[derive(Debug, Clone)]
pub struct FileAckSource {
    path: PathBuf,
}

impl FileAckSource {
    /// Source reading `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Ack file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AckSource for FileAckSource {
    fn position(&self) -> IpcResult<u64> {
        match std::fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn find_since(&self, from: u64, request_id: &str) -> IpcResult<Option<CommandAck>> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        // A shorter file means the producer truncated or rotated it.
        let len = file.metadata()?.len();
        let from = if len < from { 0 } else { from };
        file.seek(SeekFrom::Start(from))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        Ok(contents
            .lines()
            .filter_map(|line| serde_json::from_str::<CommandAck>(line.trim()).ok())
            .find(|ack| ack.request_id == request_id))
    }
}

/// Sends commands and waits for their acknowledgments.
pub struct CommandChannel {
    sink: Mutex<Box<dyn CommandSink>>,
    acks: Box<dyn AckSource>,
    poll_interval: Duration,
}

impl std::fmt::Debug for CommandChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandChannel")
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl CommandChannel {
    /// Channel over arbitrary transports.
    pub fn new(
        sink: impl CommandSink + 'static,
        acks: impl AckSource + 'static,
        poll_interval: Duration,
    ) -> Self {
        Self {
            sink: Mutex::new(Box::new(sink)),
            acks: Box::new(acks),
            poll_interval,
        }
    }

    /// Channel over the command pipe and ack file named in `config`.
    pub fn from_config(config: &IpcConfig) -> Self {
        Self::new(
            FileCommandSink::new(&config.paths.command_path),
            FileAckSource::new(&config.paths.ack_path),
            config.command.poll_interval,
        )
    }

    /// Write a request and return it with the ack-log position to scan from.
    fn submit(&self, command_type: CommandType, data: Value) -> IpcResult<(CommandRequest, u64)> {
        let request = CommandRequest::new(command_type, data);
        // Record the position first so an ack written immediately is not missed.
        let from = self.acks.position()?;
        let line = serde_json::to_string(&request)?;
        self.sink.lock().send_line(&line)?;
        tracing::debug!(
            command = %command_type,
            request_id = %request.request_id,
            "Sent command"
        );
        Ok((request, from))
    }

    fn check(&self, from: u64, request_id: &str) -> Option<CommandAck> {
        match self.acks.find_since(from, request_id) {
            Ok(found) => found,
            Err(err) => {
                tracing::debug!(error = %err, "Ack log not readable yet");
                None
            }
        }
    }

    fn timed_out(request: &CommandRequest, waited: Duration) -> IpcError {
        tracing::warn!(
            command = %request.command_type,
            request_id = %request.request_id,
            waited_ms = waited.as_millis() as u64,
            "Command timed out waiting for acknowledgment"
        );
        IpcError::Timeout {
            request_id: request.request_id.clone(),
            waited,
        }
    }

    /// Send a command and block, polling every `poll_interval`, until its ack
    /// arrives or `timeout` elapses.
    ///
    /// An ack with status `error` is still `Ok`; check
    /// [`CommandAck::is_success`]. A timeout is [`IpcError::Timeout`] and is
    /// not retried.
    pub fn send(
        &self,
        command_type: CommandType,
        data: Value,
        timeout: Duration,
    ) -> IpcResult<CommandAck> {
        let (request, from) = self.submit(command_type, data)?;
        let started = Instant::now();
        loop {
            if let Some(ack) = self.check(from, &request.request_id) {
                return Ok(ack);
            }
            let waited = started.elapsed();
            if waited >= timeout {
                return Err(Self::timed_out(&request, waited));
            }
            std::thread::sleep(self.poll_interval.min(timeout - waited));
        }
    }

    /// [`send`](Self::send) for async callers; waits with `tokio::time::sleep`
    /// instead of blocking the thread.
    pub async fn send_async(
        &self,
        command_type: CommandType,
        data: Value,
        timeout: Duration,
    ) -> IpcResult<CommandAck> {
        let (request, from) = self.submit(command_type, data)?;
        let started = Instant::now();
        loop {
            if let Some(ack) = self.check(from, &request.request_id) {
                return Ok(ack);
            }
            let waited = started.elapsed();
            if waited >= timeout {
                return Err(Self::timed_out(&request, waited));
            }
            tokio::time::sleep(self.poll_interval.min(timeout - waited)).await;
        }
    }

    /// Whether the producer acknowledges a `PING` within `timeout`.
    pub fn ping(&self, timeout: Duration) -> bool {
        match self.send(CommandType::Ping, Value::Null, timeout) {
            Ok(_) => true,
            Err(err) => {
                tracing::debug!(error = %err, "Ping failed");
                false
            }
        }
    }
}
