//! Per-run log files written by the client.
//!
//! A run produces three append-only files in the output directory, all named
//! after the minute the run started:
//!
//! ```text
//! channel_1_2024-05-01_14_03.txt   Channel 1 - 2024-05-01_14_03
//! channel_2_2024-05-01_14_03.txt   Channel 2 - 2024-05-01_14_03
//! client_logs_2024-05-01_14_03.txt Started @ 2024-05-01_14_03
//! ```
//!
//! Each file is owned by one writer task fed through an unbounded queue, so
//! appends from any task land in submission order and never interleave.

use crate::error::ScopeResult;
use crate::instrument::Channel;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

/// Run start time, rendered `YYYY-MM-DD_HH_MM`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStamp(String);

impl RunStamp {
    pub fn now() -> Self {
        Self::from_time(&Local::now())
    }

    pub fn from_time(time: &DateTime<Local>) -> Self {
        RunStamp(time.format("%Y-%m-%d_%H_%M").to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunStamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

enum WriteOp {
    Append(String),
    Sync(oneshot::Sender<()>),
}

/// Single-writer queue in front of one file.
struct FileWriter {
    path: PathBuf,
    queue: mpsc::UnboundedSender<WriteOp>,
}

impl FileWriter {
    /// Open (or create) `path` for appending. `header` is written only when the
    /// file is new.
    async fn open(path: PathBuf, header: String) -> ScopeResult<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        if file.metadata().await?.len() == 0 {
            file.write_all(format!("{}\n", header).as_bytes()).await?;
            file.flush().await?;
        }

        let (queue, mut ops) = mpsc::unbounded_channel::<WriteOp>();
        let task_path = path.clone();
        tokio::spawn(async move {
            while let Some(op) = ops.recv().await {
                match op {
                    WriteOp::Append(line) => {
                        if let Err(e) = file.write_all(line.as_bytes()).await {
                            error!(path = %task_path.display(), error = %e, "Run log write failed");
                        }
                    }
                    WriteOp::Sync(done) => {
                        if let Err(e) = file.flush().await {
                            error!(path = %task_path.display(), error = %e, "Run log flush failed");
                        }
                        let _ = done.send(());
                    }
                }
            }
            let _ = file.flush().await;
            debug!(path = %task_path.display(), "Run log writer finished");
        });

        Ok(Self { path, queue })
    }

    fn append(&self, line: String) {
        if self.queue.send(WriteOp::Append(line)).is_err() {
            error!(path = %self.path.display(), "Run log writer is gone");
        }
    }

    async fn sync(&self) {
        let (tx, rx) = oneshot::channel();
        if self.queue.send(WriteOp::Sync(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

struct RunLogInner {
    channels: [FileWriter; 2],
    audit: FileWriter,
}

/// Handle to the current run's files. Cheap to clone.
#[derive(Clone)]
pub struct RunLog {
    inner: Arc<RunLogInner>,
}

impl RunLog {
    /// Start a run stamped with the current local time.
    pub async fn create(dir: impl AsRef<Path>) -> ScopeResult<Self> {
        Self::create_with_stamp(dir, RunStamp::now()).await
    }

    pub async fn create_with_stamp(dir: impl AsRef<Path>, stamp: RunStamp) -> ScopeResult<Self> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await?;

        let c1 = Self::open_channel(dir, Channel::C1, &stamp).await?;
        let c2 = Self::open_channel(dir, Channel::C2, &stamp).await?;
        let audit = FileWriter::open(
            dir.join(format!("client_logs_{}.txt", stamp)),
            format!("Started @ {}", stamp),
        )
        .await?;

        Ok(Self {
            inner: Arc::new(RunLogInner {
                channels: [c1, c2],
                audit,
            }),
        })
    }

    async fn open_channel(dir: &Path, channel: Channel, stamp: &RunStamp) -> ScopeResult<FileWriter> {
        let n = channel.number();
        FileWriter::open(
            dir.join(format!("channel_{}_{}.txt", n, stamp)),
            format!("Channel {} - {}", n, stamp),
        )
        .await
    }

    fn channel_writer(&self, channel: Channel) -> &FileWriter {
        match channel {
            Channel::C1 => &self.inner.channels[0],
            Channel::C2 => &self.inner.channels[1],
        }
    }

    pub fn channel_path(&self, channel: Channel) -> &Path {
        &self.channel_writer(channel).path
    }

    pub fn audit_path(&self) -> &Path {
        &self.inner.audit.path
    }

    /// Queue one raw measurement payload for `channel`'s file.
    pub fn append_measurement(&self, channel: Channel, payload: &str) {
        self.channel_writer(channel).append(format!("{}\n", payload));
    }

    /// Queue a timestamped audit entry for an outbound command.
    pub fn append_audit(&self, command: &str) {
        let at = Local::now().format("%Y-%m-%d_%H:%M:%S");
        self.inner.audit.append(format!("[{}]: {}\n", at, command));
    }

    /// Wait until every append queued so far has been written.
    pub async fn sync(&self) {
        for writer in self.inner.channels.iter().chain(std::iter::once(&self.inner.audit)) {
            writer.sync().await;
        }
    }
}
