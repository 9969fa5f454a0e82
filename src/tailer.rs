//! Active log file tailer
//!
//! Poll-based follower with durable position tracking. Rotation is detected
//! by an inode change, copytruncate by a size regression at the same inode;
//! both restart the read at offset zero. Only complete (newline-terminated)
//! lines are emitted; a trailing partial line waits for the next tick.

use std::io::{self, SeekFrom};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::db::{FilePosition, Store};
use crate::metrics::{self, SharedMetrics};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// How long one enqueue may block before the line is dropped
const EMIT_TIMEOUT: Duration = Duration::from_secs(5);
/// Upper bound on a single line; longer lines fail the scan for the tick
const MAX_LINE_BYTES: usize = 1024 * 1024;

pub struct Tailer {
    path: String,
    store: Store,
    metrics: SharedMetrics,
    interval: Duration,
}

impl Tailer {
    pub fn new(path: String, store: Store, metrics: SharedMetrics) -> Self {
        Self {
            path,
            store,
            metrics,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Polls the file once per tick until cancelled. Transient tick errors
    /// (missing file, scan failure) are logged and retried next tick.
    pub async fn run(self, token: CancellationToken, lines: mpsc::Sender<String>) -> Result<()> {
        let mut saved = self
            .store
            .load_position(&self.path)
            .await
            .context("loading tail position")?;
        info!(
            path = %self.path,
            offset = saved.offset,
            inode = saved.inode,
            "tailer starting"
        );

        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("tailer stopping");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.process_tick(&token, &lines, saved).await {
                        warn!(error = %e, "tailer tick failed");
                        continue;
                    }
                    if let Ok(pos) = self.store.load_position(&self.path).await {
                        saved = pos;
                    }
                }
            }
        }
    }

    /// One poll iteration: stat, decide the start offset, read complete
    /// lines to EOF, persist the new position.
    async fn process_tick(
        &self,
        token: &CancellationToken,
        lines: &mpsc::Sender<String>,
        saved: FilePosition,
    ) -> Result<()> {
        let meta = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // Not created yet; keep waiting
                return Ok(());
            }
            Err(e) => return Err(e).context("stat failed"),
        };

        let current_inode = file_identity(&meta);
        let current_size = meta.len() as i64;

        let start_offset = if current_inode != saved.inode {
            info!(
                old = saved.inode,
                new = current_inode,
                "rotation detected, starting from beginning"
            );
            0
        } else if current_size < saved.offset {
            info!(
                size = current_size,
                offset = saved.offset,
                "copytruncate detected, starting from beginning"
            );
            0
        } else {
            saved.offset
        };

        if start_offset >= current_size {
            return Ok(());
        }

        // Open per tick so no descriptor outlives a rotation
        let file = tokio::fs::File::open(&self.path)
            .await
            .context("opening log file")?;
        let mut reader = BufReader::new(file);
        reader
            .seek(SeekFrom::Start(start_offset as u64))
            .await
            .with_context(|| format!("seeking to offset {start_offset}"))?;

        let mut offset = start_offset;
        let mut emitted = 0usize;

        while let Some((line, len)) = read_complete_line(&mut reader).await? {
            if line.is_empty() {
                offset += len as i64;
                continue;
            }

            let delivered = tokio::select! {
                _ = token.cancelled() => break,
                res = tokio::time::timeout(EMIT_TIMEOUT, lines.send(line)) => match res {
                    Ok(Ok(())) => true,
                    Ok(Err(_)) => {
                        // Receiver gone; nothing downstream to feed
                        warn!("line channel closed, stopping scan");
                        break;
                    }
                    Err(_) => {
                        warn!("line channel blocked, dropping line");
                        metrics::incr(&self.metrics.enqueue_drops);
                        false
                    }
                }
            };

            // A dropped line still advances the offset so one slow consumer
            // cannot wedge the tailer on the same line forever
            offset += len as i64;
            if delivered {
                emitted += 1;
            }
        }

        if emitted > 0 {
            debug!(lines = emitted, offset, "tailer processed lines");
        }
        self.store
            .save_position(
                &self.path,
                FilePosition {
                    offset,
                    inode: current_inode,
                    size: current_size,
                },
            )
            .await
            .context("saving tail position")?;

        Ok(())
    }
}

/// Reads one newline-terminated line, returning it without the newline plus
/// the number of bytes consumed. `None` at EOF; a trailing fragment without
/// a newline is left unconsumed for a later tick. Lines over the cap error.
async fn read_complete_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> io::Result<Option<(String, usize)>> {
    let mut buf: Vec<u8> = Vec::new();

    loop {
        let (complete, used) = {
            let chunk = reader.fill_buf().await?;
            if chunk.is_empty() {
                return Ok(None);
            }
            match chunk.iter().position(|&b| b == b'\n') {
                Some(idx) => {
                    buf.extend_from_slice(&chunk[..idx]);
                    (true, idx + 1)
                }
                None => {
                    buf.extend_from_slice(chunk);
                    (false, chunk.len())
                }
            }
        };
        reader.consume(used);

        if buf.len() > MAX_LINE_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "line exceeds 1 MiB buffer",
            ));
        }
        if complete {
            let consumed = buf.len() + 1;
            return Ok(Some((String::from_utf8_lossy(&buf).into_owned(), consumed)));
        }
    }
}

/// File identity token for rotation detection: the inode on POSIX. Replaced
/// files get a new identity, in-place truncation keeps it.
#[cfg(unix)]
fn file_identity(meta: &std::fs::Metadata) -> i64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino() as i64
}

#[cfg(not(unix))]
fn file_identity(_meta: &std::fs::Metadata) -> i64 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::IngestMetrics;
    use std::fs;
    use std::io::Write;

    async fn test_store() -> Store {
        let store = Store::open(":memory:").await.unwrap();
        store.run_migrations().await.unwrap();
        store
    }

    async fn tick_and_collect(tailer: &Tailer, saved: FilePosition) -> Vec<String> {
        let token = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(100);
        tailer.process_tick(&token, &tx, saved).await.unwrap();
        drop(tx);
        let mut out = Vec::new();
        while let Some(line) = rx.recv().await {
            out.push(line);
        }
        out
    }

    fn tailer_for(path: &std::path::Path, store: Store) -> Tailer {
        Tailer::new(
            path.to_str().unwrap().to_string(),
            store,
            IngestMetrics::new(),
        )
    }

    #[tokio::test]
    async fn reads_new_lines_and_persists_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        fs::write(&path, "line one\nline two\n\nline three\n").unwrap();

        let store = test_store().await;
        let tailer = tailer_for(&path, store.clone());

        let lines = tick_and_collect(&tailer, FilePosition::default()).await;
        assert_eq!(lines, vec!["line one", "line two", "line three"]);

        let pos = tailer.store.load_position(&tailer.path).await.unwrap();
        assert_eq!(pos.offset, 30); // full file including the blank line
        assert!(pos.inode != 0);

        // Nothing new: second tick emits nothing
        let lines = tick_and_collect(&tailer, pos).await;
        assert!(lines.is_empty());
    }

    #[tokio::test]
    async fn missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.log");
        let store = test_store().await;
        let tailer = tailer_for(&path, store);

        let lines = tick_and_collect(&tailer, FilePosition::default()).await;
        assert!(lines.is_empty());
    }

    #[tokio::test]
    async fn rotation_yields_only_new_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        fs::write(&path, "old one\nold two\nold three\n").unwrap();

        let store = test_store().await;
        let tailer = tailer_for(&path, store.clone());

        let first = tick_and_collect(&tailer, FilePosition::default()).await;
        assert_eq!(first.len(), 3);
        let saved = store.load_position(&tailer.path).await.unwrap();

        // rename + create: the new file has a different inode
        fs::rename(&path, dir.path().join("access.log.1")).unwrap();
        fs::write(&path, "new one\nnew two\n").unwrap();

        let second = tick_and_collect(&tailer, saved).await;
        assert_eq!(second, vec!["new one", "new two"]);
    }

    #[tokio::test]
    async fn copytruncate_yields_only_new_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        fs::write(&path, "old one\nold two\nold three and some padding\n").unwrap();

        let store = test_store().await;
        let tailer = tailer_for(&path, store.clone());

        let first = tick_and_collect(&tailer, FilePosition::default()).await;
        assert_eq!(first.len(), 3);
        let saved = store.load_position(&tailer.path).await.unwrap();

        // truncate in place: same inode, smaller size than the saved offset
        fs::write(&path, "fresh one\nfresh two\n").unwrap();
        let meta = fs::metadata(&path).unwrap();
        assert!((meta.len() as i64) < saved.offset);

        let second = tick_and_collect(&tailer, saved).await;
        assert_eq!(second, vec!["fresh one", "fresh two"]);
    }

    #[tokio::test]
    async fn partial_trailing_line_waits_for_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        fs::write(&path, "complete\npartial without newline").unwrap();

        let store = test_store().await;
        let tailer = tailer_for(&path, store.clone());

        let lines = tick_and_collect(&tailer, FilePosition::default()).await;
        assert_eq!(lines, vec!["complete"]);
        let saved = store.load_position(&tailer.path).await.unwrap();
        assert_eq!(saved.offset, 9); // only the terminated line is consumed

        // complete the line; the next tick picks up the whole of it
        let mut f = fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(f).unwrap();
        drop(f);

        let lines = tick_and_collect(&tailer, saved).await;
        assert_eq!(lines, vec!["partial without newline"]);
    }

    #[tokio::test]
    async fn oversized_line_fails_the_tick() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(&vec![b'x'; MAX_LINE_BYTES + 10]).unwrap();
        f.write_all(b"\n").unwrap();
        drop(f);

        let store = test_store().await;
        let tailer = tailer_for(&path, store);
        let token = CancellationToken::new();
        let (tx, _rx) = mpsc::channel(100);

        let err = tailer
            .process_tick(&token, &tx, FilePosition::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("1 MiB") || format!("{err:#}").contains("1 MiB"));
    }
}
