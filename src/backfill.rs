//! Startup import of rotated log files
//!
//! Scans for `access.log.N` / `access.log.N.gz` siblings, streams any not
//! yet imported into a dedicated aggregator (oldest first, i.e. highest N),
//! and marks each file's log_position row with offset == size when done.
//! Runs to completion before the live tailer starts, so one run never
//! processes the same bytes twice.

use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::aggregator::{Aggregator, LINE_CHANNEL_CAPACITY};
use crate::db::{FilePosition, Store};
use crate::metrics::SharedMetrics;
use crate::parser::Parser;

const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Imports pending rotated siblings of `log_path`. Any failure aborts the
/// whole run after the dedicated aggregator has flushed what it already
/// consumed; the next startup retries the remaining files.
pub async fn run(
    store: &Store,
    log_path: &str,
    parser: &Parser,
    metrics: &SharedMetrics,
    token: &CancellationToken,
) -> Result<()> {
    let active = Path::new(log_path);
    let dir = active.parent().unwrap_or_else(|| Path::new("."));
    let base = active
        .file_name()
        .and_then(|n| n.to_str())
        .context("log path has no file name")?;

    let rotated = find_rotated_files(dir, base)?;

    let mut pending = Vec::new();
    for file in rotated {
        if !is_imported(store, &file.path).await? {
            pending.push(file);
        }
    }

    if pending.is_empty() {
        return Ok(());
    }
    info!(files = pending.len(), "backfill: rotated file(s) to import");

    // Dedicated channel + aggregator so backfill pressure never touches
    // the live stream
    let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
    let agg = Aggregator::new(
        store.clone(),
        parser.clone(),
        None,
        metrics.clone(),
    );
    let agg_handle = tokio::spawn(agg.run(token.clone(), rx));

    let mut import_err = None;
    for file in pending {
        if token.is_cancelled() {
            import_err = Some(anyhow::anyhow!("backfill cancelled"));
            break;
        }

        info!(path = %file.path.display(), "backfill: importing");
        match stream_file(&file.path, &tx, token).await {
            Ok(count) => {
                info!(path = %file.path.display(), lines = count, "backfill: file read");
            }
            Err(e) => {
                import_err = Some(e.context(format!("processing {}", file.path.display())));
                break;
            }
        }

        let size = match tokio::fs::metadata(&file.path).await {
            Ok(meta) => meta.len() as i64,
            Err(e) => {
                import_err = Some(anyhow::Error::new(e).context("stat rotated file"));
                break;
            }
        };
        if let Err(e) = mark_imported(store, &file.path, size).await {
            import_err = Some(e);
            break;
        }
    }

    // Close the channel and wait for the final flush to commit before the
    // tailer is allowed to start
    drop(tx);
    agg_handle.await.context("joining backfill aggregator")?;

    match import_err {
        Some(e) => Err(e),
        None => {
            info!("backfill: complete");
            Ok(())
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct RotatedFile {
    path: PathBuf,
    num: u32,
}

/// Lists `{base}.{N}` and `{base}.{N}.gz` entries in `dir`, sorted by N
/// descending (logrotate numbers upward with age, so highest N is oldest).
fn find_rotated_files(dir: &Path, base: &str) -> Result<Vec<RotatedFile>> {
    let prefix = format!("{base}.");
    let mut files = Vec::new();

    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("reading directory {}", dir.display()))?;
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(suffix) = name.strip_prefix(&prefix) else {
            continue;
        };

        let suffix = suffix.strip_suffix(".gz").unwrap_or(suffix);
        let Ok(num) = suffix.parse::<u32>() else {
            continue;
        };

        files.push(RotatedFile {
            path: dir.join(name),
            num,
        });
    }

    files.sort_by(|a, b| b.num.cmp(&a.num));
    Ok(files)
}

/// A rotated file counts as imported once its log_position row records a
/// completed pass: offset == size > 0.
async fn is_imported(store: &Store, path: &Path) -> Result<bool> {
    let pos = store.load_position(&path.to_string_lossy()).await?;
    Ok(pos.offset == pos.size && pos.size > 0)
}

async fn mark_imported(store: &Store, path: &Path, size: i64) -> Result<()> {
    store
        .save_position(
            &path.to_string_lossy(),
            FilePosition {
                offset: size,
                inode: 0,
                size,
            },
        )
        .await
        .with_context(|| format!("marking {} as imported", path.display()))
}

/// Reads a whole file (gzip-decoding by extension) on a blocking thread,
/// sending non-empty lines into the backfill channel. Returns the line
/// count.
async fn stream_file(
    path: &Path,
    tx: &mpsc::Sender<String>,
    token: &CancellationToken,
) -> Result<usize> {
    let path = path.to_path_buf();
    let tx = tx.clone();
    let token = token.clone();

    tokio::task::spawn_blocking(move || read_lines_into(&path, &tx, &token))
        .await
        .context("backfill reader panicked")?
}

fn read_lines_into(
    path: &Path,
    tx: &mpsc::Sender<String>,
    token: &CancellationToken,
) -> Result<usize> {
    let file = std::fs::File::open(path)?;
    let mut reader: Box<dyn BufRead + Send> = if path.extension().is_some_and(|e| e == "gz") {
        Box::new(BufReader::new(GzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    let mut count = 0usize;
    let mut buf = Vec::new();
    while read_capped_line(&mut reader, &mut buf)? {
        if buf.is_empty() {
            continue;
        }
        if token.is_cancelled() {
            bail!("cancelled");
        }
        let line = String::from_utf8_lossy(&buf).into_owned();
        if tx.blocking_send(line).is_err() {
            bail!("backfill aggregator stopped");
        }
        count += 1;
    }
    Ok(count)
}

/// Reads one line (newline stripped) into `buf`, enforcing the 1 MiB cap.
/// Returns false at EOF. A final line without a trailing newline is still
/// returned; rotated files are complete by definition.
fn read_capped_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> Result<bool> {
    buf.clear();
    let limit = (MAX_LINE_BYTES + 2) as u64;
    let n = reader.by_ref().take(limit).read_until(b'\n', buf)?;
    if n == 0 {
        return Ok(false);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
    }
    if buf.len() > MAX_LINE_BYTES {
        return Err(anyhow::Error::new(io::Error::new(
            io::ErrorKind::InvalidData,
            "line exceeds 1 MiB buffer",
        )));
    }
    Ok(true)
}
