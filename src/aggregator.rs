//! Line aggregation
//!
//! Consumes raw log lines from a channel, parses and classifies them, and
//! accumulates per-hour counters in memory. The buffers are swapped out
//! wholesale and committed to the store in one transaction on a timer, on a
//! size threshold, on channel close, and once on cancellation.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use url::Url;

use crate::classify::{
    self, classify_browser, classify_os, classify_traffic, classify_ua_category, TrafficClass,
};
use crate::db::{AggregateBatch, DimKey, RequestKey, RequestTotals, Store, VisitorKey};
use crate::geoip::SharedGeoIp;
use crate::metrics::{self, SharedMetrics};
use crate::parser::{hour_bucket, LogEntry, Parser};

/// Capacity of the bounded line channels feeding each aggregator
pub const LINE_CHANNEL_CAPACITY: usize = 10_000;

const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);
const BUFFER_SIZE_THRESHOLD: usize = 1000;

/// Router label stored for requests that matched no router
pub const UNROUTED: &str = "unrouted";

pub struct Aggregator {
    store: Store,
    parser: Parser,
    geoip: Option<SharedGeoIp>,
    metrics: SharedMetrics,
    flush_interval: Duration,
    /// Random per-process salt for visitor IP hashing; never persisted
    ip_salt: String,
    batch: AggregateBatch,
}

impl Aggregator {
    pub fn new(
        store: Store,
        parser: Parser,
        geoip: Option<SharedGeoIp>,
        metrics: SharedMetrics,
    ) -> Self {
        let salt_bytes: [u8; 16] = rand::random();
        Self {
            store,
            parser,
            geoip,
            metrics,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            ip_salt: hex::encode(salt_bytes),
            batch: AggregateBatch::default(),
        }
    }

    /// Processes lines until the channel closes or the token fires, then
    /// flushes one final time. Flush errors are logged and counted, never
    /// propagated: the swapped-out batch is discarded and ingestion
    /// continues.
    pub async fn run(mut self, token: CancellationToken, mut lines: mpsc::Receiver<String>) {
        let start = tokio::time::Instant::now() + self.flush_interval;
        let mut ticker = tokio::time::interval_at(start, self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    self.flush().await;
                    return;
                }
                _ = ticker.tick() => {
                    self.flush().await;
                }
                line = lines.recv() => {
                    match line {
                        None => {
                            self.flush().await;
                            return;
                        }
                        Some(line) => {
                            self.ingest(&line);
                            if self.batch.entries >= BUFFER_SIZE_THRESHOLD {
                                self.flush().await;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Parses one raw line and accumulates it. A line that fails to parse
    /// is counted and dropped; bad input must never stall ingestion.
    fn ingest(&mut self, line: &str) {
        metrics::incr(&self.metrics.lines_ingested);

        match self.parser.parse_line(line) {
            Ok(entry) => self.accumulate(&entry),
            Err(e) => {
                warn!(error = %e, "skipping unparseable line");
                metrics::incr(&self.metrics.parse_errors);
            }
        }
    }

    fn accumulate(&mut self, entry: &LogEntry) {
        let router = if entry.router.is_empty() {
            UNROUTED
        } else {
            entry.router.as_str()
        };
        let hour = hour_bucket(&entry.timestamp);

        let totals = self
            .batch
            .requests
            .entry(RequestKey {
                hour: hour.clone(),
                router: router.to_string(),
                path: entry.path.clone(),
                method: entry.method.clone(),
                status: entry.status,
            })
            .or_default();
        totals.count += 1;
        totals.bytes += entry.bytes;
        totals.duration_ms += entry.duration_ms;

        // Unique visitors per hour per router; bots and unrouted probes
        // are excluded
        if classify_traffic(entry) == TrafficClass::Human {
            self.batch.visitors.insert(VisitorKey {
                hour: hour.clone(),
                router: router.to_string(),
                ip_hash: hash_ip(&entry.ip, &self.ip_salt),
            });
        }

        if !entry.referer.is_empty() {
            if let Some(host) = referrer_host(&entry.referer) {
                *self
                    .batch
                    .referrers
                    .entry(DimKey::new(&hour, router, host))
                    .or_insert(0) += 1;
            }
        }

        *self
            .batch
            .user_agents
            .entry(DimKey::new(&hour, router, classify_ua_category(&entry.user_agent)))
            .or_insert(0) += 1;

        *self
            .batch
            .browsers
            .entry(DimKey::new(&hour, router, classify_browser(&entry.user_agent)))
            .or_insert(0) += 1;

        *self
            .batch
            .os_stats
            .entry(DimKey::new(&hour, router, classify_os(&entry.user_agent)))
            .or_insert(0) += 1;

        *self
            .batch
            .duration_hist
            .entry(DimKey::new(&hour, router, classify::duration_bucket(entry.duration_ms)))
            .or_insert(0) += 1;

        if let Some(geoip) = &self.geoip {
            if let Some(iso) = geoip.lookup_country(&entry.ip) {
                *self
                    .batch
                    .countries
                    .entry(DimKey::new(&hour, router, iso))
                    .or_insert(0) += 1;
            }
        }

        self.batch.entries += 1;
    }

    /// Swaps the buffers for fresh empty ones and commits the old ones in
    /// one store transaction. On failure the swapped-out data is discarded;
    /// retrying would duplicate whatever part of it already landed.
    async fn flush(&mut self) {
        let batch = std::mem::take(&mut self.batch);
        if batch.is_empty() {
            return;
        }

        match self.store.flush_batch(&batch).await {
            Ok(()) => {
                metrics::add(&self.metrics.flushed_entries, batch.entries as u64);
                debug!(entries = batch.entries, "flushed batch to store");
            }
            Err(e) => {
                metrics::incr(&self.metrics.flush_failures);
                error!(error = %e, entries = batch.entries, "flush failed, batch dropped");
            }
        }
    }
}

/// Salted, truncated hash of a client IP: sha256(salt || ip) cut to 64 bits,
/// lower-case hex. Raw IPs never reach disk; the salt dies with the process.
fn hash_ip(ip: &str, salt: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(ip.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}

/// Host component (with port if present) of a referrer URL. Unparsable
/// referrers yield `None`; nothing is synthesized from raw text.
fn referrer_host(referer: &str) -> Option<String> {
    let url = Url::parse(referer).ok()?;
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}
