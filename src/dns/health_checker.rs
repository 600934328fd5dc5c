//! Endpoint Health Checker
//!
//! Keeps a liveness score per (host, address) and uses it to drop dead
//! endpoints from answers. Scores are seeded from the health store, moved by
//! periodic background probes and written back to the store.
//!
//! Status table reads never touch the network: queries read the latest
//! published snapshot while the probe loop builds and swaps in the next one.

use std::collections::{BTreeSet, HashMap};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::store::Store;
use super::{normalize_name, DnsError, HealthCheckConfig, HealthPolicy, Record};

/// Health entry as stored under `host:ip`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HealthEntry {
    /// Probe protocol: "http", "https" or "tcp"
    #[serde(default)]
    pub protocol: String,
    /// Request path for HTTP probes
    #[serde(default)]
    pub uri: String,
    /// Probe port (0 = protocol default)
    #[serde(default)]
    pub port: u16,
    /// Signed liveness score
    #[serde(default)]
    pub status: i32,
}

impl HealthEntry {
    pub fn new(protocol: impl Into<String>, uri: impl Into<String>, port: u16) -> Self {
        Self {
            protocol: protocol.into(),
            uri: uri.into(),
            port,
            status: 0,
        }
    }
}

/// host -> address -> entry
type StatusTable = HashMap<String, HashMap<IpAddr, HealthEntry>>;

/// Store key of an endpoint
pub fn format_key(host: &str, ip: IpAddr) -> String {
    format!("{}:{}", normalize_name(host), ip)
}

/// Split a store key into host and address
///
/// Host names never contain ':', so the first one separates the parts and
/// IPv6 addresses stay intact.
pub fn parse_key(key: &str) -> Option<(String, IpAddr)> {
    let (host, ip) = key.split_once(':')?;
    let ip = ip.parse().ok()?;
    Some((normalize_name(host), ip))
}

/// One probe to run
#[derive(Debug, Clone)]
pub struct ProbeTarget {
    pub host: String,
    pub ip: IpAddr,
    pub protocol: String,
    pub uri: String,
    pub port: u16,
}

/// Why a probe failed
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProbeError {
    #[error("probe timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("HTTP {0}")]
    HttpStatus(u16),
    #[error("unsupported probe protocol '{0}'")]
    UnsupportedProtocol(String),
}

/// Transport performing one probe attempt
#[async_trait]
pub trait ProbeTransport: Send + Sync {
    async fn probe(&self, target: &ProbeTarget) -> Result<(), ProbeError>;
}

/// HTTP(S) and TCP connect probes
pub struct NetworkProbe {
    client: reqwest::Client,
}

impl NetworkProbe {
    pub fn new(timeout: Duration) -> Result<Self, DnsError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| DnsError::ServerError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ProbeTransport for NetworkProbe {
    async fn probe(&self, target: &ProbeTarget) -> Result<(), ProbeError> {
        match target.protocol.to_ascii_lowercase().as_str() {
            scheme @ ("http" | "https") => {
                let default_port = if scheme == "https" { 443 } else { 80 };
                let port = if target.port == 0 { default_port } else { target.port };
                let path = if target.uri.starts_with('/') {
                    target.uri.clone()
                } else {
                    format!("/{}", target.uri)
                };
                let url = format!("{}://{}{}", scheme, SocketAddr::new(target.ip, port), path);

                let response = self
                    .client
                    .get(&url)
                    .header(reqwest::header::HOST, target.host.as_str())
                    .send()
                    .await
                    .map_err(|e| {
                        if e.is_timeout() {
                            ProbeError::Timeout
                        } else {
                            ProbeError::Connect(e.to_string())
                        }
                    })?;

                if response.status().is_success() {
                    Ok(())
                } else {
                    Err(ProbeError::HttpStatus(response.status().as_u16()))
                }
            }
            "tcp" => {
                let addr = SocketAddr::new(target.ip, target.port);
                TcpStream::connect(addr)
                    .await
                    .map(|_| ())
                    .map_err(|e| ProbeError::Connect(e.to_string()))
            }
            other => Err(ProbeError::UnsupportedProtocol(other.to_string())),
        }
    }
}

/// What the health pass did to a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthOutcome {
    /// The host has no health entries; record left as is
    NotMonitored,
    /// Addresses were filtered; `removed` of them were dropped
    Filtered { removed: usize },
}

/// Background prober and status table
pub struct HealthChecker {
    store: Arc<dyn Store>,
    transport: Arc<dyn ProbeTransport>,
    config: HealthCheckConfig,
    table: ArcSwap<StatusTable>,
}

impl HealthChecker {
    pub fn new(
        store: Arc<dyn Store>,
        transport: Arc<dyn ProbeTransport>,
        config: HealthCheckConfig,
    ) -> Self {
        Self {
            store,
            transport,
            config,
            table: ArcSwap::from_pointee(StatusTable::new()),
        }
    }

    /// Current score of an endpoint; `None` if it is not tracked
    pub fn get_status(&self, host: &str, ip: IpAddr) -> Option<i32> {
        self.table
            .load()
            .get(&normalize_name(host))
            .and_then(|ips| ips.get(&ip))
            .map(|entry| entry.status)
    }

    /// Whether any endpoint of `host` is tracked
    pub fn is_monitored(&self, host: &str) -> bool {
        self.table.load().contains_key(&normalize_name(host))
    }

    /// Number of tracked endpoints
    pub fn endpoint_count(&self) -> usize {
        self.table.load().values().map(HashMap::len).sum()
    }

    /// Drop unhealthy A and AAAA entries of `record`, independently per family
    ///
    /// A family with no survivors is left empty; there is no fallback to the
    /// unfiltered list.
    pub fn filter(&self, host: &str, record: &mut Record) -> HealthOutcome {
        let table = self.table.load();
        let Some(endpoints) = table.get(&normalize_name(host)) else {
            return HealthOutcome::NotMonitored;
        };

        let status_of = |ip: IpAddr| endpoints.get(&ip).map(|entry| entry.status);
        let before = record.a.len() + record.aaaa.len();

        let keep = self.survivors(record.a.iter().map(|r| status_of(IpAddr::V4(r.ip))));
        retain_by_mask(&mut record.a, &keep);

        let keep = self.survivors(record.aaaa.iter().map(|r| status_of(IpAddr::V6(r.ip))));
        retain_by_mask(&mut record.aaaa, &keep);

        let removed = before - record.a.len() - record.aaaa.len();
        if removed > 0 {
            debug!("Health filter removed {} addresses for {}", removed, host);
        }
        HealthOutcome::Filtered { removed }
    }

    /// Per-candidate keep mask under the configured policy
    ///
    /// Untracked candidates (`None`) are never kept.
    fn survivors(&self, statuses: impl Iterator<Item = Option<i32>>) -> Vec<bool> {
        let statuses: Vec<Option<i32>> = statuses.collect();
        match self.config.policy {
            HealthPolicy::Strict => statuses.iter().map(|s| matches!(s, Some(s) if *s > 0)).collect(),
            HealthPolicy::Tiered => {
                let tiers: Vec<Option<u8>> = statuses.iter().map(|s| s.map(|s| self.tier(s))).collect();
                let best = tiers.iter().flatten().max().copied();
                tiers.iter().map(|t| t.is_some() && *t == best).collect()
            }
        }
    }

    /// 2 = fully up, 1 = in transition, 0 = fully down
    fn tier(&self, status: i32) -> u8 {
        if status >= self.config.up_count {
            2
        } else if status <= self.config.down_count {
            0
        } else {
            1
        }
    }

    /// Score after one probe: +1 on success, -1 on failure, within bounds
    pub fn next_status(&self, status: i32, success: bool) -> i32 {
        let next = if success { status.saturating_add(1) } else { status.saturating_sub(1) };
        next.clamp(self.config.down_count, self.config.up_count)
    }

    /// Reload the endpoint list from the store
    ///
    /// New endpoints start from their stored score; known endpoints keep
    /// their in-memory score; endpoints gone from the store are dropped.
    pub async fn reload(&self) -> Result<usize, DnsError> {
        let keys = self.store.keys().await?;
        let mut loaded: Vec<(String, IpAddr, HealthEntry)> = Vec::with_capacity(keys.len());

        for key in keys {
            let Some((host, ip)) = parse_key(&key) else {
                warn!("Ignoring health key with bad format: {}", key);
                continue;
            };
            let Some(value) = self.store.get(&key).await? else {
                continue;
            };
            match serde_json::from_str::<HealthEntry>(&value) {
                Ok(entry) => loaded.push((host, ip, entry)),
                Err(e) => {
                    let err = DnsError::MalformedHealthEntry { key, reason: e.to_string() };
                    warn!("{}", err);
                }
            }
        }

        let count = loaded.len();
        self.table.rcu(|current| {
            let mut next = StatusTable::new();
            for (host, ip, entry) in &loaded {
                let mut entry = entry.clone();
                entry.status = match current.get(host).and_then(|ips| ips.get(ip)) {
                    Some(known) => known.status,
                    None => entry.status.clamp(self.config.down_count, self.config.up_count),
                };
                next.entry(host.clone()).or_default().insert(*ip, entry);
            }
            next
        });

        debug!("Health table reloaded with {} endpoints", count);
        Ok(count)
    }

    /// Register or replace an endpoint in the store and the table
    pub async fn set_entry(&self, host: &str, ip: IpAddr, entry: HealthEntry) -> Result<(), DnsError> {
        let key = format_key(host, ip);
        let value = serde_json::to_string(&entry)
            .map_err(|e| DnsError::MalformedHealthEntry { key: key.clone(), reason: e.to_string() })?;
        self.store.set(&key, &value).await?;

        let host = normalize_name(host);
        self.table.rcu(|current| {
            let mut next = StatusTable::clone(current);
            next.entry(host.clone()).or_default().insert(ip, entry.clone());
            next
        });
        Ok(())
    }

    /// Run one probe round over every tracked endpoint
    ///
    /// Returns the number of endpoints probed.
    pub async fn check_all(&self) -> usize {
        let table = self.table.load_full();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_checks));
        let timeout = self.config.timeout();
        let started = Instant::now();

        let handles: Vec<_> = table
            .iter()
            .flat_map(|(host, ips)| {
                ips.iter().map(move |(ip, entry)| ProbeTarget {
                    host: host.clone(),
                    ip: *ip,
                    protocol: entry.protocol.clone(),
                    uri: entry.uri.clone(),
                    port: entry.port,
                })
            })
            .map(|target| {
                let semaphore = Arc::clone(&semaphore);
                let transport = Arc::clone(&self.transport);
                tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    let result = match tokio::time::timeout(timeout, transport.probe(&target)).await {
                        Ok(result) => result,
                        Err(_) => Err(ProbeError::Timeout),
                    };
                    (target, result)
                })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for joined in join_all(handles).await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!("Health probe task failed: {}", e),
            }
        }

        for (target, result) in &results {
            match result {
                Err(ProbeError::UnsupportedProtocol(_)) | Ok(()) => {}
                Err(e) => debug!("Probe {}:{} failed: {}", target.host, target.ip, e),
            }
        }
        let unsupported = unsupported_protocols(&results);
        if !unsupported.is_empty() {
            warn!(
                "Health round skipped unsupported protocols: {}",
                unsupported.into_iter().collect::<Vec<_>>().join(", ")
            );
        }

        let changed = self.apply_results(&results);
        for (host, ip, entry) in &changed {
            self.write_back(host, *ip, entry).await;
        }

        let up = results.iter().filter(|(_, r)| r.is_ok()).count();
        info!(
            "Health round: {} probed, {} passed, {} changed in {}ms",
            results.len(),
            up,
            changed.len(),
            started.elapsed().as_millis()
        );
        results.len()
    }

    /// Fold probe results into a new table; returns the entries whose score moved
    fn apply_results(
        &self,
        results: &[(ProbeTarget, Result<(), ProbeError>)],
    ) -> Vec<(String, IpAddr, HealthEntry)> {
        let mut changed = Vec::new();
        self.table.rcu(|current| {
            changed.clear();
            let mut next = StatusTable::clone(current);
            for (target, result) in results {
                // Entry removed by a reload while probing
                let Some(entry) = next.get_mut(&target.host).and_then(|ips| ips.get_mut(&target.ip)) else {
                    continue;
                };
                let status = self.next_status(entry.status, result.is_ok());
                if status != entry.status {
                    entry.status = status;
                    changed.push((target.host.clone(), target.ip, entry.clone()));
                }
            }
            next
        });
        changed
    }

    async fn write_back(&self, host: &str, ip: IpAddr, entry: &HealthEntry) {
        let key = format_key(host, ip);
        let value = match serde_json::to_string(entry) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to encode health entry {}: {}", key, e);
                return;
            }
        };
        if let Err(e) = self.store.set(&key, &value).await {
            warn!("Failed to store health status for {}: {}", key, e);
        }
    }

    /// Reload and probe forever on the configured intervals
    pub async fn run(self: Arc<Self>) {
        info!(
            "Starting health checker with {}s probe interval, {}s reload interval",
            self.config.check_interval_secs, self.config.reload_interval_secs
        );

        let mut reload_ticker = interval(self.config.reload_interval());
        let mut check_ticker = interval(self.config.check_interval());
        reload_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        check_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = reload_ticker.tick() => {
                    if let Err(e) = self.reload().await {
                        warn!("Health table reload failed: {}", e);
                    }
                }
                _ = check_ticker.tick() => {
                    self.check_all().await;
                }
            }
        }
    }
}

/// Distinct unsupported protocols seen in a round
fn unsupported_protocols(results: &[(ProbeTarget, Result<(), ProbeError>)]) -> BTreeSet<String> {
    results
        .iter()
        .filter_map(|(_, result)| match result {
            Err(ProbeError::UnsupportedProtocol(protocol)) => Some(protocol.clone()),
            _ => None,
        })
        .collect()
}

/// Keep the items whose mask entry is true
fn retain_by_mask<T>(items: &mut Vec<T>, keep: &[bool]) {
    let mut index = 0;
    items.retain(|_| {
        let kept = keep.get(index).copied().unwrap_or(false);
        index += 1;
        kept
    });
}
