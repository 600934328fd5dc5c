//! Zone Directory
//!
//! Keeps the list of zone names served from the store and picks the zone
//! that is authoritative for a query. The list is published as an immutable
//! snapshot; a refresh builds a new one and swaps it in, so readers never see
//! a half-loaded list.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use tracing::{debug, info, warn};

use super::store::Store;
use super::{normalize_name, DnsError};

/// A zone together with the location labels stored under it
///
/// Labels are matched without case; lookups hand back the label as stored so
/// it can be used as the hash field.
#[derive(Debug, Clone)]
pub struct Zone {
    /// Zone name as stored (e.g. "example.com.")
    pub name: String,
    /// Lowercased location label -> stored label, "@" for the apex
    pub locations: HashMap<String, String>,
}

impl Zone {
    pub fn new<I, S>(name: impl Into<String>, locations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            locations: locations
                .into_iter()
                .map(|label| {
                    let stored: String = label.into();
                    (stored.to_ascii_lowercase(), stored)
                })
                .collect(),
        }
    }

    pub fn contains(&self, location: &str) -> bool {
        self.stored_label(location).is_some()
    }

    /// Stored spelling of a location label
    pub fn stored_label(&self, location: &str) -> Option<&str> {
        self.locations
            .get(&location.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Lowercased location labels
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.locations.keys().map(String::as_str)
    }
}

/// Immutable view of the zone list
#[derive(Debug, Default)]
struct ZoneSnapshot {
    /// (normalized name, stored name)
    zones: Vec<(String, String)>,
    loaded_at: Option<Instant>,
}

impl ZoneSnapshot {
    fn new(names: Vec<String>) -> Self {
        let zones = names
            .into_iter()
            .map(|name| (normalize_name(&name), name))
            .collect();
        Self {
            zones,
            loaded_at: Some(Instant::now()),
        }
    }
}

/// Directory of zones served from the store
pub struct ZoneDirectory {
    store: Arc<dyn Store>,
    snapshot: ArcSwap<ZoneSnapshot>,
    refresh_interval: Duration,
    refreshing: AtomicBool,
}

impl ZoneDirectory {
    /// Create an empty directory; call [`ZoneDirectory::refresh`] to load it
    pub fn new(store: Arc<dyn Store>, refresh_interval: Duration) -> Self {
        Self {
            store,
            snapshot: ArcSwap::from_pointee(ZoneSnapshot::default()),
            refresh_interval,
            refreshing: AtomicBool::new(false),
        }
    }

    /// Reload all zone names from the store and publish them
    pub async fn refresh(&self) -> Result<usize, DnsError> {
        let names = self.store.keys().await?;
        let count = names.len();
        self.snapshot.store(Arc::new(ZoneSnapshot::new(names)));
        debug!("Zone directory refreshed with {} zones", count);
        Ok(count)
    }

    /// Whether the staleness interval has passed since the last refresh
    pub fn is_stale(&self) -> bool {
        match self.snapshot.load().loaded_at {
            Some(at) => at.elapsed() > self.refresh_interval,
            None => true,
        }
    }

    /// Start a background refresh if the zone list is stale
    ///
    /// At most one refresh runs at a time. The caller keeps using the current
    /// snapshot; returns true if a refresh was started.
    pub fn refresh_if_stale(self: &Arc<Self>) -> bool {
        if !self.is_stale() {
            return false;
        }
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let directory = Arc::clone(self);
        tokio::spawn(async move {
            info!("Zone list is stale, reloading");
            if let Err(e) = directory.refresh().await {
                warn!("Zone refresh failed: {}", e);
            }
            directory.refreshing.store(false, Ordering::Release);
        });
        true
    }

    /// Zone names as stored
    pub fn zones(&self) -> Vec<String> {
        self.snapshot
            .load()
            .zones
            .iter()
            .map(|(_, stored)| stored.clone())
            .collect()
    }

    /// Longest zone that is authoritative for `qname`
    ///
    /// Returns the zone name as stored.
    pub fn match_zone(&self, qname: &str) -> Option<String> {
        let qname = normalize_name(qname);
        let snapshot = self.snapshot.load();

        snapshot
            .zones
            .iter()
            .filter(|(zone, _)| is_subdomain(zone, &qname))
            .max_by_key(|(zone, _)| zone.len())
            .map(|(_, stored)| stored.clone())
    }

    /// Fetch the current location set of a zone
    ///
    /// Not cached: records may be changed externally at any time.
    pub async fn load_zone(&self, name: &str) -> Result<Zone, DnsError> {
        let locations = self.store.hkeys(name).await?;
        debug!("Zone {} has {} locations", name, locations.len());
        Ok(Zone::new(name, locations))
    }
}

/// Label-aligned suffix test: is `child` equal to or below `parent`
///
/// Both names are compared case-insensitively without the trailing root dot.
pub fn is_subdomain(parent: &str, child: &str) -> bool {
    let parent = normalize_name(parent);
    let child = normalize_name(child);

    if parent.is_empty() {
        return true;
    }
    if child == parent {
        return true;
    }
    child.len() > parent.len()
        && child.ends_with(parent.as_str())
        && child.as_bytes()[child.len() - parent.len() - 1] == b'.'
}
