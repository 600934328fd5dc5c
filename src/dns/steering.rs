//! Traffic Steering
//!
//! Turns a stored record into the record actually answered: unhealthy
//! endpoints are dropped first, then the nearest survivor is picked per
//! address family. Proximity only ever ranks endpoints that passed the
//! health filter.

use std::net::IpAddr;
use std::sync::Arc;

use tracing::debug;

use super::geo_resolver::{GeoResolver, Proximity};
use super::health_checker::{HealthChecker, HealthOutcome};
use super::Record;

/// What each pass did to a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Steering {
    /// `None` when health checking is turned off
    pub health: Option<HealthOutcome>,
    pub proximity: Proximity,
}

/// Health then proximity filtering of answer records
pub struct TrafficSteering {
    health: Option<Arc<HealthChecker>>,
    geo: Arc<GeoResolver>,
}

impl TrafficSteering {
    pub fn new(health: Option<Arc<HealthChecker>>, geo: Arc<GeoResolver>) -> Self {
        Self { health, geo }
    }

    /// Pass-through pipeline with both filters off
    pub fn passthrough() -> Self {
        Self::new(None, Arc::new(GeoResolver::disabled()))
    }

    /// Filter `record` in place for a query of `qname` from `client_ip`
    ///
    /// Does no I/O; only in-memory snapshots are read.
    pub fn steer(&self, qname: &str, client_ip: IpAddr, record: &mut Record) -> Steering {
        let health = self.health.as_ref().map(|checker| checker.filter(qname, record));
        let proximity = self.geo.filter_nearest(client_ip, record);

        debug!(
            "Steered {} for {}: health {:?}, proximity {:?}, {} A / {} AAAA left",
            qname,
            client_ip,
            health,
            proximity,
            record.a.len(),
            record.aaaa.len()
        );

        Steering { health, proximity }
    }
}
