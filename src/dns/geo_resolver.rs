//! Geographic Proximity Resolver
//!
//! Maps IPs to coordinates through an optional MaxMind City database and
//! narrows the A and AAAA sets of a record to the endpoint nearest to the
//! requester.
//!
//! A missing or unreadable database disables the resolver; a disabled
//! resolver leaves every record untouched.

use std::net::IpAddr;
#[cfg(feature = "geoip")]
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{AddressFamily, GeoIpConfig, Record};

/// Resolved position of an IP
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoCoordinate {
    pub latitude: f64,
    pub longitude: f64,
    /// ISO country code, empty if unknown
    pub country: String,
}

/// Errors from geo lookups
#[derive(Debug, Clone, thiserror::Error)]
pub enum GeoResolverError {
    #[error("GeoIP database not found: {0}")]
    DatabaseNotFound(String),
    #[error("GeoIP database error: {0}")]
    DatabaseError(String),
    #[error("GeoIP lookup error: {0}")]
    LookupError(String),
    #[error("GeoIP disabled")]
    Disabled,
}

/// IP to coordinate lookup
pub trait GeoLookup: Send + Sync {
    fn lookup(&self, ip: IpAddr) -> Result<GeoCoordinate, GeoResolverError>;
}

/// MaxMind City database reader
#[cfg(feature = "geoip")]
pub struct GeoIpDatabase {
    reader: maxminddb::Reader<Vec<u8>>,
}

#[cfg(feature = "geoip")]
impl GeoIpDatabase {
    /// Open a database file
    pub fn new(db_path: &str) -> Result<Self, GeoResolverError> {
        if !Path::new(db_path).exists() {
            return Err(GeoResolverError::DatabaseNotFound(db_path.to_string()));
        }
        let reader = maxminddb::Reader::open_readfile(db_path)
            .map_err(|e| GeoResolverError::DatabaseError(e.to_string()))?;
        Ok(Self { reader })
    }
}

#[cfg(feature = "geoip")]
impl GeoLookup for GeoIpDatabase {
    fn lookup(&self, ip: IpAddr) -> Result<GeoCoordinate, GeoResolverError> {
        let city: CityRecord = self
            .reader
            .lookup(ip)
            .and_then(|result| result.decode::<CityRecord>())
            .map_err(|e| GeoResolverError::LookupError(e.to_string()))?
            .ok_or_else(|| GeoResolverError::LookupError(format!("{} not in database", ip)))?;

        city.coordinate(ip)
    }
}

/// The parts of a City database entry used for ranking
#[cfg(feature = "geoip")]
#[derive(Debug, Default, Deserialize)]
struct CityRecord {
    #[serde(default)]
    location: Option<CityLocation>,
    #[serde(default)]
    country: Option<CityCountry>,
}

#[cfg(feature = "geoip")]
#[derive(Debug, Default, Deserialize)]
struct CityLocation {
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
}

#[cfg(feature = "geoip")]
#[derive(Debug, Default, Deserialize)]
struct CityCountry {
    #[serde(default)]
    iso_code: Option<String>,
}

#[cfg(feature = "geoip")]
impl CityRecord {
    /// Entries without both coordinates are misses, never (0, 0)
    fn coordinate(self, ip: IpAddr) -> Result<GeoCoordinate, GeoResolverError> {
        let (latitude, longitude) = match self.location {
            Some(CityLocation {
                latitude: Some(latitude),
                longitude: Some(longitude),
            }) => (latitude, longitude),
            _ => {
                return Err(GeoResolverError::LookupError(format!(
                    "no coordinates for {}",
                    ip
                )))
            }
        };

        Ok(GeoCoordinate {
            latitude,
            longitude,
            country: self
                .country
                .and_then(|c| c.iso_code)
                .unwrap_or_default(),
        })
    }
}

/// Outcome of the proximity pass for one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Proximity {
    /// No database; record untouched
    Disabled,
    /// Requester could not be located; record untouched
    RequesterUnknown,
    /// Ranking ran on both address families
    Applied,
}

/// Proximity resolver over an optional geo database
pub struct GeoResolver {
    database: Option<Box<dyn GeoLookup>>,
}

impl GeoResolver {
    /// Open the configured database, degrading to disabled on failure
    pub fn open(config: &GeoIpConfig) -> Self {
        if !config.enabled {
            info!("GeoIP disabled by configuration");
            return Self::disabled();
        }

        #[cfg(feature = "geoip")]
        {
            match GeoIpDatabase::new(&config.db_path) {
                Ok(db) => {
                    info!("GeoIP database loaded from {}", config.db_path);
                    Self::with_lookup(db)
                }
                Err(e) => {
                    warn!("Cannot open GeoIP database, proximity steering disabled: {}", e);
                    Self::disabled()
                }
            }
        }

        #[cfg(not(feature = "geoip"))]
        {
            warn!(
                "GeoIP feature not compiled in, ignoring database {}",
                config.db_path
            );
            Self::disabled()
        }
    }

    pub fn disabled() -> Self {
        Self { database: None }
    }

    pub fn with_lookup(lookup: impl GeoLookup + 'static) -> Self {
        Self {
            database: Some(Box::new(lookup)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.database.is_some()
    }

    /// Resolve an IP to its coordinate
    pub fn locate(&self, ip: IpAddr) -> Result<GeoCoordinate, GeoResolverError> {
        match &self.database {
            Some(db) => db.lookup(ip),
            None => Err(GeoResolverError::Disabled),
        }
    }

    /// Reduce the A and AAAA sets of `record` to their nearest endpoint
    ///
    /// Families are ranked independently. Candidates that cannot be located
    /// are skipped; a family with no locatable candidate is left as is.
    pub fn filter_nearest(&self, source_ip: IpAddr, record: &mut Record) -> Proximity {
        if !self.is_enabled() {
            return Proximity::Disabled;
        }

        let source = match self.locate(source_ip) {
            Ok(coord) => coord,
            Err(e) => {
                debug!("Cannot locate requester {}: {}", source_ip, e);
                return Proximity::RequesterUnknown;
            }
        };

        if let Some(index) = self.nearest(&source, record.a.iter().map(|r| IpAddr::V4(r.ip))) {
            record.a = vec![record.a.swap_remove(index)];
            debug!("Nearest {} for {} is {}", AddressFamily::A, source_ip, record.a[0].ip);
        }
        if let Some(index) = self.nearest(&source, record.aaaa.iter().map(|r| IpAddr::V6(r.ip))) {
            record.aaaa = vec![record.aaaa.swap_remove(index)];
            debug!("Nearest {} for {} is {}", AddressFamily::AAAA, source_ip, record.aaaa[0].ip);
        }

        Proximity::Applied
    }

    /// Index of the candidate closest to `source`; first one wins ties
    fn nearest(&self, source: &GeoCoordinate, candidates: impl Iterator<Item = IpAddr>) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (index, ip) in candidates.enumerate() {
            let Ok(coord) = self.locate(ip) else {
                continue;
            };
            let d = distance(source.latitude, source.longitude, coord.latitude, coord.longitude);
            if best.map_or(true, |(_, min)| d < min) {
                best = Some((index, d));
            }
        }
        best.map(|(index, _)| index)
    }
}

/// Great-circle central angle between two points, in radians
pub fn distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let a = a.clamp(0.0, 1.0);

    2.0 * a.sqrt().atan2((1.0 - a).sqrt())
}
