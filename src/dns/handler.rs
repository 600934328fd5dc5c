//! Request Handler
//!
//! Resolves a query name to the stored record of its location and turns
//! records into wire resource records.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use hickory_proto::rr::rdata::{A, AAAA, CNAME, MX, NS, SOA, SRV, TXT};
use hickory_proto::rr::{Name, RData, Record as ResourceRecord, RecordType};
use tracing::{debug, warn};

use super::resolver::{find_location, Location};
use super::store::Store;
use super::zone_directory::ZoneDirectory;
use super::{DnsError, HandlerConfig, LookupError, Record, SoaRecord};

/// TTL used when neither the record nor the configuration sets one
pub const DEFAULT_TTL: u32 = 360;

const HOSTMASTER: &str = "hostmaster";

/// Maximum length of one TXT character-string
const TXT_CHUNK: usize = 255;

/// A successfully resolved query
#[derive(Debug, Clone)]
pub struct Resolved {
    pub record: Record,
    /// Zone name as stored
    pub zone: String,
    pub location: Location,
}

/// Resolves names against the store and builds answers
pub struct RequestHandler {
    config: HandlerConfig,
    store: Arc<dyn Store>,
    zones: Arc<ZoneDirectory>,
}

impl RequestHandler {
    /// Create a handler and load the zone list
    pub async fn new(config: HandlerConfig, store: Arc<dyn Store>) -> Result<Self, DnsError> {
        let zones = Arc::new(ZoneDirectory::new(
            Arc::clone(&store),
            config.zone_refresh_interval(),
        ));
        let count = zones.refresh().await?;
        debug!("Request handler loaded {} zones", count);

        Ok(Self {
            config,
            store,
            zones,
        })
    }

    pub fn zones(&self) -> &Arc<ZoneDirectory> {
        &self.zones
    }

    /// Find the record answering `qname`
    pub async fn get_record(&self, qname: &str) -> Result<Resolved, LookupError> {
        self.zones.refresh_if_stale();

        let zone_name = self
            .zones
            .match_zone(qname)
            .ok_or_else(|| LookupError::NoZone(qname.to_string()))?;

        let zone = self
            .zones
            .load_zone(&zone_name)
            .await
            .map_err(|e| LookupError::ServerFailure(e.to_string()))?;

        if zone.locations.is_empty() {
            warn!("Zone {} has no locations", zone_name);
            return Err(LookupError::ServerFailure(format!("empty zone {}", zone_name)));
        }

        let location = find_location(qname, &zone).ok_or_else(|| LookupError::NameNotFound {
            name: qname.to_string(),
            zone: zone_name.clone(),
        })?;
        debug!("{} resolved to location {} in {}", qname, location, zone_name);

        let record = self.get_location(&zone_name, &location).await?;

        Ok(Resolved {
            record,
            zone: zone_name,
            location,
        })
    }

    /// Fetch and decode the record stored for a location
    ///
    /// An apex without stored data is an empty record; any other missing
    /// location does not exist.
    pub async fn get_location(&self, zone: &str, location: &Location) -> Result<Record, LookupError> {
        let value = self
            .store
            .hget(zone, location.label())
            .await
            .map_err(|e| LookupError::ServerFailure(e.to_string()))?;

        match value {
            Some(json) => Record::from_json(&json).map_err(|e| {
                warn!("Bad record at {}/{}: {}", zone, location.label(), e);
                LookupError::ServerFailure(e.to_string())
            }),
            None if *location == Location::Apex => Ok(Record::default()),
            None => Err(LookupError::NameNotFound {
                name: location.label().to_string(),
                zone: zone.to_string(),
            }),
        }
    }

    /// Store a record for a location
    pub async fn set_location(&self, zone: &str, location: &Location, record: &Record) -> Result<(), DnsError> {
        let json = record.to_json()?;
        self.store.hset(zone, location.label(), &json).await
    }

    /// Effective TTL of an entry
    ///
    /// The configured TTL is a ceiling and a default; 0 on either side means
    /// "unset".
    pub fn min_ttl(&self, ttl: u32) -> u32 {
        match (self.config.ttl, ttl) {
            (0, 0) => DEFAULT_TTL,
            (0, ttl) => ttl,
            (config, 0) => config,
            (config, ttl) => config.min(ttl),
        }
    }

    /// Answers of type `qtype` from a resolved record, owned by `name`
    ///
    /// Only the apex answers SOA. Falls back to the CNAME set when the record
    /// has nothing of the asked type.
    pub fn answers(&self, name: &Name, qtype: RecordType, resolved: &Resolved) -> Vec<ResourceRecord> {
        let record = &resolved.record;
        let answers = match qtype {
            RecordType::A => self.a(name, record),
            RecordType::AAAA => self.aaaa(name, record),
            RecordType::CNAME => self.cname(name, record),
            RecordType::TXT => self.txt(name, record),
            RecordType::NS => self.ns(name, record),
            RecordType::MX => self.mx(name, record),
            RecordType::SRV => self.srv(name, record),
            RecordType::SOA if resolved.location == Location::Apex => {
                self.soa(&resolved.zone, record).into_iter().collect()
            }
            _ => Vec::new(),
        };

        if answers.is_empty() && qtype != RecordType::CNAME {
            return self.cname(name, record);
        }
        answers
    }

    pub fn a(&self, name: &Name, record: &Record) -> Vec<ResourceRecord> {
        record
            .a
            .iter()
            .map(|r| ResourceRecord::from_rdata(name.clone(), self.min_ttl(r.ttl), RData::A(A(r.ip))))
            .collect()
    }

    pub fn aaaa(&self, name: &Name, record: &Record) -> Vec<ResourceRecord> {
        record
            .aaaa
            .iter()
            .map(|r| ResourceRecord::from_rdata(name.clone(), self.min_ttl(r.ttl), RData::AAAA(AAAA(r.ip))))
            .collect()
    }

    pub fn cname(&self, name: &Name, record: &Record) -> Vec<ResourceRecord> {
        record
            .cname
            .iter()
            .filter_map(|r| {
                let target = parse_target(&r.host)?;
                Some(ResourceRecord::from_rdata(name.clone(), self.min_ttl(r.ttl), RData::CNAME(CNAME(target))))
            })
            .collect()
    }

    pub fn txt(&self, name: &Name, record: &Record) -> Vec<ResourceRecord> {
        record
            .txt
            .iter()
            .filter(|r| !r.text.is_empty())
            .map(|r| {
                let rdata = RData::TXT(TXT::new(split_txt(&r.text)));
                ResourceRecord::from_rdata(name.clone(), self.min_ttl(r.ttl), rdata)
            })
            .collect()
    }

    pub fn ns(&self, name: &Name, record: &Record) -> Vec<ResourceRecord> {
        record
            .ns
            .iter()
            .filter_map(|r| {
                let host = parse_target(&r.host)?;
                Some(ResourceRecord::from_rdata(name.clone(), self.min_ttl(r.ttl), RData::NS(NS(host))))
            })
            .collect()
    }

    pub fn mx(&self, name: &Name, record: &Record) -> Vec<ResourceRecord> {
        record
            .mx
            .iter()
            .filter_map(|r| {
                let host = parse_target(&r.host)?;
                let rdata = RData::MX(MX::new(r.preference, host));
                Some(ResourceRecord::from_rdata(name.clone(), self.min_ttl(r.ttl), rdata))
            })
            .collect()
    }

    pub fn srv(&self, name: &Name, record: &Record) -> Vec<ResourceRecord> {
        record
            .srv
            .iter()
            .filter_map(|r| {
                let target = parse_target(&r.target)?;
                let rdata = RData::SRV(SRV::new(r.priority, r.weight, r.port, target));
                Some(ResourceRecord::from_rdata(name.clone(), self.min_ttl(r.ttl), rdata))
            })
            .collect()
    }

    /// SOA of a zone: the stored one if it names a server, else a default
    pub fn soa(&self, zone: &str, record: &Record) -> Option<ResourceRecord> {
        let owner = Name::from_ascii(fqdn(zone)).ok()?;

        let (ttl, soa) = match &record.soa {
            Some(stored) if !stored.ns.is_empty() => (self.min_ttl(stored.ttl), stored.clone()),
            _ => (self.min_ttl(0), self.default_soa(zone)),
        };

        let rdata = SOA::new(
            parse_target(&soa.ns)?,
            parse_target(&soa.mbox)?,
            serial(),
            soa.refresh as i32,
            soa.retry as i32,
            soa.expire as i32,
            soa.minttl,
        );
        Some(ResourceRecord::from_rdata(owner, ttl, RData::SOA(rdata)))
    }

    fn default_soa(&self, zone: &str) -> SoaRecord {
        let zone = fqdn(zone);
        SoaRecord {
            ttl: self.config.ttl,
            ns: format!("ns1.{}", zone),
            mbox: format!("{}.{}", HOSTMASTER, zone),
            refresh: 86400,
            retry: 7200,
            expire: 3600,
            minttl: self.config.ttl,
        }
    }
}

/// Split text into character-strings of at most 255 bytes
///
/// Splits never cut a UTF-8 sequence.
pub fn split_txt(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        if current.len() + c.len_utf8() > TXT_CHUNK {
            chunks.push(std::mem::take(&mut current));
        }
        current.push(c);
    }
    if !current.is_empty() || chunks.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Name with a trailing root dot
fn fqdn(name: &str) -> String {
    if name.ends_with('.') {
        name.to_string()
    } else {
        format!("{}.", name)
    }
}

/// Parse a target host; empty or invalid hosts are skipped
fn parse_target(host: &str) -> Option<Name> {
    if host.is_empty() {
        return None;
    }
    match Name::from_ascii(fqdn(host)) {
        Ok(name) => Some(name),
        Err(e) => {
            debug!("Skipping invalid target {}: {}", host, e);
            None
        }
    }
}

fn serial() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as u32
}
