//! DNS Record Model
//!
//! Typed representation of a location's answer set as it is stored in the
//! zone store. The JSON layout is shared with other tools writing the store,
//! so field names and omission rules must not change.

use hickory_proto::op::ResponseCode;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr};

/// Full answer set stored for one location
///
/// Empty sequences are omitted when serialized and a missing key decodes to
/// an empty sequence, so a record survives a store round trip unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Record {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub a: Vec<ARecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aaaa: Vec<AaaaRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub txt: Vec<TxtRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cname: Vec<CnameRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ns: Vec<NsRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mx: Vec<MxRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub srv: Vec<SrvRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soa: Option<SoaRecord>,
}

impl Record {
    /// Decode a record from its stored JSON form
    pub fn from_json(value: &str) -> Result<Self, DnsError> {
        serde_json::from_str(value).map_err(|e| DnsError::MalformedRecord(e.to_string()))
    }

    /// Encode the record to its stored JSON form
    pub fn to_json(&self) -> Result<String, DnsError> {
        serde_json::to_string(self).map_err(|e| DnsError::MalformedRecord(e.to_string()))
    }

    /// True when the location exists but holds no data of any type
    pub fn is_empty(&self) -> bool {
        self.a.is_empty()
            && self.aaaa.is_empty()
            && self.txt.is_empty()
            && self.cname.is_empty()
            && self.ns.is_empty()
            && self.mx.is_empty()
            && self.srv.is_empty()
            && self.soa.is_none()
    }
}

fn is_zero(ttl: &u32) -> bool {
    *ttl == 0
}

/// IPv4 address record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ARecord {
    /// TTL override, 0 means "use the configured default"
    #[serde(default, skip_serializing_if = "is_zero")]
    pub ttl: u32,
    pub ip: Ipv4Addr,
}

impl ARecord {
    pub fn new(ip: Ipv4Addr) -> Self {
        Self { ttl: 0, ip }
    }
}

/// IPv6 address record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AaaaRecord {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub ttl: u32,
    pub ip: Ipv6Addr,
}

impl AaaaRecord {
    pub fn new(ip: Ipv6Addr) -> Self {
        Self { ttl: 0, ip }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TxtRecord {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub ttl: u32,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CnameRecord {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub ttl: u32,
    pub host: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NsRecord {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub ttl: u32,
    pub host: String,
}

/// Mail exchange
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MxRecord {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub ttl: u32,
    pub host: String,
    pub preference: u16,
}

/// Service location
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SrvRecord {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub ttl: u32,
    pub priority: u16,
    pub weight: u16,
    pub port: u16,
    pub target: String,
}

/// Start of authority
///
/// The admin mailbox is stored under `MBox` for compatibility with existing
/// zone data.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SoaRecord {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub ttl: u32,
    #[serde(default)]
    pub ns: String,
    #[serde(rename = "MBox", default)]
    pub mbox: String,
    #[serde(default)]
    pub refresh: u32,
    #[serde(default)]
    pub retry: u32,
    #[serde(default)]
    pub expire: u32,
    #[serde(default)]
    pub minttl: u32,
}

/// Address family of a steered slice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressFamily {
    A,
    AAAA,
}

impl std::fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressFamily::A => write!(f, "A"),
            AddressFamily::AAAA => write!(f, "AAAA"),
        }
    }
}

/// Why a query could not be answered with data
///
/// Every failure of the resolution path is one of these; nothing in that path
/// panics on bad input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    /// No zone is authoritative for the name
    #[error("no zone matches {0}")]
    NoZone(String),

    /// The zone exists but no location answers the name
    #[error("{name} does not exist in zone {zone}")]
    NameNotFound { name: String, zone: String },

    /// Stored data could not be used
    #[error("server failure: {0}")]
    ServerFailure(String),
}

impl LookupError {
    /// DNS response code for this outcome
    pub fn response_code(&self) -> ResponseCode {
        match self {
            LookupError::NoZone(_) | LookupError::NameNotFound { .. } => ResponseCode::NXDomain,
            LookupError::ServerFailure(_) => ResponseCode::ServFail,
        }
    }

    /// Zone in which the name was looked up, if one matched
    pub fn zone(&self) -> Option<&str> {
        match self {
            LookupError::NameNotFound { zone, .. } => Some(zone),
            _ => None,
        }
    }
}

/// Errors from the store, configuration and server layers
#[derive(Debug, Clone, thiserror::Error)]
pub enum DnsError {
    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Store timeout after {0} ms")]
    StoreTimeout(u64),

    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Malformed health entry for {key}: {reason}")]
    MalformedHealthEntry { key: String, reason: String },

    #[error("Invalid domain name: {0}")]
    InvalidDomain(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<redis::RedisError> for DnsError {
    fn from(e: redis::RedisError) -> Self {
        DnsError::StoreError(e.to_string())
    }
}

/// Normalize a domain name for comparisons: lowercase, no trailing root dot
pub fn normalize_name(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_round_trip_preserves_omitted_keys() {
        let json = r#"{"a":[{"ip":"1.2.3.4"},{"ttl":300,"ip":"2.3.4.5"}],"mx":[{"host":"mx.example.com.","preference":10}]}"#;
        let record = Record::from_json(json).unwrap();

        assert_eq!(record.a.len(), 2);
        assert_eq!(record.a[0].ttl, 0);
        assert_eq!(record.a[1].ttl, 300);
        assert!(record.aaaa.is_empty());
        assert!(record.soa.is_none());

        let encoded = record.to_json().unwrap();
        assert_eq!(encoded, json);
        assert_eq!(Record::from_json(&encoded).unwrap(), record);
    }

    #[test]
    fn test_full_record_round_trip() {
        let record = Record {
            a: vec![ARecord::new("10.0.0.1".parse().unwrap())],
            aaaa: vec![AaaaRecord { ttl: 60, ip: "2001:db8::1".parse().unwrap() }],
            txt: vec![TxtRecord { ttl: 0, text: "v=spf1 -all".to_string() }],
            cname: vec![CnameRecord { ttl: 0, host: "x.example.com.".to_string() }],
            ns: vec![NsRecord { ttl: 0, host: "ns1.example.com.".to_string() }],
            mx: vec![MxRecord { ttl: 0, host: "mx.example.com.".to_string(), preference: 5 }],
            srv: vec![SrvRecord {
                ttl: 0,
                priority: 10,
                weight: 100,
                port: 555,
                target: "sip.example.com.".to_string(),
            }],
            soa: Some(SoaRecord {
                ttl: 100,
                ns: "ns1.example.com.".to_string(),
                mbox: "hostmaster.example.com.".to_string(),
                refresh: 44,
                retry: 55,
                expire: 66,
                minttl: 100,
            }),
        };

        let decoded = Record::from_json(&record.to_json().unwrap()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_soa_uses_mbox_key() {
        let json = r#"{"soa":{"ns":"ns1.example.com.","MBox":"admin.example.com.","refresh":1,"retry":2,"expire":3,"minttl":4}}"#;
        let record = Record::from_json(json).unwrap();
        let soa = record.soa.unwrap();
        assert_eq!(soa.mbox, "admin.example.com.");
        assert_eq!(soa.minttl, 4);
    }

    #[test]
    fn test_empty_record() {
        let record = Record::from_json("{}").unwrap();
        assert!(record.is_empty());
        assert_eq!(record.to_json().unwrap(), "{}");
    }

    #[test]
    fn test_malformed_record() {
        assert!(matches!(
            Record::from_json(r#"{"a":[{"ip":"not-an-ip"}]}"#),
            Err(DnsError::MalformedRecord(_))
        ));
        assert!(Record::from_json("{").is_err());
    }

    #[test]
    fn test_lookup_error_codes() {
        assert_eq!(LookupError::NoZone("x.".into()).response_code(), ResponseCode::NXDomain);
        let missing = LookupError::NameNotFound { name: "a".into(), zone: "b".into() };
        assert_eq!(missing.response_code(), ResponseCode::NXDomain);
        assert_eq!(missing.zone(), Some("b"));
        assert_eq!(
            LookupError::ServerFailure("bad json".into()).response_code(),
            ResponseCode::ServFail
        );
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("WWW.Example.COM."), "www.example.com");
        assert_eq!(normalize_name("example.com"), "example.com");
    }
}
