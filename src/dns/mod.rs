//! AEGIS GeoDNS
//!
//! Authoritative DNS answering from zones kept in Redis/DragonflyDB, with
//! traffic steered by endpoint health and requester proximity.
//!
//! ## Architecture
//!
//! ```text
//! Query → DNS Server → Request Handler
//!                          ↓
//!                    Zone Directory (longest matching zone)
//!                          ↓
//!                    Name Resolver (exact / apex / wildcard location)
//!                          ↓
//!                    Store fetch (Record JSON)
//!                          ↓
//!                    Traffic Steering: Health Checker → Geo Resolver
//!                          ↓
//!                    Answer (hickory-proto records)
//!
//! Health Checker ⇄ health store (background probes and reloads)
//! ```
//!
//! ## Components
//!
//! - `dns_types`: Record model, lookup outcomes and errors
//! - `dns_config`: Server configuration (listeners, store, GeoIP, health checks)
//! - `store`: Store trait with Redis and in-memory backends
//! - `zone_directory`: Zone list snapshot and longest-suffix zone matching
//! - `resolver`: Closest-encloser and wildcard location lookup
//! - `health_checker`: Endpoint scores, probing and health filtering
//! - `geo_resolver`: GeoIP lookups and nearest-endpoint selection
//! - `steering`: Health then proximity filtering of answers
//! - `handler`: Record lookup and answer building
//! - `dns_server`: UDP/TCP DNS server using Hickory DNS

pub mod dns_config;
pub mod dns_server;
pub mod dns_types;
pub mod geo_resolver;
pub mod handler;
pub mod health_checker;
pub mod resolver;
pub mod steering;
pub mod store;
pub mod zone_directory;

pub use dns_config::*;
pub use dns_server::*;
pub use dns_types::*;
pub use geo_resolver::{distance, GeoCoordinate, GeoLookup, GeoResolver, GeoResolverError, Proximity};
pub use handler::{split_txt, RequestHandler, Resolved};
pub use health_checker::{HealthChecker, HealthEntry, HealthOutcome, NetworkProbe, ProbeTransport};
pub use resolver::{find_location, Location};
pub use steering::{Steering, TrafficSteering};
pub use store::{MemoryStore, RedisStore, Store};
pub use zone_directory::{is_subdomain, Zone, ZoneDirectory};
