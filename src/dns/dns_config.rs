//! DNS Server Configuration
//!
//! Configuration structs for the geo-aware DNS server: listen addresses,
//! answer defaults, the zone store, GeoIP and health checking.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use super::DnsError;

/// Main DNS server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsConfig {
    /// UDP listen address (default: 0.0.0.0:53)
    pub udp_addr: SocketAddr,

    /// TCP listen address (default: 0.0.0.0:53)
    pub tcp_addr: SocketAddr,

    /// Log filter, e.g. "info" or "aegis_geodns=debug,warn"
    pub log_level: String,

    /// Answer building settings
    pub handler: HandlerConfig,

    /// Zone store
    pub redis: RedisConfig,

    /// GeoIP proximity steering
    pub geoip: GeoIpConfig,

    /// Endpoint health checking
    pub healthcheck: HealthCheckConfig,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            udp_addr: SocketAddr::from(([0, 0, 0, 0], 53)),
            tcp_addr: SocketAddr::from(([0, 0, 0, 0], 53)),
            log_level: "info".to_string(),
            handler: HandlerConfig::default(),
            redis: RedisConfig::default(),
            geoip: GeoIpConfig::default(),
            healthcheck: HealthCheckConfig::default(),
        }
    }
}

impl DnsConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), DnsError> {
        if self.handler.zone_refresh_secs == 0 {
            return Err(DnsError::ConfigError(
                "handler.zone_refresh_secs must be > 0".to_string(),
            ));
        }

        self.redis.validate("redis")?;

        if self.geoip.enabled && self.geoip.db_path.is_empty() {
            return Err(DnsError::ConfigError(
                "geoip.db_path is required when geoip is enabled".to_string(),
            ));
        }

        let hc = &self.healthcheck;
        if hc.enabled {
            if hc.check_interval_secs == 0 {
                return Err(DnsError::ConfigError(
                    "healthcheck.check_interval_secs must be > 0".to_string(),
                ));
            }
            if hc.reload_interval_secs == 0 {
                return Err(DnsError::ConfigError(
                    "healthcheck.reload_interval_secs must be > 0".to_string(),
                ));
            }
            if hc.timeout_secs == 0 {
                return Err(DnsError::ConfigError(
                    "healthcheck.timeout_secs must be > 0".to_string(),
                ));
            }
            if hc.max_concurrent_checks == 0 {
                return Err(DnsError::ConfigError(
                    "healthcheck.max_concurrent_checks must be > 0".to_string(),
                ));
            }
            hc.redis.validate("healthcheck.redis")?;
        }

        // Scores must straddle zero so "up" and "down" are both reachable
        if hc.up_count <= 0 {
            return Err(DnsError::ConfigError(
                "healthcheck.up_count must be > 0".to_string(),
            ));
        }
        if hc.down_count >= 0 {
            return Err(DnsError::ConfigError(
                "healthcheck.down_count must be < 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Load configuration from TOML file
    pub fn from_toml(content: &str) -> Result<Self, DnsError> {
        toml::from_str(content).map_err(|e| DnsError::ConfigError(format!("TOML parse error: {}", e)))
    }

    /// Load configuration from YAML file
    pub fn from_yaml(content: &str) -> Result<Self, DnsError> {
        serde_yaml::from_str(content)
            .map_err(|e| DnsError::ConfigError(format!("YAML parse error: {}", e)))
    }

    /// Serialize to TOML
    pub fn to_toml(&self) -> Result<String, DnsError> {
        toml::to_string_pretty(self)
            .map_err(|e| DnsError::ConfigError(format!("TOML serialize error: {}", e)))
    }
}

/// Answer building configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerConfig {
    /// Default TTL and TTL ceiling in seconds (0 = use per-record TTLs)
    pub ttl: u32,
    /// Zone list staleness interval in seconds
    pub zone_refresh_secs: u64,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            ttl: 360,
            zone_refresh_secs: 600,
        }
    }
}

impl HandlerConfig {
    pub fn zone_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.zone_refresh_secs)
    }
}

/// Redis/DragonflyDB connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Connection URL (default: redis://127.0.0.1:6379)
    pub url: String,
    /// Prepended to every key
    pub prefix: String,
    /// Appended to every key
    pub suffix: String,
    /// Per-command timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            prefix: String::new(),
            suffix: String::new(),
            timeout_ms: 1000,
        }
    }
}

impl RedisConfig {
    fn validate(&self, section: &str) -> Result<(), DnsError> {
        if self.url.is_empty() {
            return Err(DnsError::ConfigError(format!("{}.url must be set", section)));
        }
        if self.timeout_ms == 0 {
            return Err(DnsError::ConfigError(format!(
                "{}.timeout_ms must be > 0",
                section
            )));
        }
        Ok(())
    }
}

/// GeoIP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoIpConfig {
    /// Enable proximity steering
    pub enabled: bool,
    /// Path to a MaxMind City database
    pub db_path: String,
}

impl Default for GeoIpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            db_path: "geoCity.mmdb".to_string(),
        }
    }
}

/// How the health filter picks survivors
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthPolicy {
    /// Keep addresses with a positive score
    #[default]
    Strict,
    /// Keep the best tier present (up, unknown, down)
    Tiered,
}

/// Health checking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Run background probes
    pub enabled: bool,
    /// Interval between probe rounds
    pub check_interval_secs: u64,
    /// Timeout for a single probe
    pub timeout_secs: u64,
    /// Interval between reloads of the endpoint list from the store
    pub reload_interval_secs: u64,
    /// Maximum probes in flight
    pub max_concurrent_checks: usize,
    /// Score ceiling (fully healthy)
    pub up_count: i32,
    /// Score floor (dead)
    pub down_count: i32,
    /// Filter policy
    pub policy: HealthPolicy,
    /// Store holding `host:ip` status entries
    pub redis: RedisConfig,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_secs: 10,
            timeout_secs: 5,
            reload_interval_secs: 60,
            max_concurrent_checks: 50,
            up_count: 3,
            down_count: -3,
            policy: HealthPolicy::Strict,
            redis: RedisConfig {
                prefix: "healthcheck:".to_string(),
                ..RedisConfig::default()
            },
        }
    }
}

impl HealthCheckConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn reload_interval(&self) -> Duration {
        Duration::from_secs(self.reload_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = DnsConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.handler.ttl, 360);
        assert_eq!(config.handler.zone_refresh_interval(), Duration::from_secs(600));
        assert!(config.geoip.enabled);
        assert_eq!(config.geoip.db_path, "geoCity.mmdb");
        assert_eq!(config.healthcheck.up_count, 3);
        assert_eq!(config.healthcheck.down_count, -3);
        assert_eq!(config.healthcheck.policy, HealthPolicy::Strict);
    }

    #[test]
    fn test_partial_toml() {
        let config = DnsConfig::from_toml(
            r#"
            udp_addr = "127.0.0.1:5353"
            tcp_addr = "127.0.0.1:5353"

            [handler]
            ttl = 300

            [healthcheck]
            policy = "tiered"
            check_interval_secs = 30
            "#,
        )
        .unwrap();

        assert_eq!(config.udp_addr.port(), 5353);
        assert_eq!(config.handler.ttl, 300);
        assert_eq!(config.handler.zone_refresh_secs, 600);
        assert_eq!(config.healthcheck.policy, HealthPolicy::Tiered);
        assert_eq!(config.healthcheck.check_interval(), Duration::from_secs(30));
        assert_eq!(config.healthcheck.redis.prefix, "healthcheck:");
    }

    #[test]
    fn test_yaml_config() {
        let config = DnsConfig::from_yaml(
            "geoip:\n  enabled: false\nredis:\n  url: redis://10.0.0.5:6379\n  prefix: \"zones:\"\n",
        )
        .unwrap();

        assert!(!config.geoip.enabled);
        assert_eq!(config.redis.url, "redis://10.0.0.5:6379");
        assert_eq!(config.redis.prefix, "zones:");
        assert_eq!(config.redis.timeout_ms, 1000);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = DnsConfig::default();
        let text = config.to_toml().unwrap();
        let parsed = DnsConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.udp_addr, config.udp_addr);
        assert_eq!(parsed.healthcheck.policy, config.healthcheck.policy);
    }

    #[test]
    fn test_invalid_configs() {
        let mut config = DnsConfig::default();
        config.handler.zone_refresh_secs = 0;
        assert!(config.validate().is_err());

        let mut config = DnsConfig::default();
        config.healthcheck.down_count = 0;
        assert!(config.validate().is_err());

        let mut config = DnsConfig::default();
        config.healthcheck.up_count = 0;
        assert!(config.validate().is_err());

        let mut config = DnsConfig::default();
        config.geoip.db_path = String::new();
        assert!(config.validate().is_err());

        let mut config = DnsConfig::default();
        config.redis.timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = DnsConfig::default();
        config.healthcheck.check_interval_secs = 0;
        assert!(config.validate().is_err());
        config.healthcheck.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_toml() {
        let err = DnsConfig::from_toml("udp_addr = 5").unwrap_err();
        assert!(err.to_string().contains("TOML parse error"));
    }
}
