use std::io::Write;

use aegis_geodns::dns::{DnsConfig, HealthPolicy};

#[test]
fn test_config_file_toml() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        r#"
log_level = "debug"
udp_addr = "127.0.0.1:5053"

[redis]
prefix = "aegis:zones:"
timeout_ms = 250

[healthcheck]
policy = "tiered"
up_count = 5
down_count = -5
"#
    )
    .unwrap();

    let content = std::fs::read_to_string(file.path()).unwrap();
    let config = DnsConfig::from_toml(&content).unwrap();
    config.validate().unwrap();

    assert_eq!(config.log_level, "debug");
    assert_eq!(config.udp_addr.port(), 5053);
    assert_eq!(config.tcp_addr.port(), 53);
    assert_eq!(config.redis.prefix, "aegis:zones:");
    assert_eq!(config.redis.timeout_ms, 250);
    assert_eq!(config.healthcheck.policy, HealthPolicy::Tiered);
    assert_eq!(config.healthcheck.up_count, 5);
}

#[test]
fn test_config_file_yaml() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    writeln!(
        file,
        "handler:\n  ttl: 0\ngeoip:\n  db_path: /var/lib/geoip/City.mmdb\nhealthcheck:\n  enabled: false\n"
    )
    .unwrap();

    let content = std::fs::read_to_string(file.path()).unwrap();
    let config = DnsConfig::from_yaml(&content).unwrap();
    config.validate().unwrap();

    assert_eq!(config.handler.ttl, 0);
    assert_eq!(config.geoip.db_path, "/var/lib/geoip/City.mmdb");
    assert!(!config.healthcheck.enabled);
}
