//! The shipped compose file against the deployment model

use building_telemetry::stack::{StackSettings, StackSpec};

const COMPOSE: &str = include_str!("../deploy/docker-compose.yml");

#[test]
fn test_shipped_compose_matches_reference() {
    let shipped = StackSpec::from_compose_yaml(COMPOSE).unwrap();
    assert_eq!(shipped, StackSpec::reference(&StackSettings::default()));
}

#[test]
fn test_shipped_compose_is_clean() {
    let shipped = StackSpec::from_compose_yaml(COMPOSE).unwrap();
    assert!(shipped.validate().is_empty());
    assert_eq!(
        shipped.start_order().unwrap(),
        vec!["api", "mosquitto", "influxdb", "grafana"]
    );
    for name in ["api", "mosquitto", "influxdb", "grafana"] {
        assert_eq!(shipped.service(name).unwrap().ports.len(), 1, "{name} publishes one port");
    }
}
