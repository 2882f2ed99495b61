//! Tests for topology matching rules.

use super::*;
use serde_json::json;

fn args(pairs: &[(&str, serde_json::Value)]) -> Arguments {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

mod arguments {
    use super::*;

    /// Verify that extra detected arguments are tolerated
    #[test]
    fn test_subset_tolerates_extra_detected_arguments() {
        let desired = args(&[("x-message-ttl", json!(60000))]);
        let detected = args(&[("x-message-ttl", json!(60000)), ("x-queue-type", json!("classic"))]);

        assert!(arguments_subset(&desired, &detected));
    }

    /// Verify that a differing value fails the match
    #[test]
    fn test_subset_rejects_different_value() {
        let desired = args(&[("x-message-ttl", json!(60000))]);
        let detected = args(&[("x-message-ttl", json!(1000))]);

        assert!(!arguments_subset(&desired, &detected));
    }

    /// Verify that a missing key fails the match
    #[test]
    fn test_subset_rejects_missing_key() {
        let desired = args(&[("x-max-length", json!(10))]);

        assert!(!arguments_subset(&desired, &Arguments::new()));
    }
}

mod matching {
    use super::*;

    /// Verify that exchange matching compares type and flags
    #[test]
    fn test_exchange_type_mismatch_is_invalid() {
        let desired = ExchangeSpec::new("audit", "topic");
        let mut detected = desired.clone();
        detected.exchange_type = "fanout".to_string();

        assert!(desired.matches(&desired.clone()));
        assert!(!desired.matches(&detected));
    }

    /// Verify that queue matching compares flags
    #[test]
    fn test_queue_durability_mismatch_is_invalid() {
        let desired = QueueSpec::new("audit.log");
        let mut detected = desired.clone();
        detected.durable = false;

        assert!(!desired.matches(&detected));
    }

    /// Verify that bindings compare routing keys
    #[test]
    fn test_binding_routing_key_mismatch_is_invalid() {
        let desired = BindingSpec::to_queue("audit", "audit.log", "#");
        let detected = BindingSpec::to_queue("audit", "audit.log", "audit.*");

        assert_eq!(desired.key(), detected.key());
        assert!(!desired.matches(&detected));
    }

    /// Verify the configuration shape of a binding
    #[test]
    fn test_binding_deserializes_from_management_shape() {
        let binding: BindingSpec = serde_json::from_value(json!({
            "source": "audit",
            "destination": "audit.log",
            "destination_type": "queue",
            "routing_key": "#",
            "arguments": {},
            "properties_key": "%23",
            "vhost": "/"
        }))
        .unwrap();

        assert_eq!(binding, BindingSpec::to_queue("audit", "audit.log", "#"));
    }
}
