//! Unit tests for configuration validation

use replica_provider::controller::schema::{MAX_NAME_LENGTH, MAX_TAG_LENGTH};
use replica_provider::{Error, validate_config};

use crate::common::*;

fn assert_invalid(config: &replica_provider::DesiredConfig) {
    match validate_config(config) {
        Err(Error::ValidationError(_)) => {}
        other => panic!("expected ValidationError for {:?}, got {:?}", config, other),
    }
}

mod valid_configs {
    use super::*;

    #[test]
    fn test_minimal_config() {
        assert!(validate_config(&create_test_config("C1", "read-01")).is_ok());
    }

    #[test]
    fn test_config_with_network() {
        let config = DesiredConfigBuilder::new("C1", "read-01")
            .with_network(TEST_NETWORK)
            .build();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_config_without_tags() {
        let config = DesiredConfigBuilder::new("C1", "read-01").build();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_name_at_max_length() {
        let name = format!("r{}", "a".repeat(MAX_NAME_LENGTH - 1));
        let config = DesiredConfigBuilder::new("C1", &name).build();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_tag_charset() {
        let config = DesiredConfigBuilder::new("C1", "read-01")
            .with_tags(["env:prod", "team_db", "Billing-2"])
            .build();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_larger_sizes() {
        for size in ["db-s-1vcpu-1gb", "db-s-4vcpu-8gb", "gd-8vcpu-32gb"] {
            let config = DesiredConfigBuilder::new("C1", "read-01")
                .with_size(size)
                .build();
            assert!(validate_config(&config).is_ok(), "size {} should be valid", size);
        }
    }
}

mod invalid_configs {
    use super::*;

    #[test]
    fn test_empty_cluster_id() {
        assert_invalid(&create_test_config("", "read-01"));
    }

    #[test]
    fn test_cluster_id_with_separator() {
        assert_invalid(&create_test_config("C1/x", "read-01"));
    }

    #[test]
    fn test_empty_name() {
        assert_invalid(&create_test_config("C1", ""));
    }

    #[test]
    fn test_name_too_long() {
        let name = "r".repeat(MAX_NAME_LENGTH + 1);
        assert_invalid(&create_test_config("C1", &name));
    }

    #[test]
    fn test_name_uppercase() {
        assert_invalid(&create_test_config("C1", "Read-01"));
    }

    #[test]
    fn test_name_starting_with_digit() {
        assert_invalid(&create_test_config("C1", "1read"));
    }

    #[test]
    fn test_name_trailing_hyphen() {
        assert_invalid(&create_test_config("C1", "read-"));
    }

    #[test]
    fn test_region_without_digits() {
        let config = DesiredConfigBuilder::new("C1", "read-01")
            .with_region("nyc")
            .build();
        assert_invalid(&config);
    }

    #[test]
    fn test_size_not_a_slug() {
        for size in ["", "large", "db-s-2vcpu", "DB-S-2VCPU-4GB"] {
            let config = DesiredConfigBuilder::new("C1", "read-01")
                .with_size(size)
                .build();
            assert_invalid(&config);
        }
    }

    #[test]
    fn test_tag_too_long() {
        let tag = "t".repeat(MAX_TAG_LENGTH + 1);
        let config = DesiredConfigBuilder::new("C1", "read-01")
            .with_tags([tag.as_str()])
            .build();
        assert_invalid(&config);
    }

    #[test]
    fn test_tag_with_space() {
        let config = DesiredConfigBuilder::new("C1", "read-01")
            .with_tags(["two words"])
            .build();
        assert_invalid(&config);
    }

    #[test]
    fn test_network_not_a_uuid() {
        let config = DesiredConfigBuilder::new("C1", "read-01")
            .with_network("vpc-1")
            .build();
        assert_invalid(&config);
    }
}
