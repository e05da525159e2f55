//! Unit tests for change planning and drift detection

use replica_provider::controller::diff::{AttributeValue, ChangeAction, detect_drift, plan};
use replica_provider::controller::schema::Attribute;
use replica_provider::{PlanAction, Sensitive};

use crate::common::*;

mod planning {
    use super::*;

    #[test]
    fn test_no_previous_state_plans_create() {
        let plan = plan(None, &create_test_config("C1", "read-01"));
        assert_eq!(plan.action, PlanAction::Create);
        assert!(plan.changes.is_empty());
    }

    #[test]
    fn test_identical_config_is_noop() {
        let desired = create_test_config("C1", "read-01");
        let previous = observed_from(&desired);
        let plan = plan(Some(&previous), &desired);

        assert!(plan.is_noop());
        assert_eq!(plan.changed().count(), 0);
        // Every configurable attribute was compared
        assert_eq!(plan.changes.len(), 6);
    }

    #[test]
    fn test_size_change_updates_in_place() {
        let previous = observed_from(&create_test_config("C1", "read-01"));
        let desired = DesiredConfigBuilder::new("C1", "read-01")
            .with_size("db-s-4vcpu-8gb")
            .with_tags(["staging"])
            .build();

        let plan = plan(Some(&previous), &desired);
        assert_eq!(plan.action, PlanAction::Update);
        assert_eq!(plan.changed_attributes(), vec![Attribute::Size]);

        let request = plan.update_request();
        assert_eq!(request.size.as_deref(), Some("db-s-4vcpu-8gb"));
        assert!(request.tags.is_none());
    }

    #[test]
    fn test_size_and_tags_combine_into_one_update() {
        let previous = observed_from(&create_test_config("C1", "read-01"));
        let desired = DesiredConfigBuilder::new("C1", "read-01")
            .with_size("db-s-4vcpu-8gb")
            .with_tags(["production"])
            .build();

        let plan = plan(Some(&previous), &desired);
        assert_eq!(plan.action, PlanAction::Update);
        assert_eq!(
            plan.changed_attributes(),
            vec![Attribute::Size, Attribute::Tags]
        );

        let request = plan.update_request();
        assert_eq!(request.size.as_deref(), Some("db-s-4vcpu-8gb"));
        assert_eq!(request.tags, Some(vec!["production".to_string()]));
    }

    #[test]
    fn test_clearing_tags_sends_empty_list() {
        let previous = observed_from(&create_test_config("C1", "read-01"));
        let desired = DesiredConfigBuilder::new("C1", "read-01").build();

        let plan = plan(Some(&previous), &desired);
        assert_eq!(plan.action, PlanAction::Update);
        assert_eq!(plan.update_request().tags, Some(Vec::new()));
    }

    #[test]
    fn test_name_change_replaces() {
        let previous = observed_from(&create_test_config("C1", "read-01"));
        let desired = create_test_config("C1", "read-02");

        let plan = plan(Some(&previous), &desired);
        assert!(plan.requires_replacement());
        assert_eq!(plan.changed_attributes(), vec![Attribute::Name]);
    }

    #[test]
    fn test_replacement_stops_the_walk() {
        // Size also differs but is never compared once the name forces replacement
        let previous = observed_from(&create_test_config("C1", "read-01"));
        let desired = DesiredConfigBuilder::new("C1", "read-02")
            .with_size("db-s-4vcpu-8gb")
            .build();

        let plan = plan(Some(&previous), &desired);
        assert!(plan.requires_replacement());
        let last = plan.changes.last().unwrap();
        assert_eq!(last.attribute, Attribute::Name);
        assert_eq!(last.action, ChangeAction::Replace);
        assert!(plan.update_request().is_empty());
    }

    #[test]
    fn test_adding_network_replaces() {
        let previous = observed_from(&create_test_config("C1", "read-01"));
        let desired = DesiredConfigBuilder::new("C1", "read-01")
            .with_network(TEST_NETWORK)
            .with_tags(["staging"])
            .build();

        let plan = plan(Some(&previous), &desired);
        assert!(plan.requires_replacement());
        assert_eq!(plan.changed_attributes(), vec![Attribute::PrivateNetworkUuid]);
    }

    #[test]
    fn test_omitting_network_keeps_remote_assignment() {
        let assigned = DesiredConfigBuilder::new("C1", "read-01")
            .with_network(TEST_NETWORK)
            .with_tags(["staging"])
            .build();
        let previous = observed_from(&assigned);
        let desired = create_test_config("C1", "read-01");

        assert!(plan(Some(&previous), &desired).is_noop());
    }

    #[test]
    fn test_region_change_replaces() {
        let previous = observed_from(&create_test_config("C1", "read-01"));
        let desired = DesiredConfigBuilder::new("C1", "read-01")
            .with_region("sfo3")
            .with_tags(["staging"])
            .build();

        assert!(plan(Some(&previous), &desired).requires_replacement());
    }

    #[test]
    fn test_computed_attributes_are_ignored() {
        let desired = create_test_config("C1", "read-01");
        let mut previous = observed_from(&desired);
        previous.host = "moved.db.example.com".to_string();
        previous.password = Sensitive::new("rotated");

        assert!(plan(Some(&previous), &desired).is_noop());
    }

    #[test]
    fn test_tag_order_is_insignificant() {
        let desired = DesiredConfigBuilder::new("C1", "read-01")
            .with_tags(["b", "a", "a"])
            .build();
        let mut previous = observed_from(&desired);
        previous.tags = ["a", "b"].into_iter().map(String::from).collect();

        assert!(plan(Some(&previous), &desired).is_noop());
    }
}

mod values {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_empty_set_equals_absent() {
        let empty = AttributeValue::Set(BTreeSet::new());
        assert!(empty.equivalent(&AttributeValue::Absent));
        assert!(AttributeValue::Text(String::new()).equivalent(&AttributeValue::Absent));
    }

    #[test]
    fn test_display() {
        let set = AttributeValue::Set(["a".to_string(), "b".to_string()].into_iter().collect());
        assert_eq!(set.to_string(), r#"["a", "b"]"#);
        assert_eq!(AttributeValue::Absent.to_string(), "<absent>");
    }
}

mod drift {
    use super::*;

    #[test]
    fn test_no_drift() {
        let state = observed_from(&create_test_config("C1", "read-01"));
        assert!(detect_drift(&state, &state.clone()).is_empty());
    }

    #[test]
    fn test_out_of_band_resize() {
        let persisted = observed_from(&create_test_config("C1", "read-01"));
        let mut live = persisted.clone();
        live.size = "db-s-4vcpu-8gb".to_string();
        live.host = "elsewhere".to_string();

        let drift = detect_drift(&persisted, &live);
        assert_eq!(drift.len(), 1);
        assert_eq!(drift[0].attribute, Attribute::Size);
        assert_eq!(drift[0].action, ChangeAction::Update);
    }

    #[test]
    fn test_out_of_band_network_change() {
        let persisted = observed_from(&create_test_config("C1", "read-01"));
        let mut live = persisted.clone();
        live.private_network_uuid = Some(TEST_NETWORK.to_string());

        let drift = detect_drift(&persisted, &live);
        assert_eq!(drift.len(), 1);
        assert_eq!(drift[0].action, ChangeAction::Replace);
    }
}
