use plugpack::Record;

use crate::record::*;

// ============================================================================
//  Paths
// ============================================================================

#[test]
fn test_parent_and_name() {
    let node = StorageNode::new(":Devices:laptop", "p");
    assert_eq!(node.name(), "laptop");
    assert_eq!(node.parent(), Some(":Devices"));
    assert_eq!(parent_of(":Devices"), Some(":"));
    assert_eq!(parent_of(":"), None);
    assert_eq!(parent_of("loose"), None);
}

// ============================================================================
//  Search criteria
// ============================================================================

fn sample() -> StorageNode {
    StorageNode::new(":Devices:laptop", "inventory")
        .with_value("os", "linux")
        .with_value("owner", "ana")
}

#[test]
fn test_empty_criteria_match_everything() {
    assert!(SearchCriteria::default().matches(&sample()));
}

#[test]
fn test_each_field_filters() {
    let node = sample();
    assert!(SearchCriteria::under(":Devices").matches(&node));
    assert!(!SearchCriteria::under(":Users").matches(&node));

    assert!(SearchCriteria::default().owned_by("inventory").matches(&node));
    assert!(!SearchCriteria::default().owned_by("other").matches(&node));

    assert!(SearchCriteria::default().with_key("os").matches(&node));
    assert!(!SearchCriteria::default().with_key("cpu").matches(&node));

    assert!(SearchCriteria::default().with_value("ana").matches(&node));
    assert!(!SearchCriteria::default().with_value("bob").matches(&node));
}

#[test]
fn test_key_and_value_must_pair() {
    let node = sample();
    assert!(SearchCriteria::default().with_key("os").with_value("linux").matches(&node));
    // value exists, but under a different key
    assert!(!SearchCriteria::default().with_key("os").with_value("ana").matches(&node));
}

#[test]
fn test_criteria_conjunction() {
    let node = sample();
    let criteria = SearchCriteria::under(":Devices").owned_by("inventory").with_key("os");
    assert!(criteria.matches(&node));
    assert!(!criteria.clone().owned_by("someone").matches(&node));
}

// ============================================================================
//  Payloads
// ============================================================================

#[test]
fn test_node_record_preserves_children_and_values() {
    let mut node = sample();
    node.children = vec!["battery".into(), "screen".into()];
    let decoded = StorageNode::from_bytes(&node.to_bytes().unwrap()).unwrap();
    assert_eq!(decoded, node);
}

#[test]
fn test_partial_criteria_record() {
    let criteria = SearchCriteria::default().with_value("linux");
    let decoded = SearchCriteria::from_bytes(&criteria.to_bytes().unwrap()).unwrap();
    assert_eq!(decoded, criteria);
    assert_eq!(decoded.path_prefix, None);
}

#[test]
fn test_payload_lists() {
    let nodes = vec![sample(), StorageNode::new(":a", "b")];
    assert_eq!(decode_nodes(&encode_nodes(&nodes).unwrap()).unwrap(), nodes);
    assert!(decode_nodes(&encode_nodes(&[]).unwrap()).unwrap().is_empty());

    let names = vec!["x".to_string(), String::new()];
    assert_eq!(decode_names(&encode_names(&names).unwrap()).unwrap(), names);

    assert!(decode_flag(&encode_flag(true)).unwrap());
    assert!(decode_flag(&[]).is_err());
}

#[test]
fn test_trailing_bytes_rejected() {
    let mut bytes = encode_flag(false);
    bytes.push(0);
    assert!(decode_flag(&bytes).is_err());
}
