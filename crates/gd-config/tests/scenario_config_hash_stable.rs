//! Layered config hashing must be deterministic and order-insensitive
//! within a document, but sensitive to values and layer order.

use gd_config::load_layered_yaml_from_strings;

const BASE_YAML: &str = r#"
mode: "SANDBOX"
rye:
  endpoint: "https://staging.graphql.api.rye.com/v1/query"
  shopper_ip: "127.0.0.1"
  keys_env:
    api_key: "RYE_API_KEY"
cart:
  recreate_expired: true
"#;

const BASE_YAML_REORDERED: &str = r#"
cart:
  recreate_expired: true
rye:
  keys_env:
    api_key: "RYE_API_KEY"
  shopper_ip: "127.0.0.1"
  endpoint: "https://staging.graphql.api.rye.com/v1/query"
mode: "SANDBOX"
"#;

const PRODUCTION_OVERLAY: &str = r#"
mode: "PRODUCTION"
rye:
  endpoint: "https://graphql.api.rye.com/v1/query"
"#;

#[test]
fn same_input_produces_identical_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
    assert_eq!(a.canonical_json, b.canonical_json);
}

#[test]
fn key_order_does_not_change_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML_REORDERED]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
}

#[test]
fn overlay_changes_hash_and_overrides_values() {
    let base = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let prod = load_layered_yaml_from_strings(&[BASE_YAML, PRODUCTION_OVERLAY]).unwrap();
    assert_ne!(base.config_hash, prod.config_hash);

    let s = prod.settings().unwrap();
    assert_eq!(s.rye.endpoint, "https://graphql.api.rye.com/v1/query");
    assert_eq!(s.rye.shopper_ip, "127.0.0.1", "untouched base value survives");
    assert_eq!(s.config_mode().unwrap(), gd_config::ConfigMode::Production);
}

#[test]
fn hash_is_64_hex_chars() {
    let c = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    assert_eq!(c.config_hash.len(), 64);
    assert!(c.config_hash.chars().all(|ch| ch.is_ascii_hexdigit()));
}
