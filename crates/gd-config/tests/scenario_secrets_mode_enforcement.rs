use gd_config::{
    load_layered_yaml_from_strings, report_unused_keys, resolve_secrets_with, ConfigMode,
    UnusedKeyPolicy,
};
use serde_json::json;

#[test]
fn literal_secret_in_yaml_is_rejected() {
    let err = load_layered_yaml_from_strings(&["rye:\n  api_key: \"sk_live_abcdefgh123\"\n"])
        .unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("CONFIG_SECRET_DETECTED"), "{msg}");
    assert!(!msg.contains("sk_live_abcdefgh123"), "value must be redacted");
}

#[test]
fn production_requires_api_key_and_names_the_variable() {
    let cfg = json!({"rye": {"keys_env": {"api_key": "GD_TEST_RYE_KEY"}}});
    let err = resolve_secrets_with(&cfg, ConfigMode::Production, |_| None).unwrap_err();
    assert!(err.to_string().contains("GD_TEST_RYE_KEY"));
}

#[test]
fn sandbox_tolerates_missing_key() {
    let cfg = json!({});
    let s = resolve_secrets_with(&cfg, ConfigMode::Sandbox, |_| None).unwrap();
    assert!(s.rye_api_key.is_none());
    assert_eq!(s.rye_api_key_var, "RYE_API_KEY");
}

#[test]
fn debug_output_redacts_key() {
    let cfg = json!({});
    let s = resolve_secrets_with(&cfg, ConfigMode::Production, |name| {
        (name == "RYE_API_KEY").then(|| "super-secret-value".to_string())
    })
    .unwrap();
    let dbg = format!("{s:?}");
    assert!(dbg.contains("<REDACTED>"));
    assert!(!dbg.contains("super-secret-value"));
}

#[test]
fn unused_keys_are_reported_and_fail_policy_errors() {
    let cfg = json!({"rye": {"endpoint": "x", "legacy_flag": true}, "mode": "SANDBOX"});
    let r = report_unused_keys(ConfigMode::Sandbox, &cfg, UnusedKeyPolicy::Warn).unwrap();
    assert_eq!(r.unused_leaf_pointers, vec!["/rye/legacy_flag".to_string()]);

    let err = report_unused_keys(ConfigMode::Sandbox, &cfg, UnusedKeyPolicy::Fail).unwrap_err();
    assert!(err.to_string().contains("CONFIG_UNUSED_KEYS"));
}
