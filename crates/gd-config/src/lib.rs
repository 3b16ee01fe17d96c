//! Layered YAML configuration.
//!
//! Documents are merged in order (earlier = base, later = override),
//! canonicalized to JSON and hashed. YAML holds env var NAMES only; literal
//! secrets are rejected at load time. Typed settings are extracted from the
//! merged JSON with serde defaults so a partial overlay stays valid.

pub mod secrets;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs;

pub use secrets::{resolve_secrets_for_mode, resolve_secrets_with, ResolvedSecrets};

/// Env var holding comma-separated YAML paths in merge order.
pub const ENV_CONFIG_PATHS: &str = "GIFTDRIVE_CONFIG";

/// Leaf string values starting with one of these abort the load with
/// CONFIG_SECRET_DETECTED.
const SECRET_PREFIXES: &[&str] = &[
    "sk-",        // OpenAI style
    "sk_live",    // Stripe live
    "sk_test",    // Stripe test
    "AKIA",       // AWS access key ID
    "-----BEGIN", // PEM private keys
    "ghp_",       // GitHub PAT
    "glpat-",     // GitLab PAT
    "xoxb-",      // Slack bot token
    "RYE-",       // commerce API key
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigMode {
    /// Local development / staging against the commerce sandbox.
    Sandbox,
    Production,
}

impl ConfigMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigMode::Sandbox => "SANDBOX",
            ConfigMode::Production => "PRODUCTION",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SANDBOX" => Ok(ConfigMode::Sandbox),
            "PRODUCTION" => Ok(ConfigMode::Production),
            other => bail!("invalid mode '{other}'. expected one of: SANDBOX | PRODUCTION"),
        }
    }
}

// ---------------------------------------------------------------------------
// Typed settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RyeSettings {
    pub endpoint: String,
    /// Sent as `Rye-Shopper-IP`; the API requires it on every request.
    pub shopper_ip: String,
    pub timeout_secs: u64,
}

impl Default for RyeSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://staging.graphql.api.rye.com/v1/query".to_string(),
            shopper_ip: "127.0.0.1".to_string(),
            timeout_secs: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CartSettings {
    /// Rebuild an expired remote cart from the local mirror on read.
    pub recreate_expired: bool,
}

impl Default for CartSettings {
    fn default() -> Self {
        Self {
            recreate_expired: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub mode: Option<String>,
    pub rye: RyeSettings,
    pub cart: CartSettings,
}

impl Settings {
    pub fn from_config_json(v: &Value) -> Result<Self> {
        serde_json::from_value(v.clone()).context("config does not match settings schema")
    }

    /// `mode` key, defaulting to SANDBOX.
    pub fn config_mode(&self) -> Result<ConfigMode> {
        match self.mode.as_deref() {
            Some(m) => ConfigMode::parse(m),
            None => Ok(ConfigMode::Sandbox),
        }
    }
}

// ---------------------------------------------------------------------------
// Unused-key guard
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnusedKeyPolicy {
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnusedKeyReport {
    pub mode: String,
    pub consumed_prefixes: Vec<String>,
    pub unused_leaf_pointers: Vec<String>,
}

impl UnusedKeyReport {
    pub fn is_clean(&self) -> bool {
        self.unused_leaf_pointers.is_empty()
    }
}

/// JSON-pointer prefixes actually read by code in each mode.
pub fn consumed_pointers_for_mode(mode: ConfigMode) -> &'static [&'static str] {
    match mode {
        ConfigMode::Sandbox => &[
            "/mode",
            "/rye/endpoint",
            "/rye/shopper_ip",
            "/rye/timeout_secs",
            "/rye/keys_env/api_key",
            "/cart/recreate_expired",
        ],
        ConfigMode::Production => &[
            "/mode",
            "/rye/endpoint",
            "/rye/shopper_ip",
            "/rye/timeout_secs",
            "/rye/keys_env/api_key",
            "/cart/recreate_expired",
        ],
    }
}

/// With `Fail`, unused keys are an error; with `Warn` the report is returned.
pub fn report_unused_keys(
    mode: ConfigMode,
    config_json: &Value,
    policy: UnusedKeyPolicy,
) -> Result<UnusedKeyReport> {
    let consumed: BTreeSet<String> = consumed_pointers_for_mode(mode)
        .iter()
        .map(|p| normalize_pointer(p))
        .collect();
    let consumed_prefixes: Vec<String> = consumed.into_iter().collect();

    let mut leaves: Vec<String> = Vec::new();
    collect_leaf_pointers(config_json, "", &mut leaves);

    let mut unused: Vec<String> = leaves
        .into_iter()
        .filter(|lp| !consumed_prefixes.iter().any(|cp| is_prefix_pointer(cp, lp)))
        .collect();
    unused.sort();
    unused.dedup();

    let report = UnusedKeyReport {
        mode: mode.as_str().to_string(),
        consumed_prefixes,
        unused_leaf_pointers: unused,
    };

    if policy == UnusedKeyPolicy::Fail && !report.is_clean() {
        bail!(
            "CONFIG_UNUSED_KEYS (mode={}): {} unused config leaf key(s): {:?}",
            report.mode,
            report.unused_leaf_pointers.len(),
            report.unused_leaf_pointers.iter().take(12).collect::<Vec<_>>()
        );
    }

    Ok(report)
}

fn normalize_pointer(p: &str) -> String {
    let mut s = p.trim().to_string();
    if s.is_empty() {
        return "/".to_string();
    }
    if !s.starts_with('/') {
        s.insert(0, '/');
    }
    while s.ends_with('/') && s.len() > 1 {
        s.pop();
    }
    s
}

/// "/a/b" consumes "/a/b/c" but NOT "/a/bc".
fn is_prefix_pointer(prefix: &str, leaf: &str) -> bool {
    if prefix == "/" || leaf == prefix {
        return true;
    }
    leaf.strip_prefix(prefix)
        .map(|rest| rest.starts_with('/'))
        .unwrap_or(false)
}

fn collect_leaf_pointers(v: &Value, prefix: &str, out: &mut Vec<String>) {
    match v {
        Value::Object(map) => {
            for (k, vv) in map.iter() {
                let next = format!("{}/{}", prefix, k.replace('~', "~0").replace('/', "~1"));
                collect_leaf_pointers(vv, &next, out);
            }
        }
        Value::Array(arr) => {
            for (i, vv) in arr.iter().enumerate() {
                collect_leaf_pointers(vv, &format!("{prefix}/{i}"), out);
            }
        }
        _ => out.push(if prefix.is_empty() {
            "/".to_string()
        } else {
            prefix.to_string()
        }),
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_hash: String,
    pub canonical_json: String,
    pub config_json: Value,
}

impl LoadedConfig {
    pub fn settings(&self) -> Result<Settings> {
        Settings::from_config_json(&self.config_json)
    }
}

pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut docs: Vec<String> = Vec::new();
    for p in paths {
        let raw =
            fs::read_to_string(p).with_context(|| format!("failed to read yaml path: {p}"))?;
        docs.push(raw);
    }
    let doc_refs: Vec<&str> = docs.iter().map(|s| s.as_str()).collect();
    load_layered_yaml_from_strings(&doc_refs)
}

/// Load from `GIFTDRIVE_CONFIG`; an unset variable yields the built-in defaults.
pub fn load_from_env() -> Result<LoadedConfig> {
    match std::env::var(ENV_CONFIG_PATHS) {
        Ok(v) if !v.trim().is_empty() => {
            let paths: Vec<&str> = v
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .collect();
            load_layered_yaml(&paths)
        }
        _ => load_layered_yaml_from_strings(&[]),
    }
}

pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    let mut merged = serde_json::json!({});
    for raw in yaml_docs {
        let v_yaml: serde_yaml::Value = serde_yaml::from_str(raw).context("invalid yaml")?;
        let v_json = serde_json::to_value(v_yaml).context("yaml->json conversion failed")?;
        merged = deep_merge(merged, v_json);
    }

    enforce_no_secret_literals(&merged)?;

    // serde_json::Map is BTreeMap-backed here, so serialization is key-sorted.
    let canonical_json =
        serde_json::to_string(&merged).context("canonical json serialize failed")?;
    let config_hash = sha256_hex(canonical_json.as_bytes());
    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        config_json: merged,
    })
}

fn deep_merge(a: Value, b: Value) -> Value {
    match (a, b) {
        (Value::Object(mut a_map), Value::Object(b_map)) => {
            for (k, b_val) in b_map {
                let a_val = a_map.remove(&k).unwrap_or(Value::Null);
                a_map.insert(k, deep_merge(a_val, b_val));
            }
            Value::Object(a_map)
        }
        // An empty YAML document parses to null and must not wipe the base.
        (a_other, Value::Null) => a_other,
        (_, b_other) => b_other,
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn enforce_no_secret_literals(v: &Value) -> Result<()> {
    let mut leaves = Vec::new();
    collect_leaf_pointers(v, "", &mut leaves);

    for ptr in leaves {
        if let Some(s) = v.pointer(&ptr).and_then(Value::as_str) {
            if looks_like_secret(s) {
                bail!("CONFIG_SECRET_DETECTED leaf={} value=REDACTED", ptr);
            }
        }
    }
    Ok(())
}

fn looks_like_secret(s: &str) -> bool {
    let t = s.trim();
    t.len() >= 8 && SECRET_PREFIXES.iter().any(|p| t.starts_with(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_pointer_respects_segment_boundary() {
        assert!(is_prefix_pointer("/rye", "/rye/endpoint"));
        assert!(is_prefix_pointer("/rye/endpoint", "/rye/endpoint"));
        assert!(!is_prefix_pointer("/rye", "/ryes/endpoint"));
        assert!(is_prefix_pointer("/", "/anything"));
    }

    #[test]
    fn empty_overlay_document_keeps_base() {
        let c = load_layered_yaml_from_strings(&["rye:\n  timeout_secs: 5\n", ""]).unwrap();
        assert_eq!(c.settings().unwrap().rye.timeout_secs, 5);
    }

    #[test]
    fn defaults_apply_when_no_documents() {
        let c = load_layered_yaml_from_strings(&[]).unwrap();
        let s = c.settings().unwrap();
        assert!(s.cart.recreate_expired);
        assert_eq!(s.config_mode().unwrap(), ConfigMode::Sandbox);
    }
}
