//! Runtime secret resolution.
//!
//! Config YAML stores only env var NAMES (e.g. `rye.keys_env.api_key:
//! "RYE_API_KEY"`). Binaries call [`resolve_secrets_for_mode`] once at startup
//! and hand the result to constructors. `Debug` output is redacted and error
//! messages name the variable, never its value.
//!
//! | Mode       | Required           |
//! |------------|--------------------|
//! | PRODUCTION | commerce API key   |
//! | SANDBOX    | nothing            |

use anyhow::{bail, Result};
use serde_json::Value;

use crate::ConfigMode;

const DEFAULT_RYE_API_KEY_VAR: &str = "RYE_API_KEY";

#[derive(Clone)]
pub struct ResolvedSecrets {
    /// Commerce API key. `None` if the named env var was absent or blank.
    pub rye_api_key: Option<String>,
    /// The env var name the key was read from, for diagnostics.
    pub rye_api_key_var: String,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field(
                "rye_api_key",
                &self.rye_api_key.as_ref().map(|_| "<REDACTED>"),
            )
            .field("rye_api_key_var", &self.rye_api_key_var)
            .finish()
    }
}

fn read_str_at(config: &Value, pointer: &str) -> Option<String> {
    let s = config.pointer(pointer)?.as_str()?.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Resolve secrets from the process environment.
pub fn resolve_secrets_for_mode(config_json: &Value, mode: ConfigMode) -> Result<ResolvedSecrets> {
    resolve_secrets_with(config_json, mode, resolve_env)
}

/// Same as [`resolve_secrets_for_mode`] with an injectable lookup (tests
/// must not mutate the process environment).
pub fn resolve_secrets_with<F>(config_json: &Value, mode: ConfigMode, lookup: F) -> Result<ResolvedSecrets>
where
    F: Fn(&str) -> Option<String>,
{
    let var = read_str_at(config_json, "/rye/keys_env/api_key")
        .unwrap_or_else(|| DEFAULT_RYE_API_KEY_VAR.to_string());

    let key = lookup(&var).filter(|v| !v.trim().is_empty());

    if mode == ConfigMode::Production && key.is_none() {
        bail!(
            "SECRETS_MISSING mode=PRODUCTION: required env var '{}' (commerce api_key) is not set or empty",
            var
        );
    }

    Ok(ResolvedSecrets {
        rye_api_key: key,
        rye_api_key_var: var,
    })
}
