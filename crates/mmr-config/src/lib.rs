//! Layered YAML configuration.
//!
//! Documents merge in order (later overrides earlier), are canonicalized to
//! JSON and SHA-256 hashed so a run can record exactly which configuration
//! it used. Secrets never appear as literal values: the YAML names the env
//! var that holds them (see [`secrets`]).

use std::fs;

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

mod processor;
pub mod secrets;

pub use processor::{
    AuthConfig, DatabaseConfig, LedgerConfig, ProcessorConfig, ReviewConfig, SubmissionApiConfig,
    TopicsConfig,
};
pub use secrets::{resolve_secrets, resolve_secrets_with, ResolvedSecrets};

/// A string leaf starting with one of these aborts loading.
const SECRET_PREFIXES: &[&str] = &[
    // Credentials this service actually handles.
    "eyJ",
    "postgres://",
    "postgresql://",
    // Common pasted keys.
    "-----BEGIN",
    "AKIA",
    "ghp_",
    "sk-",
    "sk_live",
    "sk_test",
];

/// Strings shorter than this are never treated as secrets.
const MIN_SECRET_LEN: usize = 8;

/// Merged configuration plus its canonical form and hash.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Hex SHA-256 of `canonical_json`.
    pub config_hash: String,
    pub canonical_json: String,
    pub config_json: Value,
}

impl LoadedConfig {
    /// Typed view with defaults for every absent key.
    pub fn processor_config(&self) -> Result<ProcessorConfig> {
        ProcessorConfig::from_json(&self.config_json)
    }
}

/// Read and merge YAML files, first to last.
pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let docs = paths
        .iter()
        .map(|p| fs::read_to_string(p).with_context(|| format!("read config layer {p}")))
        .collect::<Result<Vec<String>>>()?;
    let refs: Vec<&str> = docs.iter().map(String::as_str).collect();
    load_layered_yaml_from_strings(&refs)
}

pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Map::new());
    for (i, raw) in yaml_docs.iter().enumerate() {
        let layer: serde_yaml::Value =
            serde_yaml::from_str(raw).with_context(|| format!("config layer {i} is not YAML"))?;
        // An empty document is a no-op layer.
        if layer.is_null() {
            continue;
        }
        let layer = serde_json::to_value(layer)
            .with_context(|| format!("config layer {i} has no JSON form"))?;
        overlay(&mut merged, layer);
    }

    if let Some(pointer) = first_secret_literal(&merged, &mut String::new()) {
        bail!("CONFIG_SECRET_DETECTED leaf={pointer} value=REDACTED");
    }

    // serde_json's default map is ordered by key, so this is canonical.
    let canonical_json = serde_json::to_string(&merged).context("serialize canonical config")?;
    let config_hash = hex::encode(Sha256::digest(canonical_json.as_bytes()));
    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        config_json: merged,
    })
}

/// Objects merge key by key; anything else in `layer` replaces `base`.
fn overlay(base: &mut Value, layer: Value) {
    match (base, layer) {
        (Value::Object(base_map), Value::Object(layer_map)) => {
            for (key, value) in layer_map {
                overlay(base_map.entry(key).or_insert(Value::Null), value);
            }
        }
        (slot, value) => *slot = value,
    }
}

/// JSON pointer of the first string leaf that looks like a secret.
fn first_secret_literal(v: &Value, pointer: &mut String) -> Option<String> {
    let here = pointer.len();
    let found = match v {
        Value::String(s) if looks_like_secret(s) => Some(pointer.clone()),
        Value::Object(map) => map.iter().find_map(|(key, child)| {
            pointer.truncate(here);
            pointer.push('/');
            pointer.push_str(&key.replace('~', "~0").replace('/', "~1"));
            first_secret_literal(child, pointer)
        }),
        Value::Array(items) => items.iter().enumerate().find_map(|(i, child)| {
            pointer.truncate(here);
            pointer.push('/');
            pointer.push_str(&i.to_string());
            first_secret_literal(child, pointer)
        }),
        _ => None,
    };
    pointer.truncate(here);
    found
}

fn looks_like_secret(s: &str) -> bool {
    let s = s.trim();
    s.len() >= MIN_SECRET_LEN && SECRET_PREFIXES.iter().any(|p| s.starts_with(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_layers_override_nested_keys_only() {
        let loaded = load_layered_yaml_from_strings(&[
            "ledger:\n  round_type_id: 13\n  language_id: 9\n",
            "ledger:\n  language_id: 4\n",
        ])
        .unwrap();
        assert_eq!(loaded.config_json.pointer("/ledger/round_type_id"), Some(&Value::from(13)));
        assert_eq!(loaded.config_json.pointer("/ledger/language_id"), Some(&Value::from(4)));
    }

    #[test]
    fn empty_layer_is_a_noop() {
        let a = load_layered_yaml_from_strings(&["ledger:\n  language_id: 9\n"]).unwrap();
        let b = load_layered_yaml_from_strings(&["ledger:\n  language_id: 9\n", ""]).unwrap();
        assert_eq!(a.config_hash, b.config_hash);
    }

    #[test]
    fn short_strings_are_never_secrets() {
        assert!(!looks_like_secret("sk-1"));
        assert!(looks_like_secret("postgres://u:p@db/mmr"));
    }
}
