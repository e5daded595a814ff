use anyhow::{Context, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;

pub mod secrets;
pub mod typed;

pub use secrets::{resolve_secrets, ResolvedSecrets};
pub use typed::LedgerConfig;

/// Environment variables with this prefix override config keys.
///
/// Mapping convention: strip the prefix, lowercase, split on double
/// underscore for nesting. Single underscores stay inside the key:
/// `LEDGER_STORE__BUSY_TIMEOUT_MS=5000` -> `store.busy_timeout_ms = 5000`.
pub const ENV_PREFIX: &str = "LEDGER_";

/// Load + merge YAML files in order, apply environment overrides, then
/// canonicalize to JSON and hash. Later files override earlier files via
/// deep-merge; env overrides win over every file.
pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Default::default());

    for p in paths {
        let s = fs::read_to_string(p).with_context(|| format!("read config: {p}"))?;
        let yaml_val: serde_yaml::Value =
            serde_yaml::from_str(&s).with_context(|| format!("parse yaml: {p}"))?;
        let json_val = serde_json::to_value(yaml_val).context("yaml->json conversion failed")?;
        deep_merge(&mut merged, json_val);
    }

    let overrides: Vec<(String, String)> = std::env::vars()
        .filter(|(k, _)| k.starts_with(ENV_PREFIX))
        .collect();
    apply_env_overrides(&mut merged, &overrides);

    finish(merged)
}

/// Build a `LoadedConfig` from an already-assembled JSON value.
/// Used by tests and by the daemon's SIGHUP reload path.
pub fn from_value(merged: Value) -> Result<LoadedConfig> {
    finish(merged)
}

fn finish(merged: Value) -> Result<LoadedConfig> {
    // Canonicalize (stable key order) so the hash is independent of merge
    // order, then hash the canonical bytes.
    let canonical = canonicalize_json(&merged);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let hash = hex::encode(hasher.finalize());

    Ok(LoadedConfig {
        config_json: serde_json::from_str(&canonical).context("canonical json parse failed")?,
        canonical_json: canonical,
        config_hash: hash,
    })
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_json: Value,
    pub canonical_json: String,
    pub config_hash: String,
}

impl LoadedConfig {
    /// Deserialize the typed view. Unknown keys are ignored; missing keys
    /// take their documented defaults.
    pub fn typed(&self) -> Result<LedgerConfig> {
        serde_json::from_value(self.config_json.clone()).context("typed config decode failed")
    }
}

/// Apply `LEDGER_`-prefixed environment overrides onto the merged tree.
///
/// Values parse as JSON scalars when possible (`5000` -> number,
/// `true` -> bool), otherwise they are taken as strings.
pub fn apply_env_overrides(merged: &mut Value, vars: &[(String, String)]) {
    for (key, raw) in vars {
        let Some(stripped) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let path: Vec<String> = stripped
            .to_ascii_lowercase()
            .split("__")
            .map(|s| s.to_string())
            .collect();
        if path.iter().any(|s| s.is_empty()) {
            continue;
        }

        let val = serde_json::from_str::<Value>(raw)
            .ok()
            .filter(|v| v.is_number() || v.is_boolean())
            .unwrap_or_else(|| Value::String(raw.clone()));

        set_path(merged, &path, val);
    }
}

fn set_path(root: &mut Value, path: &[String], val: Value) {
    if !root.is_object() {
        *root = Value::Object(Default::default());
    }
    let mut cursor = root;
    for (i, seg) in path.iter().enumerate() {
        let map = cursor.as_object_mut().expect("cursor kept as object");
        if i == path.len() - 1 {
            map.insert(seg.clone(), val);
            return;
        }
        let next = map
            .entry(seg.clone())
            .or_insert_with(|| Value::Object(Default::default()));
        if !next.is_object() {
            *next = Value::Object(Default::default());
        }
        cursor = next;
    }
}

/// Deep-merge: objects merge recursively; arrays replaced; scalars overwritten.
fn deep_merge(dst: &mut Value, src: Value) {
    match (dst, src) {
        (Value::Object(dst_map), Value::Object(src_map)) => {
            for (k, v) in src_map {
                match dst_map.get_mut(&k) {
                    Some(existing) => deep_merge(existing, v),
                    None => {
                        dst_map.insert(k, v);
                    }
                }
            }
        }
        (dst_slot, src_val) => {
            *dst_slot = src_val;
        }
    }
}

/// Canonicalize JSON by sorting all object keys recursively and emitting compact JSON.
fn canonicalize_json(v: &Value) -> String {
    let sorted = sort_keys(v);
    serde_json::to_string(&sorted).expect("json serialization must not fail")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}
