//! Runtime secret resolution.
//!
//! This module is the **single source of truth** for secrets.
//!
//! # Contract
//! - Config YAML stores only **env var NAMES** (e.g. `"LEDGER_WEBHOOK_KEY"`),
//!   under `secrets.*_env` keys.
//! - The daemon calls [`resolve_secrets`] once at startup and threads the
//!   returned [`ResolvedSecrets`] into constructors; no other code reads
//!   `std::env::var`.
//! - `Debug` output **redacts** values; error messages reference the env var
//!   NAME, never the value.
//!
//! # Enforcement
//! - The webhook signing key is always required: without it no callback can
//!   be verified and no card token can be minted.
//! - The inference API key is required only when `accounting.l2.enabled`.
//! - The card channel URL is optional; when absent, outbox dispatch logs and
//!   drops instead of POSTing (useful for offline runs).

use anyhow::{bail, Result};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// All runtime-resolved secrets, built once at startup.
#[derive(Clone)]
pub struct ResolvedSecrets {
    /// HMAC-SHA256 key for card tokens and webhook signatures.
    pub webhook_signing_key: String,
    /// API key for the external inference provider. `None` when L2 is off.
    pub inference_api_key: Option<String>,
    /// Outbound card delivery endpoint. `None` disables real delivery.
    pub card_channel_url: Option<String>,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field("webhook_signing_key", &"<REDACTED>")
            .field(
                "inference_api_key",
                &self.inference_api_key.as_ref().map(|_| "<REDACTED>"),
            )
            .field(
                "card_channel_url",
                &self.card_channel_url.as_ref().map(|_| "<REDACTED>"),
            )
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Default env var names used when the config omits `secrets.*_env`.
const DEFAULT_WEBHOOK_KEY_VAR: &str = "LEDGERDESK_WEBHOOK_KEY";
const DEFAULT_INFERENCE_KEY_VAR: &str = "LEDGERDESK_INFERENCE_KEY";
const DEFAULT_CHANNEL_URL_VAR: &str = "LEDGERDESK_CARD_CHANNEL_URL";

fn env_name(config: &Value, key: &str, default: &str) -> String {
    config
        .pointer(&format!("/secrets/{key}"))
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

fn read_env(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Resolve all secrets from the environment using the names declared in
/// config. `l2_enabled` controls whether the inference key is mandatory.
pub fn resolve_secrets(config_json: &Value, l2_enabled: bool) -> Result<ResolvedSecrets> {
    let webhook_var = env_name(config_json, "webhook_key_env", DEFAULT_WEBHOOK_KEY_VAR);
    let inference_var = env_name(config_json, "inference_key_env", DEFAULT_INFERENCE_KEY_VAR);
    let channel_var = env_name(config_json, "card_channel_url_env", DEFAULT_CHANNEL_URL_VAR);

    let Some(webhook_signing_key) = read_env(&webhook_var) else {
        bail!("missing required secret: env var {webhook_var} is unset or empty");
    };

    let inference_api_key = read_env(&inference_var);
    if l2_enabled && inference_api_key.is_none() {
        bail!("accounting.l2.enabled but env var {inference_var} is unset or empty");
    }

    Ok(ResolvedSecrets {
        webhook_signing_key,
        inference_api_key,
        card_channel_url: read_env(&channel_var),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // NOTE: env-var mutation keeps each test on a unique var name to stay
    // independent of test-thread interleaving.

    #[test]
    fn missing_webhook_key_fails_with_var_name() {
        let cfg = json!({"secrets": {"webhook_key_env": "TEST_SECRETS_ABSENT_KEY"}});
        let err = resolve_secrets(&cfg, false).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("TEST_SECRETS_ABSENT_KEY"));
        // The value must never appear (there is none, but guard the shape).
        assert!(!msg.to_lowercase().contains("redacted"));
    }

    #[test]
    fn l2_enabled_requires_inference_key() {
        std::env::set_var("TEST_SECRETS_WEBHOOK_A", "hunter2");
        let cfg = json!({"secrets": {
            "webhook_key_env": "TEST_SECRETS_WEBHOOK_A",
            "inference_key_env": "TEST_SECRETS_INFERENCE_ABSENT",
        }});
        assert!(resolve_secrets(&cfg, true).is_err());
        assert!(resolve_secrets(&cfg, false).is_ok());
    }

    #[test]
    fn debug_redacts_values() {
        std::env::set_var("TEST_SECRETS_WEBHOOK_B", "super-secret-value");
        let cfg = json!({"secrets": {"webhook_key_env": "TEST_SECRETS_WEBHOOK_B"}});
        let resolved = resolve_secrets(&cfg, false).unwrap();
        let dbg = format!("{resolved:?}");
        assert!(!dbg.contains("super-secret-value"));
        assert!(dbg.contains("<REDACTED>"));
    }

    #[test]
    fn empty_env_value_treated_as_missing() {
        std::env::set_var("TEST_SECRETS_WEBHOOK_C", "   ");
        let cfg = json!({"secrets": {"webhook_key_env": "TEST_SECRETS_WEBHOOK_C"}});
        assert!(resolve_secrets(&cfg, false).is_err());
    }
}
