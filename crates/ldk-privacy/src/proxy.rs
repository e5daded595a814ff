//! The single choke point for outbound requests.
//!
//! Every payload is sanitized (string values recursively), the destination
//! is checked against the allowlist, trace metadata is attached, and the
//! token budget is consulted before anything leaves the process. Transient
//! transport failures retry with exponential backoff plus full jitter.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use ldk_schemas::TraceContext;

use crate::budget::TokenBudget;
use crate::guard::PrivacyGuard;

/// Errors surfaced by the egress proxy.
#[derive(Debug, Error)]
pub enum EgressError {
    #[error("destination not on allowlist: {host}")]
    DestinationNotAllowed { host: String },

    #[error("token budget exhausted ({period}): used {used} of {cap}")]
    BudgetExhausted {
        period: &'static str,
        used: i64,
        cap: i64,
    },

    #[error("egress transport failed: {0}")]
    Transport(String),

    #[error("egress request timed out")]
    Timeout,

    #[error("upstream returned status {status}")]
    UpstreamStatus { status: u16 },
}

impl EgressError {
    /// Transient errors are retried by the proxy itself; the rest are
    /// surfaced immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EgressError::Transport(_)
                | EgressError::Timeout
                | EgressError::UpstreamStatus { status: 500..=599 }
        )
    }
}

/// Outbound HTTP proxy enforcing sanitization, allowlisting, and budgets.
#[derive(Clone)]
pub struct EgressProxy {
    guard: Arc<PrivacyGuard>,
    allowlist: Vec<String>,
    http: reqwest::Client,
    budget: Option<TokenBudget>,
    max_retries: u32,
    backoff_base_ms: u64,
}

impl EgressProxy {
    pub fn new(
        guard: Arc<PrivacyGuard>,
        allowlist: Vec<String>,
        budget: Option<TokenBudget>,
        max_retries: u32,
        backoff_base_ms: u64,
        request_timeout_s: u64,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(request_timeout_s.max(1)))
            .build()
            .unwrap_or_default();
        Self {
            guard,
            allowlist,
            http,
            budget,
            max_retries,
            backoff_base_ms,
        }
    }

    /// Sanitize every string value in a JSON tree. Returns the cleaned tree
    /// plus merged per-category redaction counts.
    pub fn sanitize_value(&self, value: &Value) -> (Value, BTreeMap<String, usize>) {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        let cleaned = self.sanitize_rec(value, &mut counts);
        (cleaned, counts)
    }

    fn sanitize_rec(&self, value: &Value, counts: &mut BTreeMap<String, usize>) -> Value {
        match value {
            Value::String(s) => {
                let sanitized = self.guard.sanitize(s);
                for (cat, n) in &sanitized.redactions {
                    *counts.entry(cat.clone()).or_insert(0) += n;
                }
                Value::String(sanitized.text)
            }
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.sanitize_rec(v, counts)).collect())
            }
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), self.sanitize_rec(v, counts));
                }
                Value::Object(out)
            }
            other => other.clone(),
        }
    }

    /// Check a URL's host against the allowlist.
    pub fn destination_allowed(&self, url: &str) -> Result<(), EgressError> {
        let host = reqwest::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .ok_or_else(|| EgressError::Transport(format!("unparseable url: {url}")))?;
        if self
            .allowlist
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&host))
        {
            Ok(())
        } else {
            Err(EgressError::DestinationNotAllowed { host })
        }
    }

    /// POST a JSON payload to an allowlisted destination.
    ///
    /// Sanitization always runs here; upstream sanitization by the caller is
    /// welcome but never trusted. `bearer` (e.g. an API key) is attached as
    /// an `Authorization` header and is exempt from payload sanitization by
    /// construction (it never enters the body).
    pub async fn post_json(
        &self,
        ctx: &TraceContext,
        url: &str,
        payload: &Value,
        bearer: Option<&str>,
    ) -> Result<Value, EgressError> {
        self.destination_allowed(url)?;
        if let Some(budget) = &self.budget {
            budget.check().await?;
        }

        let (clean, redactions) = self.sanitize_value(payload);
        if !redactions.is_empty() {
            // Categories and counts only — never the values.
            info!(
                trace_id = %ctx.trace_id,
                worker = ctx.worker,
                ?redactions,
                "egress payload redacted"
            );
        }

        let mut attempt: u32 = 0;
        loop {
            let mut req = self
                .http
                .post(url)
                .header("x-trace-id", &ctx.trace_id)
                .header("x-worker", ctx.worker)
                .json(&clean);
            if let Some(token) = bearer {
                req = req.bearer_auth(token);
            }

            let outcome = match req.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return resp
                            .json::<Value>()
                            .await
                            .map_err(|e| EgressError::Transport(format!("decode: {e}")));
                    }
                    Err(EgressError::UpstreamStatus {
                        status: status.as_u16(),
                    })
                }
                Err(e) if e.is_timeout() => Err(EgressError::Timeout),
                Err(e) => Err(EgressError::Transport(e.to_string())),
            };

            match outcome {
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let cap = self.backoff_base_ms.saturating_mul(1 << attempt.min(10));
                    let delay = rand::thread_rng().gen_range(0..=cap.max(1));
                    warn!(
                        trace_id = %ctx.trace_id,
                        attempt,
                        delay_ms = delay,
                        error = %err,
                        "egress retry"
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(err) => return Err(err),
                Ok(never) => return Ok(never),
            }
        }
    }

    /// Record tokens consumed by a successful inference call.
    pub async fn record_tokens(&self, tokens: u64) -> Result<(), EgressError> {
        if let Some(budget) = &self.budget {
            budget.record(tokens).await?;
        }
        Ok(())
    }
}
