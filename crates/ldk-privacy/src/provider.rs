//! External inference boundary.
//!
//! The accounting router talks to a `dyn InferenceProvider`; the production
//! implementation routes through the [`EgressProxy`](crate::EgressProxy) so
//! sanitization, allowlisting, and budgets apply to every call. Tests swap
//! in scripted providers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use ldk_schemas::TraceContext;

use crate::proxy::{EgressError, EgressProxy};

/// One request to the external reasoning tier.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub model: String,
    pub prompt: String,
    pub max_tokens: u32,
}

/// Provider response: free-form content plus accounting metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub content: String,
    pub tokens_used: u64,
    /// Provider-shaped raw body, preserved for the reasoning graph.
    pub raw: Value,
}

/// Contract for an external inference provider.
///
/// Implementations must be `Send + Sync` so the router can hold an
/// `Arc<dyn InferenceProvider>` across worker tasks.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    /// Human-readable provider name (for the inference log).
    fn name(&self) -> &'static str;

    /// Execute one completion call.
    async fn complete(
        &self,
        ctx: &TraceContext,
        req: &InferenceRequest,
    ) -> Result<InferenceResponse, EgressError>;
}

/// Production provider: POSTs through the egress proxy.
pub struct HttpInferenceProvider {
    proxy: EgressProxy,
    endpoint: String,
    api_key: String,
}

impl HttpInferenceProvider {
    pub fn new(proxy: EgressProxy, endpoint: String, api_key: String) -> Self {
        Self {
            proxy,
            endpoint,
            api_key,
        }
    }
}

#[async_trait]
impl InferenceProvider for HttpInferenceProvider {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn complete(
        &self,
        ctx: &TraceContext,
        req: &InferenceRequest,
    ) -> Result<InferenceResponse, EgressError> {
        let payload = serde_json::json!({
            "model": req.model,
            "prompt": req.prompt,
            "max_tokens": req.max_tokens,
        });
        let raw = self
            .proxy
            .post_json(ctx, &self.endpoint, &payload, Some(&self.api_key))
            .await?;

        let content = raw
            .pointer("/choices/0/text")
            .or_else(|| raw.pointer("/content"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let tokens_used = raw
            .pointer("/usage/total_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0);

        self.proxy.record_tokens(tokens_used).await?;

        Ok(InferenceResponse {
            content,
            tokens_used,
            raw,
        })
    }
}
