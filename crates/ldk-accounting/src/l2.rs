//! L2: the external reason-act loop.
//!
//! The loop is an explicit step machine, not open-ended recursion: at most
//! `step_cap` provider calls, each returning either a tool request or a
//! final decision. Tool calls are delegated to connector traits (web lookup
//! and browser fetch run outside the core; ask-user raises an interaction
//! card upstream). Every provider call flows through the egress proxy owned
//! by the provider implementation, so sanitization and budgets apply
//! unconditionally.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use ldk_privacy::{InferenceProvider, InferenceRequest};
use ldk_schemas::{DocumentRecord, TraceContext};

/// Final decision produced by the reasoning tier.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct L2Decision {
    pub category: String,
    pub confidence: f64,
    /// Ordered steps of the reason-act trace, persisted into the entry's
    /// inference log.
    pub reasoning_graph: Value,
    pub tokens_used: u64,
}

/// External tool connectors available to the loop.
#[async_trait]
pub trait L2Toolbox: Send + Sync {
    /// Keyword/company lookup (e.g. a business registry search).
    async fn web_lookup(&self, query: &str) -> Result<String>;

    /// Fetch a page through the external browser connector.
    async fn browser_fetch(&self, url: &str) -> Result<String>;
}

/// Toolbox for deployments without connectors: every tool call fails and
/// the loop must decide from the document alone.
pub struct NoTools;

#[async_trait]
impl L2Toolbox for NoTools {
    async fn web_lookup(&self, _query: &str) -> Result<String> {
        bail!("web lookup connector not configured")
    }
    async fn browser_fetch(&self, _url: &str) -> Result<String> {
        bail!("browser connector not configured")
    }
}

/// Loop configuration.
#[derive(Clone, Debug)]
pub struct L2Options {
    pub model: String,
    pub step_cap: u32,
    pub timeout_s: u64,
}

/// One provider turn, decoded from the response content.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Turn {
    Act { action: String, input: String },
    Final { category: String, confidence: f64 },
}

/// Build the base prompt for a document.
pub fn base_prompt(doc: &DocumentRecord) -> String {
    format!(
        "Classify this expense into an account code (NNNN or NNNN-NN).\n\
         vendor: {}\namount: {}\nsummary: {}\n\
         Respond with JSON: either {{\"action\":\"web_lookup\"|\"browser_fetch\",\"input\":\"...\"}} \
         or {{\"category\":\"NNNN\",\"confidence\":0.0}}",
        doc.vendor, doc.amount, doc.summary
    )
}

/// Run the reason-act loop to a decision.
pub async fn run_l2(
    ctx: &TraceContext,
    provider: &dyn InferenceProvider,
    tools: &dyn L2Toolbox,
    opts: &L2Options,
    doc: &DocumentRecord,
) -> Result<L2Decision> {
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(opts.timeout_s);
    let mut prompt = base_prompt(doc);
    let mut graph: Vec<Value> = Vec::new();
    let mut tokens_total: u64 = 0;

    for step in 0..opts.step_cap {
        if tokio::time::Instant::now() >= deadline {
            bail!("l2 aggregate time budget exceeded at step {step}");
        }

        let request = InferenceRequest {
            model: opts.model.clone(),
            prompt: prompt.clone(),
            max_tokens: 512,
        };
        let response = provider
            .complete(ctx, &request)
            .await
            .map_err(|e| anyhow!("l2 provider call failed: {e}"))?;
        tokens_total += response.tokens_used;

        let turn: Turn = serde_json::from_str(response.content.trim())
            .map_err(|e| anyhow!("l2 response not decodable at step {step}: {e}"))?;

        match turn {
            Turn::Final {
                category,
                confidence,
            } => {
                graph.push(json!({
                    "step": step,
                    "kind": "decision",
                    "category": category,
                    "confidence": confidence,
                }));
                return Ok(L2Decision {
                    category,
                    confidence: confidence.clamp(0.0, 1.0),
                    reasoning_graph: Value::Array(graph),
                    tokens_used: tokens_total,
                });
            }
            Turn::Act { action, input } => {
                let observation = match action.as_str() {
                    "web_lookup" => tools.web_lookup(&input).await,
                    "browser_fetch" => tools.browser_fetch(&input).await,
                    other => Err(anyhow!("unknown tool: {other}")),
                };
                let observation_text = match observation {
                    Ok(text) => text,
                    Err(e) => format!("tool error: {e}"),
                };
                graph.push(json!({
                    "step": step,
                    "kind": "act",
                    "action": action,
                    "input": input,
                    "observation": observation_text,
                }));
                prompt = format!(
                    "{}\n\nobservation[{}]: {}\nContinue. Same JSON contract.",
                    prompt, step, observation_text
                );
            }
        }
    }

    bail!("l2 step cap ({}) exhausted without a decision", opts.step_cap)
}
