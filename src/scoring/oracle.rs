// =============================================================================
// Reasoning oracle source — slow external scorer behind a strict parse
// =============================================================================
//
// The oracle answers free-form text that must yield an action/confidence
// pair. The reply is parsed into a tagged result; any parse failure becomes
// `ScoringMalformed`, which the voting engine normalizes to an abstain vote.
// The wire client sits behind `OracleClient`, so the HTTP adapter here is
// replaceable.
// =============================================================================

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::debug;

use crate::error::EngineError;
use crate::market_data::SymbolContext;
use crate::scoring::{ModelVote, ScoringSource};
use crate::types::Action;

// ---------------------------------------------------------------------------
// Wire seam
// ---------------------------------------------------------------------------

/// Completes a prompt against the external reasoning model.
#[async_trait]
pub trait OracleClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, EngineError>;
}

// ---------------------------------------------------------------------------
// Reply parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct OracleReply {
    action: String,
    confidence: f64,
    #[serde(default)]
    #[allow(dead_code)]
    reasoning: Option<String>,
}

/// Extract the JSON object from a free-form reply and map it to a vote.
///
/// The model is asked for `{"action": ..., "confidence": 0-100, ...}` but
/// often wraps it in prose or a code fence; everything outside the outermost
/// braces is ignored. Confidence above 1 is treated as a percentage.
pub fn parse_oracle_reply(source_id: &str, raw: &str) -> Result<ModelVote, EngineError> {
    let start = raw.find('{');
    let end = raw.rfind('}');
    let body = match (start, end) {
        (Some(s), Some(e)) if e > s => &raw[s..=e],
        _ => {
            return Err(EngineError::ScoringMalformed {
                src: source_id.to_string(),
                reason: "no JSON object in reply".to_string(),
            })
        }
    };

    let reply: OracleReply =
        serde_json::from_str(body).map_err(|e| EngineError::ScoringMalformed {
            src: source_id.to_string(),
            reason: e.to_string(),
        })?;

    let action = match reply.action.trim().to_uppercase().as_str() {
        "BUY" => Action::Buy,
        "SELL" => Action::Sell,
        "HOLD" => Action::Hold,
        other => {
            return Err(EngineError::ScoringMalformed {
                src: source_id.to_string(),
                reason: format!("unknown action {other:?}"),
            })
        }
    };

    let confidence = if reply.confidence > 1.0 {
        reply.confidence / 100.0
    } else {
        reply.confidence
    };
    if !(0.0..=1.0).contains(&confidence) {
        return Err(EngineError::ScoringMalformed {
            src: source_id.to_string(),
            reason: format!("confidence {} out of range", reply.confidence),
        });
    }

    Ok(ModelVote::new(source_id, action, confidence, Utc::now()))
}

// ---------------------------------------------------------------------------
// Scoring source
// ---------------------------------------------------------------------------

/// The oracle as a scoring source. Slowest voter in the ensemble; carries
/// its own timeout so it can never stall the cycle.
pub struct OracleSource {
    source_id: String,
    client: std::sync::Arc<dyn OracleClient>,
    timeout_ms: u64,
}

impl OracleSource {
    pub fn new(
        source_id: impl Into<String>,
        client: std::sync::Arc<dyn OracleClient>,
        timeout_ms: u64,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            client,
            timeout_ms,
        }
    }

    fn build_prompt(&self, ctx: &SymbolContext) -> String {
        format!(
            "Assess the short-term outlook for {symbol}.\n\
             \n\
             MARKET DATA ({tf} candles):\n\
             - Last price: {price:.6}\n\
             - SMA20: {sma20:.6} | SMA50: {sma50:.6}\n\
             - RSI(14): {rsi}\n\
             - Change over 5 candles: {chg5:+.2}% | over 20 candles: {chg20:+.2}%\n\
             - Range volatility: {vol:.2}%\n\
             \n\
             Respond with JSON only:\n\
             {{\"action\": \"BUY\" | \"SELL\" | \"HOLD\", \"confidence\": 0-100, \"reasoning\": \"...\"}}",
            symbol = ctx.symbol,
            tf = ctx.timeframe,
            price = ctx.last_price,
            sma20 = ctx.sma_20,
            sma50 = ctx.sma_50,
            rsi = ctx
                .rsi_14
                .map(|r| format!("{r:.1}"))
                .unwrap_or_else(|| "n/a".to_string()),
            chg5 = ctx.price_change_5,
            chg20 = ctx.price_change_20,
            vol = ctx.volatility_pct,
        )
    }
}

#[async_trait]
impl ScoringSource for OracleSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn timeout_ms(&self) -> Option<u64> {
        Some(self.timeout_ms)
    }

    async fn score(&self, ctx: &SymbolContext) -> Result<ModelVote, EngineError> {
        let prompt = self.build_prompt(ctx);
        let raw = self.client.complete(&prompt).await?;
        let vote = parse_oracle_reply(&self.source_id, &raw)?;
        debug!(
            symbol = %ctx.symbol,
            action = %vote.action,
            confidence = vote.confidence,
            "oracle vote parsed"
        );
        Ok(vote)
    }
}

// ---------------------------------------------------------------------------
// HTTP adapter (chat-completions wire format)
// ---------------------------------------------------------------------------

/// Minimal chat-completions client for the reasoning endpoint.
pub struct HttpOracleClient {
    endpoint: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl HttpOracleClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .expect("failed to build reqwest client");
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
            client,
        }
    }
}

#[async_trait]
impl OracleClient for HttpOracleClient {
    async fn complete(&self, prompt: &str) -> Result<String, EngineError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0.2,
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::ScoringMalformed {
                src: "oracle".to_string(),
                reason: format!("request failed: {e}"),
            })?;

        let status = resp.status();
        let payload: serde_json::Value =
            resp.json().await.map_err(|e| EngineError::ScoringMalformed {
                src: "oracle".to_string(),
                reason: format!("invalid response body: {e}"),
            })?;

        if !status.is_success() {
            return Err(EngineError::ScoringMalformed {
                src: "oracle".to_string(),
                reason: format!("HTTP {status}: {payload}"),
            });
        }

        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| EngineError::ScoringMalformed {
                src: "oracle".to_string(),
                reason: "missing choices[0].message.content".to_string(),
            })
    }
}
