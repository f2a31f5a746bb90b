use super::{Llm, OracleError};
use crate::config::{OracleConfig, Provider};
use crate::{Error, Result};
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// [`Llm`] over an Anthropic messages endpoint or an OpenAI-compatible
/// chat completions endpoint (OpenAI, OpenRouter).
pub struct HttpLlm {
    http: Client,
    provider: Provider,
    endpoint: String,
    model: String,
    api_key: String,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
}

impl HttpLlm {
    pub fn new(config: &OracleConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::Config("oracle.api_key is required".into()))?;
        let http = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| Error::Config(format!("http client: {}", e)))?;
        Ok(Self {
            http,
            provider: config.provider,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries.max(1),
        })
    }

    fn url(&self) -> String {
        match self.provider {
            Provider::Anthropic => format!("{}/messages", self.endpoint),
            Provider::OpenAi => format!("{}/chat/completions", self.endpoint),
        }
    }

    async fn call(&self, content: Value) -> std::result::Result<String, OracleError> {
        let body = request_body(&self.model, self.max_tokens, self.temperature, content);

        for attempt in 0..self.max_retries {
            let mut req = self
                .http
                .post(self.url())
                .header("content-type", "application/json");
            req = match self.provider {
                Provider::Anthropic => req
                    .header("x-api-key", &self.api_key)
                    .header("anthropic-version", ANTHROPIC_VERSION),
                Provider::OpenAi => req.header("Authorization", format!("Bearer {}", self.api_key)),
            };

            let resp = req
                .json(&body)
                .send()
                .await
                .map_err(|e| OracleError::Transport(e.to_string()))?;
            let status = resp.status();
            let text = resp
                .text()
                .await
                .map_err(|e| OracleError::Transport(e.to_string()))?;
            let json: Value = serde_json::from_str(&text).unwrap_or(Value::Null);

            if status.as_u16() == 429 || is_rate_limit(&json) {
                let wait = Duration::from_secs(u64::from(attempt + 1) * 5);
                warn!("Rate limited, waiting {}s...", wait.as_secs());
                tokio::time::sleep(wait).await;
                continue;
            }
            if !status.is_success() {
                return Err(OracleError::Status {
                    status: status.as_u16(),
                    body: text,
                });
            }

            debug!("oracle call ok (attempt {})", attempt + 1);
            return reply_text(self.provider, &json);
        }

        Err(OracleError::Status {
            status: 429,
            body: format!("rate limited after {} attempts", self.max_retries),
        })
    }
}

#[async_trait]
impl Llm for HttpLlm {
    async fn complete(&self, prompt: &str) -> std::result::Result<String, OracleError> {
        self.call(Value::String(prompt.to_string())).await
    }

    async fn complete_with_image(
        &self,
        prompt: &str,
        png: &[u8],
    ) -> std::result::Result<String, OracleError> {
        self.call(image_content(self.provider, prompt, png)).await
    }
}

/// Single user message; both wire formats accept this shape.
fn request_body(model: &str, max_tokens: u32, temperature: f32, content: Value) -> Value {
    json!({
        "model": model,
        "max_tokens": max_tokens,
        "temperature": temperature,
        "messages": [{ "role": "user", "content": content }],
    })
}

fn image_content(provider: Provider, prompt: &str, png: &[u8]) -> Value {
    let data = base64::engine::general_purpose::STANDARD.encode(png);
    match provider {
        Provider::Anthropic => json!([
            {
                "type": "image",
                "source": { "type": "base64", "media_type": "image/png", "data": data }
            },
            { "type": "text", "text": prompt }
        ]),
        Provider::OpenAi => json!([
            { "type": "text", "text": prompt },
            {
                "type": "image_url",
                "image_url": { "url": format!("data:image/png;base64,{}", data) }
            }
        ]),
    }
}

fn is_rate_limit(json: &Value) -> bool {
    json.get("error").is_some()
        && (json["error"]["type"] == "rate_limit_error"
            || json["error"]["code"] == "rate_limit_exceeded")
}

fn reply_text(provider: Provider, json: &Value) -> std::result::Result<String, OracleError> {
    let text = match provider {
        Provider::Anthropic => json["content"].as_array().map(|blocks| {
            blocks
                .iter()
                .filter(|b| b["type"] == "text")
                .filter_map(|b| b["text"].as_str())
                .collect::<Vec<_>>()
                .join("")
        }),
        Provider::OpenAi => json["choices"][0]["message"]["content"]
            .as_str()
            .map(String::from),
    };
    text.map(|t| t.trim().to_string())
        .ok_or_else(|| OracleError::Malformed(json.to_string()))
}
