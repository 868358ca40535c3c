use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::types::{Completion, FinishReason, TokenUsage};
use crate::util::http;

use super::LlmProvider;

/// Google Gemini API provider.
pub struct GeminiProvider {
    api_key: String,
    api_base: String,
    model: String,
    max_tokens: u32,
    temperature: f64,
}

impl GeminiProvider {
    pub fn new(api_key: String, api_base: Option<String>, model: String) -> Self {
        let base = api_base
            .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string());
        Self {
            api_key,
            api_base: base.trim_end_matches('/').to_string(),
            model: normalize_model(&model),
            max_tokens: 2048,
            temperature: 0.7,
        }
    }

    pub fn with_generation(mut self, max_tokens: u32, temperature: f64) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    fn request_body(&self, prompt: &str) -> serde_json::Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [{"text": prompt}]
            }],
            "generationConfig": {
                "maxOutputTokens": self.max_tokens,
                "temperature": self.temperature,
            },
        })
    }
}

/// Normalize model name: strip "gemini/" and "models/" prefixes.
fn normalize_model(model: &str) -> String {
    let model = model.strip_prefix("gemini/").unwrap_or(model);
    model.strip_prefix("models/").unwrap_or(model).to_string()
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    async fn generate(&self, prompt: &str) -> Result<Completion, ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::NoApiKey);
        }

        let url = format!("{}/models/{}:generateContent", self.api_base, self.model);
        debug!("Gemini request with model {}", self.model);

        let response = http::client()
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&self.request_body(prompt))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: text,
            });
        }

        let data: serde_json::Value = response.json().await?;
        parse_response(&data)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Turn a `generateContent` response into a [`Completion`].
///
/// A prompt blocked by safety filters yields a completion without content
/// rather than an error.
fn parse_response(data: &serde_json::Value) -> Result<Completion, ProviderError> {
    let usage = data
        .get("usageMetadata")
        .map(|u| {
            let count = |field: &str| u.get(field).and_then(|v| v.as_u64()).unwrap_or(0) as u32;
            TokenUsage {
                prompt_tokens: count("promptTokenCount"),
                completion_tokens: count("candidatesTokenCount"),
                total_tokens: count("totalTokenCount"),
            }
        })
        .unwrap_or_default();

    let Some(candidate) = data.get("candidates").and_then(|v| v.get(0)) else {
        if let Some(reason) = data
            .pointer("/promptFeedback/blockReason")
            .and_then(|v| v.as_str())
        {
            warn!("Gemini blocked the prompt: {}", reason);
            return Ok(Completion {
                content: None,
                finish_reason: FinishReason::Blocked,
                usage,
            });
        }
        return Err(ProviderError::Parse("No candidates in response".to_string()));
    };

    let text: String = candidate
        .pointer("/content/parts")
        .and_then(|v| v.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(|v| v.as_str()))
                .collect()
        })
        .unwrap_or_default();

    let finish_reason = match candidate.get("finishReason").and_then(|v| v.as_str()) {
        Some("STOP") | None => FinishReason::Stop,
        Some("MAX_TOKENS") => FinishReason::Length,
        Some("SAFETY") | Some("RECITATION") | Some("BLOCKLIST") | Some("PROHIBITED_CONTENT") => {
            FinishReason::Blocked
        }
        Some(_) => FinishReason::Other,
    };

    Ok(Completion {
        content: if text.is_empty() { None } else { Some(text) },
        finish_reason,
        usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text_response() {
        let data = json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "你好！"}, {"text": "有什麼可以幫忙？"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 9, "totalTokenCount": 12}
        });
        let completion = parse_response(&data).unwrap();
        assert_eq!(completion.text(), Some("你好！有什麼可以幫忙？"));
        assert_eq!(completion.finish_reason, FinishReason::Stop);
        assert_eq!(completion.usage.total_tokens, 12);
    }

    #[test]
    fn test_parse_safety_stop_has_no_text() {
        let data = json!({
            "candidates": [{"finishReason": "SAFETY"}]
        });
        let completion = parse_response(&data).unwrap();
        assert!(completion.text().is_none());
        assert_eq!(completion.finish_reason, FinishReason::Blocked);
    }

    #[test]
    fn test_parse_blocked_prompt() {
        let data = json!({"promptFeedback": {"blockReason": "OTHER"}});
        let completion = parse_response(&data).unwrap();
        assert!(completion.content.is_none());
        assert_eq!(completion.finish_reason, FinishReason::Blocked);
    }

    #[test]
    fn test_parse_without_candidates_is_error() {
        assert!(matches!(
            parse_response(&json!({})),
            Err(ProviderError::Parse(_))
        ));
    }

    #[test]
    fn test_request_body_carries_prompt_verbatim() {
        let provider = GeminiProvider::new("k".into(), None, "gemini/gemini-1.5-pro".into())
            .with_generation(256, 0.2);
        assert_eq!(provider.model(), "gemini-1.5-pro");

        let body = provider.request_body("第一行\n第二行");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "第一行\n第二行");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 256);
    }

    #[test]
    fn test_normalize_model() {
        assert_eq!(normalize_model("models/gemini-2.0-flash"), "gemini-2.0-flash");
        assert_eq!(normalize_model("gemini-1.5-pro"), "gemini-1.5-pro");
    }

    #[tokio::test]
    async fn test_generate_without_key() {
        let provider = GeminiProvider::new(String::new(), None, "gemini-1.5-pro".into());
        assert!(matches!(
            provider.generate("hi").await,
            Err(ProviderError::NoApiKey)
        ));
    }
}
