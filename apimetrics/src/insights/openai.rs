//! Insight generation against an OpenAI-compatible `chat/completions` endpoint.
//!
//! Works with any server speaking the OpenAI chat format, including Gemini's OpenAI
//! compatibility layer (the default endpoint).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;

use super::{DEFAULT_TEMPLATE, InsightError, InsightGenerator, render_prompt};
use crate::config::InsightsConfig;
use crate::engine::ApiMetrics;
use crate::errors::Error;

pub struct OpenAiInsights {
    client: Client,
    completions_url: Url,
    model: String,
    api_key: Option<String>,
    template: String,
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Makes sure a url has a trailing slash, so that `join` appends instead of replacing the last
/// path segment.
fn ensure_slash(url: &Url) -> Url {
    if url.path().ends_with('/') {
        return url.clone();
    }
    let mut url = url.clone();
    let path = format!("{}/", url.path());
    url.set_path(&path);
    url
}

impl OpenAiInsights {
    pub fn new(config: &InsightsConfig) -> Result<Self, Error> {
        crate::install_crypto_provider();

        let completions_url = ensure_slash(&config.endpoint_url()?)
            .join("chat/completions")
            .map_err(|e| Error::Config {
                message: format!("cannot build completions URL from {}: {e}", config.endpoint),
            })?;

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config {
                message: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            completions_url,
            model: config.model.clone(),
            api_key: config.api_key.clone().filter(|key| !key.is_empty()),
            template: config.template.clone().unwrap_or_else(|| DEFAULT_TEMPLATE.to_string()),
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl InsightGenerator for OpenAiInsights {
    #[instrument(skip_all, fields(api_name = %row.api_name, model = %self.model), err)]
    async fn generate(&self, row: &ApiMetrics) -> Result<String, InsightError> {
        let prompt = render_prompt(&self.template, row)?;
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &prompt,
            }],
            max_tokens: self.max_tokens,
        };

        debug!(url = %self.completions_url, "Requesting insight");
        let mut request = self.client.post(self.completions_url.clone()).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(InsightError::Status { status, body });
        }

        let response: ChatResponse = response.json().await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(InsightError::EmptyResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn row() -> ApiMetrics {
        ApiMetrics {
            api_name: "FACE_MATCH".to_string(),
            total_requests: 120,
            success_rate: 75.5,
            avg_latency_ms: Some(1010.5),
            p95_latency_ms: Some(1650.25),
            top_error_reason: Some("FACE_MISMATCH".to_string()),
        }
    }

    fn config(server: &MockServer) -> InsightsConfig {
        InsightsConfig {
            enabled: true,
            endpoint: format!("{}/v1", server.uri()),
            model: "test-model".to_string(),
            api_key: Some("sk-test".to_string()),
            template: Some("Explain {{ api_name }} at {{ success_rate }}%".to_string()),
            timeout: Duration::from_secs(5),
            max_tokens: Some(256),
        }
    }

    #[test]
    fn test_ensure_slash() {
        let url = Url::parse("https://example.com/v1beta/openai").unwrap();
        assert_eq!(
            ensure_slash(&url).join("chat/completions").unwrap().as_str(),
            "https://example.com/v1beta/openai/chat/completions"
        );
    }

    #[tokio::test]
    async fn test_generate_posts_chat_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "test-model",
                "max_tokens": 256,
                "messages": [{"role": "user", "content": "Explain FACE_MATCH at 75.5%"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"index": 0, "message": {"role": "assistant", "content": "  - Root cause: lighting\n"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let generator = OpenAiInsights::new(&config(&server)).unwrap();
        let insight = generator.generate(&row()).await.unwrap();

        assert_eq!(insight, "- Root cause: lighting");
    }

    #[tokio::test]
    async fn test_upstream_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("quota exceeded"))
            .mount(&server)
            .await;

        let generator = OpenAiInsights::new(&config(&server)).unwrap();

        match generator.generate(&row()).await {
            Err(InsightError::Status { status, body }) => {
                assert_eq!(status, 429);
                assert_eq!(body, "quota exceeded");
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_choices() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "choices": [] })))
            .mount(&server)
            .await;

        let generator = OpenAiInsights::new(&config(&server)).unwrap();
        assert!(matches!(generator.generate(&row()).await, Err(InsightError::EmptyResponse)));
    }

    #[tokio::test]
    async fn test_template_error_skips_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut config = config(&server);
        config.template = Some("{{ device_type }}".to_string());
        let generator = OpenAiInsights::new(&config).unwrap();

        assert!(matches!(generator.generate(&row()).await, Err(InsightError::Template(_))));
    }
}
