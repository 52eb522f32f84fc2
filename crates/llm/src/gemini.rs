//! Adapter for the Google Gemini `generateContent` API. Auth is a
//! single API key passed as a query parameter.

use async_trait::async_trait;
use choir_domain::capability::{CompletionRequest, Embedder, Embedding, LlmClient};
use choir_domain::error::{Error, Result};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

/// Turns a non-2xx Gemini response into the right `Error` kind: 429 and
/// 5xx are retryable dependency failures, everything else in the 4xx
/// range (bad request, unauthenticated, forbidden, ...) is not.
fn classify_http_error(status: StatusCode, body: String) -> Error {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Error::dependency("gemini", format!("HTTP {status}: {body}"))
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Error::Authentication(format!("gemini rejected credentials (HTTP {status}): {body}"))
    } else {
        Error::Validation(format!("gemini rejected the request (HTTP {status}): {body}"))
    }
}

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-004";

pub struct GeminiClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .expect("reqwest client builds with a fixed timeout"),
        }
    }

    /// Reads `CHOIR_GEMINI_API_KEY` from the environment.
    pub fn from_env() -> Result<Self> {
        let key = std::env::var("CHOIR_GEMINI_API_KEY")
            .map_err(|_| Error::Configuration("CHOIR_GEMINI_API_KEY is not set".into()))?;
        Ok(Self::new(key))
    }

    fn generate_url(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url.trim_end_matches('/'),
            model,
            self.api_key
        )
    }

    fn embed_url(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:embedContent?key={}",
            self.base_url.trim_end_matches('/'),
            model,
            self.api_key
        )
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbedValues,
}

#[derive(Debug, Deserialize)]
struct EmbedValues {
    values: Vec<f32>,
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        let body = json!({
            "contents": [{
                "parts": [{"text": request.prompt}],
            }],
            "generationConfig": {
                "temperature": request.temperature,
                "maxOutputTokens": request.max_tokens,
            },
        });

        let response = self
            .client
            .post(self.generate_url(&request.model))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::dependency("gemini", e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(classify_http_error(status, text));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| Error::dependency("gemini", format!("decoding response: {e}")))?;

        parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| Error::dependency("gemini", "response had no candidates"))
    }
}

/// One embedding call per text: `embedContent` has no batch variant in
/// the v1beta surface this adapter targets.
#[async_trait]
impl Embedder for GeminiClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            let body = json!({
                "model": format!("models/{DEFAULT_EMBEDDING_MODEL}"),
                "content": { "parts": [{"text": text}] },
            });

            let response = self
                .client
                .post(self.embed_url(DEFAULT_EMBEDDING_MODEL))
                .json(&body)
                .send()
                .await
                .map_err(|e| Error::dependency("gemini", e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                return Err(classify_http_error(status, text));
            }

            let parsed: EmbedResponse = response
                .json()
                .await
                .map_err(|e| Error::dependency("gemini", format!("decoding embedding response: {e}")))?;
            out.push(parsed.embedding.values);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_and_server_errors_are_retryable() {
        assert!(classify_http_error(StatusCode::TOO_MANY_REQUESTS, String::new()).is_retryable());
        assert!(classify_http_error(StatusCode::INTERNAL_SERVER_ERROR, String::new()).is_retryable());
        assert!(classify_http_error(StatusCode::SERVICE_UNAVAILABLE, String::new()).is_retryable());
    }

    #[test]
    fn auth_and_validation_errors_are_not_retryable() {
        let unauthorized = classify_http_error(StatusCode::UNAUTHORIZED, String::new());
        assert!(!unauthorized.is_retryable());
        assert_eq!(unauthorized.kind().http_status(), 401);

        let bad_request = classify_http_error(StatusCode::BAD_REQUEST, String::new());
        assert!(!bad_request.is_retryable());
        assert_eq!(bad_request.kind().http_status(), 400);
    }
}
