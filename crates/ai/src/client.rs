//! Model-provider client.

use {
    async_trait::async_trait,
    serde::Deserialize,
    serde_json::json,
    tracing::debug,
};

use crate::error::{Error, Result};

/// External model provider. One trait for all four enrichment jobs so tests
/// can script the provider, and the HTTP client stays in one place.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// One-shot chat completion.
    async fn complete(&self, system: &str, prompt: &str) -> Result<String>;

    /// Speech-to-text for a hosted audio file.
    async fn transcribe(&self, audio_url: &str, language: Option<&str>) -> Result<String>;
}

/// Chat-completions style HTTP client.
pub struct HttpModelClient {
    http: reqwest::Client,
    base: String,
    api_key: String,
    model: String,
}

impl HttpModelClient {
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        base: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base: base.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": prompt },
            ],
        });
        debug!(model = %self.model, "model completion request");
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Provider {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let parsed: CompletionResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .map(|m| m.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(Error::unusable("empty completion"));
        }
        Ok(content)
    }

    async fn transcribe(&self, audio_url: &str, language: Option<&str>) -> Result<String> {
        let mut body = json!({ "model": "whisper-1", "url": audio_url });
        if let Some(language) = language {
            body["language"] = json!(language);
        }
        let response = self
            .http
            .post(format!("{}/audio/transcriptions", self.base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Provider {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let parsed: TranscriptionResponse = response.json().await?;
        if parsed.text.trim().is_empty() {
            return Err(Error::unusable("empty transcription"));
        }
        Ok(parsed.text)
    }
}
