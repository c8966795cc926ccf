//! Labeler backed by an OpenAI-compatible chat and embeddings API.

use super::{LabelContext, Labeler, TopicLabel, prompt};
use crate::config::LabelerConfig;
use crate::error::{LabelError, LabelResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    response_format: ResponseFormat,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatContent,
}

#[derive(Deserialize)]
struct ChatContent {
    content: Option<String>,
}

/// Shape the model is asked to answer with.
#[derive(Deserialize)]
struct LabelPayload {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
    encoding_format: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Chat-model labeler.
///
/// Requests a JSON object `{"title": ..., "description": ...}` and embeds
/// titles with the configured embeddings model.
pub struct OpenAiLabeler {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    embedding_model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiLabeler {
    /// Build from configuration, reading the key from `api_key_env`.
    ///
    /// A missing key is not an error here; every call then fails with
    /// [`LabelError::NotConfigured`] and the build falls back to generic labels.
    pub fn from_config(config: &LabelerConfig) -> LabelResult<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| LabelError::Request(e.to_string()))?;

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            embedding_model: config.embedding_model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    /// Replace the API key, mainly for tests and embedding in other services.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn api_key(&self) -> LabelResult<&str> {
        self.api_key.as_deref().ok_or_else(|| LabelError::NotConfigured {
            reason: "no API key in the configured environment variable".to_string(),
        })
    }

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> LabelResult<R> {
        let api_key = self.api_key()?;
        let url = format!("{}/{path}", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .json(body)
            .send()
            .await
            .map_err(|e| LabelError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(LabelError::Status { status, body });
        }

        resp.json()
            .await
            .map_err(|e| LabelError::InvalidResponse(e.to_string()))
    }
}

/// Parse the model's JSON answer into a label.
pub(crate) fn parse_label(content: &str) -> LabelResult<TopicLabel> {
    let payload: LabelPayload = serde_json::from_str(content.trim())
        .map_err(|e| LabelError::InvalidResponse(format!("{e}: {content}")))?;
    Ok(TopicLabel::new(payload.title, payload.description))
}

#[async_trait]
impl Labeler for OpenAiLabeler {
    async fn label(&self, texts: &[String], context: &LabelContext<'_>) -> LabelResult<TopicLabel> {
        let prompt = prompt::build_prompt(texts, context);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &prompt,
            }],
            response_format: ResponseFormat {
                kind: "json_object",
            },
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response: ChatResponse = self.post("chat/completions", &request).await?;
        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| LabelError::InvalidResponse("empty completion".to_string()))?;

        let label = parse_label(&content)?;
        debug!(
            title = %label.title,
            cluster_size = context.cluster_size,
            level = context.level,
            "Generated cluster label"
        );
        Ok(label)
    }

    async fn embed(&self, text: &str) -> LabelResult<Vec<f32>> {
        let request = EmbeddingRequest {
            model: &self.embedding_model,
            input: text,
            encoding_format: "float",
        };
        let response: EmbeddingResponse = self.post("embeddings", &request).await?;
        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| LabelError::InvalidResponse("no embedding returned".to_string()))
    }
}
