use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::RefinerConfig;
use crate::error::{Result, RefineError};
use crate::format::PairFormat;
use crate::glossary::Glossary;
use crate::pairs::SubtitlePair;
use super::{RefineRequest, Refinement, Refiner, response};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ChatReply,
}

#[derive(Debug, Deserialize)]
pub struct ChatReply {
    pub content: Option<String>,
}

/// Instructions sent as the system message; the batch itself travels as the
/// JSON request document in the user message
fn system_prompt(format: PairFormat) -> String {
    let reply = match format {
        PairFormat::Json => {
            "Reply with a JSON object {\"pairs\": [...], \"terms\": [...]} where pairs holds the \
             corrected {id, eng, chinese} objects and terms lists new {eng, zh, type, confidence} \
             terminology entries."
        }
        PairFormat::XmlPair | PairFormat::PseudoToml => {
            "Reply with the corrected pairs only, in the same format as the input."
        }
    };

    format!(
        "You refine bilingual English-Chinese subtitles. The user message is a JSON document whose \
         \"pairs\" field holds subtitle pairs serialized as {}, and whose \"glossary\" field lists \
         terminology; authoritative entries must be followed exactly. Fix transcription and \
         translation errors, keep every id, and leave formatting tags such as {{\\i1}} untouched. {}",
        format, reply
    )
}

/// Refiner that calls an OpenAI-compatible chat completions API
pub struct HttpRefiner {
    client: Client,
    config: RefinerConfig,
    api_key: Option<String>,
}

impl HttpRefiner {
    pub fn new(config: RefinerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RefineError::Refiner(format!("Failed to create HTTP client: {}", e)))?;

        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty());
        if api_key.is_none() {
            debug!("{} is not set, sending requests without an API key", config.api_key_env);
        }

        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    pub fn with_api_key<S: Into<String>>(mut self, api_key: S) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.config.endpoint.trim_end_matches('/'))
    }

    pub fn build_request(&self, payload: String) -> ChatRequest {
        ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system_prompt(self.config.format),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: payload,
                },
            ],
            temperature: self.config.temperature,
            max_completion_tokens: self.config.max_output_tokens,
        }
    }
}

/// Text of the first choice
pub fn reply_content(response: ChatResponse) -> Result<String> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| RefineError::Refiner("No choices in API response".to_string()))?;

    choice
        .message
        .content
        .ok_or_else(|| RefineError::Refiner("Response content is empty".to_string()))
}

#[async_trait]
impl Refiner for HttpRefiner {
    async fn refine_batch(&self, batch: &[SubtitlePair], glossary: &Glossary) -> Result<Refinement> {
        let request = RefineRequest::new(self.config.format, batch, glossary)?;
        let chat = self.build_request(serde_json::to_string(&request)?);
        let url = self.chat_url();

        debug!("Sending batch of {} pairs to {}", batch.len(), url);

        let mut builder = self.client.post(&url).json(&chat);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let reply = builder
            .send()
            .await
            .map_err(|e| RefineError::Refiner(format!("HTTP request failed: {}", e)))?;

        if !reply.status().is_success() {
            let status = reply.status();
            let error_text = reply.text().await.unwrap_or_default();
            return Err(RefineError::Refiner(format!(
                "API error {}: {}",
                status,
                error_text.trim()
            )));
        }

        let chat_response: ChatResponse = reply
            .json()
            .await
            .map_err(|e| RefineError::Refiner(format!("Failed to parse API response: {}", e)))?;

        let raw = reply_content(chat_response)?;
        debug!("Raw API response ({} bytes)", raw.len());

        response::parse_response(&raw, self.config.format, batch.len())
    }
}
