//! Bot replies, quick-reply suggestions and chat summaries.
//!
//! [`GeminiClient`] talks to the generative-language REST API. Callers go
//! through [`FallbackGeneration`], which never fails: any error, or a missing
//! API key, is replaced by a static fallback.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use murmur_shared::constants::{FALLBACK_REPLY, FALLBACK_SUGGESTIONS, FALLBACK_SUMMARY};

use crate::error::GenerationError;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// One transcript entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub summary: String,
    #[serde(default)]
    pub decisions: Vec<String>,
    #[serde(default, alias = "actionItems")]
    pub action_items: Vec<String>,
}

#[async_trait]
pub trait Generation: Send + Sync {
    /// Continue `history` with a reply to `message`.
    async fn reply(&self, history: &[Turn], message: &str) -> Result<String, GenerationError>;

    async fn suggestions(&self, last_message: &str) -> Result<[String; 3], GenerationError>;

    async fn summarize(&self, transcript: &[Turn]) -> Result<Summary, GenerationError>;
}

pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: API_BASE.to_string(),
        }
    }

    async fn generate(&self, body: Value) -> Result<String, GenerationError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        debug!(model = %self.model, "Requesting generation");

        let response = self
            .http
            .post(url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let value: Value = response.json().await?;
        extract_text(&value)
    }
}

#[async_trait]
impl Generation for GeminiClient {
    async fn reply(&self, history: &[Turn], message: &str) -> Result<String, GenerationError> {
        self.generate(reply_request(history, message)).await
    }

    async fn suggestions(&self, last_message: &str) -> Result<[String; 3], GenerationError> {
        let text = self.generate(suggestions_request(last_message)).await?;
        parse_suggestions(&text)
    }

    async fn summarize(&self, transcript: &[Turn]) -> Result<Summary, GenerationError> {
        let text = self.generate(summary_request(transcript)).await?;
        Ok(serde_json::from_str(&text)?)
    }
}

fn content(role: Role, text: &str) -> Value {
    json!({ "role": role, "parts": [{ "text": text }] })
}

fn transcript_text(transcript: &[Turn]) -> String {
    transcript
        .iter()
        .map(|t| match t.role {
            Role::User => format!("User: {}", t.text),
            Role::Model => format!("Other: {}", t.text),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn reply_request(history: &[Turn], message: &str) -> Value {
    let mut contents: Vec<Value> = history.iter().map(|t| content(t.role, &t.text)).collect();
    contents.push(content(Role::User, message));
    json!({ "contents": contents })
}

fn suggestions_request(last_message: &str) -> Value {
    json!({
        "contents": [content(
            Role::User,
            &format!("Suggest three short replies to this chat message: \"{last_message}\""),
        )],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": { "type": "ARRAY", "items": { "type": "STRING" } }
        }
    })
}

fn summary_request(transcript: &[Turn]) -> Value {
    json!({
        "contents": [content(
            Role::User,
            &format!(
                "Summarize this conversation, listing decisions and action items.\n\n{}",
                transcript_text(transcript)
            ),
        )],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": {
                "type": "OBJECT",
                "properties": {
                    "summary": { "type": "STRING" },
                    "decisions": { "type": "ARRAY", "items": { "type": "STRING" } },
                    "actionItems": { "type": "ARRAY", "items": { "type": "STRING" } }
                },
                "required": ["summary"]
            }
        }
    })
}

/// First text part of the first candidate.
fn extract_text(response: &Value) -> Result<String, GenerationError> {
    response
        .pointer("/candidates/0/content/parts/0/text")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| GenerationError::Malformed("no candidate text".to_string()))
}

fn parse_suggestions(text: &str) -> Result<[String; 3], GenerationError> {
    let items: Vec<String> = serde_json::from_str(text)?;
    let mut items = items.into_iter().filter(|s| !s.trim().is_empty());
    match (items.next(), items.next(), items.next()) {
        (Some(a), Some(b), Some(c)) => Ok([a, b, c]),
        _ => Err(GenerationError::Malformed(
            "fewer than three suggestions".to_string(),
        )),
    }
}

/// Generation that always yields a value.
#[derive(Clone, Default)]
pub struct FallbackGeneration {
    inner: Option<Arc<dyn Generation>>,
}

impl FallbackGeneration {
    pub fn new(inner: Option<Arc<dyn Generation>>) -> Self {
        Self { inner }
    }

    /// Only static fallbacks.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub async fn reply(&self, history: &[Turn], message: &str) -> String {
        let Some(inner) = &self.inner else {
            return FALLBACK_REPLY.to_string();
        };
        match inner.reply(history, message).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => FALLBACK_REPLY.to_string(),
            Err(e) => {
                warn!(error = %e, "Bot reply failed, using fallback");
                FALLBACK_REPLY.to_string()
            }
        }
    }

    pub async fn suggestions(&self, last_message: &str) -> [String; 3] {
        let fallback = || FALLBACK_SUGGESTIONS.map(str::to_string);
        let Some(inner) = &self.inner else {
            return fallback();
        };
        inner.suggestions(last_message).await.unwrap_or_else(|e| {
            warn!(error = %e, "Suggestions failed, using fallback");
            fallback()
        })
    }

    pub async fn summarize(&self, transcript: &[Turn]) -> Summary {
        let fallback = || Summary {
            summary: FALLBACK_SUMMARY.to_string(),
            ..Summary::default()
        };
        let Some(inner) = &self.inner else {
            return fallback();
        };
        inner.summarize(transcript).await.unwrap_or_else(|e| {
            warn!(error = %e, "Summary failed, using fallback");
            fallback()
        })
    }
}
