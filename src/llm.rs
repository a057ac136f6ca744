use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::config::Config;

/// -------- HTTP client --------
static HTTP: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(120))
        .build()
        .expect("failed to build HTTP client")
});

/// Capability the engine plans through: prompt in, text out. Injected so
/// tests can substitute a deterministic fake for the live provider.
#[async_trait]
pub trait PlannerClient: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

/// Any provider speaking the OpenAI-compatible chat completions dialect
/// (Ollama, OpenAI, Groq, local gateways) works here.
pub struct HttpPlanner {
    model: String,
    base_url: String,
}

impl HttpPlanner {
    pub fn from_config(config: &Config) -> Self {
        let model = env::var("MODEL_ID")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| config.model.clone());
        let base_url = env::var("BASE_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| config.base_url.clone());
        Self { model, base_url }
    }
}

// Local providers need no key.
fn api_key() -> Option<String> {
    env::var("API_KEY").ok().filter(|s| !s.trim().is_empty())
}

/// -------- Chat payloads --------
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMsgOut,
}

#[derive(Deserialize)]
struct ChatMsgOut {
    content: String,
}

#[async_trait]
impl PlannerClient for HttpPlanner {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let req = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: Some(0.2),
        };

        let mut builder = HTTP
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(key) = api_key() {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", key));
        }

        let res = builder
            .json(&req)
            .send()
            .await
            .context("LLM HTTP request failed")?;

        let status = res.status();
        let text = res.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(anyhow!("LLM error {}: {}", status.as_u16(), text));
        }

        let parsed: ChatResponse = serde_json::from_str(&text).context("LLM JSON decode failed")?;
        let out = parsed
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default();
        Ok(out)
    }
}

/// Salvage a JSON body that the model wrapped in markdown code fences.
pub fn strip_code_fences(s: &str) -> &str {
    s.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

#[cfg(test)]
pub struct ScriptedPlanner {
    // None entries simulate a provider outage.
    replies: std::sync::Mutex<std::collections::VecDeque<Option<String>>>,
}

#[cfg(test)]
impl ScriptedPlanner {
    pub fn new<I>(replies: I) -> Self
    where
        I: IntoIterator<Item = Option<String>>,
    {
        Self {
            replies: std::sync::Mutex::new(replies.into_iter().collect()),
        }
    }

    pub fn failing() -> Self {
        Self::new(std::iter::empty())
    }
}

#[cfg(test)]
#[async_trait]
impl PlannerClient for ScriptedPlanner {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
        match self.replies.lock().unwrap().pop_front() {
            Some(Some(reply)) => Ok(reply),
            Some(None) => Err(anyhow!("provider unavailable")),
            None => Err(anyhow!("scripted replies exhausted")),
        }
    }
}
