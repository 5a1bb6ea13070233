use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::env;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("coach model not configured (missing API key)")]
    NotConfigured,
    #[error("coach request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("coach API error: {0}")]
    Api(String),
    #[error("malformed coach response")]
    Malformed,
}

/// One tool invocation as the model requested it. Arguments stay the raw
/// JSON string from the wire; parsing is the dispatcher's job.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone)]
pub struct AgentReply {
    /// Raw assistant message, replayed verbatim into the transcript so the
    /// model can correlate tool results with its own calls.
    pub message: Value,
    pub content: Option<String>,
    pub tool_calls: Vec<ToolInvocation>,
}

/// The language model behind the study coach. The loop only ever sees this
/// trait; the HTTP implementation below is swapped for a scripted fake in
/// tests.
#[async_trait]
pub trait CoachModel: Send + Sync {
    async fn complete(
        &self,
        messages: &[Value],
        tools: Option<&[Value]>,
    ) -> Result<AgentReply, AgentError>;
}

#[derive(Debug, Clone)]
pub struct CoachConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout_seconds: u64,
}

impl CoachConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: env::var("OPENAI_API_KEY").ok(),
            base_url: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".into()),
            model: env::var("COACH_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into()),
            timeout_seconds: env::var("COACH_TIMEOUT_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
        }
    }
}

pub struct OpenAiCoach {
    config: CoachConfig,
    client: Client,
}

impl OpenAiCoach {
    pub fn new(config: CoachConfig) -> Result<Self, AgentError> {
        if config.api_key.is_none() {
            warn!("OPENAI_API_KEY not set, coach will be unavailable");
        }
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl CoachModel for OpenAiCoach {
    async fn complete(
        &self,
        messages: &[Value],
        tools: Option<&[Value]>,
    ) -> Result<AgentReply, AgentError> {
        let api_key = self.config.api_key.as_ref().ok_or(AgentError::NotConfigured)?;

        let mut payload = json!({
            "model": self.config.model,
            "messages": messages,
        });
        if let Some(tools) = tools {
            payload["tools"] = Value::Array(tools.to_vec());
        }

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&payload)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(AgentError::Api(resp.status().to_string()));
        }
        let body: Value = resp.json().await?;
        parse_reply(&body)
    }
}

fn parse_reply(body: &Value) -> Result<AgentReply, AgentError> {
    let message = body["choices"][0]["message"].clone();
    if message.is_null() {
        return Err(AgentError::Malformed);
    }

    let content = message["content"].as_str().map(str::to_string);
    let mut tool_calls = Vec::new();
    if let Some(calls) = message["tool_calls"].as_array() {
        for call in calls {
            let id = call["id"].as_str().ok_or(AgentError::Malformed)?.to_string();
            let name = call["function"]["name"]
                .as_str()
                .ok_or(AgentError::Malformed)?
                .to_string();
            let arguments = call["function"]["arguments"].as_str().unwrap_or("{}").to_string();
            tool_calls.push(ToolInvocation { id, name, arguments });
        }
    }

    Ok(AgentReply { message, content, tool_calls })
}
