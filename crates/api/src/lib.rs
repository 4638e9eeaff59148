//! Claude API client utilities.
//!
//! This crate provides a lightweight client for the Anthropic Messages API used
//! by the `claude` workflow module. It focuses on:
//!
//! - Constructing an HTTP client with sensible defaults
//! - Discovering credentials from `CLAUDE_API_KEY` or `ANTHROPIC_API_KEY`
//! - Validating `CLAUDE_API_BASE` for safety
//! - Sending a single-turn message request and decoding the reply
//!
//! # Example
//!
//! ```ignore
//! use cadence_api::{ClaudeClient, MessageRequest};
//!
//! async fn ask() -> anyhow::Result<String> {
//!     let client = ClaudeClient::new_from_env(None)?;
//!     let reply = client.create_message(&MessageRequest::user_prompt("Summarize the diff")).await?;
//!     Ok(reply.text())
//! }
//! ```

use std::env;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::{Client, Url, header};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Environment variables consulted for the API key, in order.
pub const API_KEY_ENV_VARS: &[&str] = &["CLAUDE_API_KEY", "ANTHROPIC_API_KEY"];
/// Environment variable overriding the API base URL.
pub const API_BASE_ENV: &str = "CLAUDE_API_BASE";
pub const DEFAULT_API_BASE: &str = "https://api.anthropic.com";
pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";
pub const DEFAULT_MAX_TOKENS: u32 = 2048;
pub const DEFAULT_TEMPERATURE: f64 = 0.2;
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an AI software engineer helping with a local-first dev assistant.";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Hostnames allowed for local development regardless of scheme.
const LOCALHOST_DOMAINS: &[&str] = &["localhost", "127.0.0.1"];

#[derive(Debug, Clone)]
/// Thin wrapper around a configured `reqwest::Client` for the Messages API.
pub struct ClaudeClient {
    pub base_url: String,
    pub http: Client,
    pub user_agent: String,
}

impl ClaudeClient {
    /// Construct a client from the environment.
    ///
    /// `api_key` overrides the environment lookup when present. The base URL
    /// comes from `CLAUDE_API_BASE` or the public endpoint.
    pub fn new_from_env(api_key: Option<&str>) -> Result<Self> {
        let api_key = api_key
            .map(str::to_string)
            .or_else(api_key_from_env)
            .ok_or_else(|| anyhow!("CLAUDE_API_KEY not set and no apiKey provided"))?;
        let base_url = env::var(API_BASE_ENV).unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
        Self::new(&api_key, &base_url)
    }

    /// Construct a client with an explicit key and base URL.
    pub fn new(api_key: &str, base_url: &str) -> Result<Self> {
        validate_base_url(base_url)?;

        let mut default_headers = header::HeaderMap::new();
        default_headers.insert("x-api-key", header::HeaderValue::from_str(api_key).context("invalid API key header")?);
        default_headers.insert("anthropic-version", header::HeaderValue::from_static(ANTHROPIC_VERSION));
        default_headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .default_headers(default_headers)
            .timeout(Duration::from_secs(120))
            .build()
            .context("build http client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            user_agent: format!("cadence/0.1; {}", env::consts::OS),
        })
    }

    /// Send a message request and decode the reply.
    ///
    /// Non-success statuses become errors carrying the status code and the
    /// API's error payload.
    pub async fn create_message(&self, request: &MessageRequest) -> Result<MessageResponse> {
        let url = format!("{}/v1/messages", self.base_url);
        debug!(%url, model = %request.model, "sending message request");

        let response = self
            .http
            .post(&url)
            .header(header::USER_AGENT, &self.user_agent)
            .json(request)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?;

        let status = response.status();
        let body = response.text().await.context("read response body")?;
        if !status.is_success() {
            let detail = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|value| value.get("error").cloned())
                .map(|error| error.to_string())
                .unwrap_or(body);
            return Err(anyhow!("Claude API returned {}: {}", status.as_u16(), detail));
        }

        serde_json::from_str(&body).context("decode Claude response")
    }
}

/// Request body for `POST /v1/messages`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MessageRequest {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub system: String,
    pub messages: Vec<Message>,
}

impl MessageRequest {
    /// Single user turn with default model settings.
    pub fn user_prompt(prompt: impl Into<String>) -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            system: DEFAULT_SYSTEM_PROMPT.to_string(),
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.into(),
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: String,
    pub content: String,
}

/// Decoded reply from the Messages API.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MessageResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl MessageResponse {
    /// Text of the first text block, or an empty string.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .find(|block| block.kind == "text")
            .and_then(|block| block.text.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

fn api_key_from_env() -> Option<String> {
    API_KEY_ENV_VARS
        .iter()
        .filter_map(|name| env::var(name).ok())
        .find(|value| !value.trim().is_empty())
}

/// Validate that a base URL is acceptable for use by the client.
///
/// Rules:
/// - `localhost` or `127.0.0.1`: any scheme is allowed
/// - otherwise: scheme must be HTTPS
pub fn validate_base_url(base: &str) -> Result<()> {
    let parsed_base_url = Url::parse(base).map_err(|e| anyhow!("Invalid {} URL '{}': {}", API_BASE_ENV, base, e))?;

    let host_name = parsed_base_url
        .host_str()
        .ok_or_else(|| anyhow!("{} must include a host", API_BASE_ENV))?;

    if LOCALHOST_DOMAINS
        .iter()
        .any(|&allowed| host_name.eq_ignore_ascii_case(allowed))
    {
        return Ok(());
    }

    if parsed_base_url.scheme() != "https" {
        return Err(anyhow!(
            "{} must use https for non-localhost hosts; got '{}://'",
            API_BASE_ENV,
            parsed_base_url.scheme()
        ));
    }

    Ok(())
}
