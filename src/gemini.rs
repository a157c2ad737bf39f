//! Gemini API client for translation and speech synthesis.
//! Connection pooling via reqwest, simple minimum-interval rate limiting,
//! retry on 429 / 5xx / timeout.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use tracing::warn;

use crate::config::Config;
use crate::provider::{ProviderError, SpeechSynthesisProvider, TranslationProvider};

pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    translation_model: String,
    tts_model: String,
    tts_voice: String,
    /// Simple token-bucket: tracks the next allowed request time.
    next_allowed: Arc<tokio::sync::Mutex<Instant>>,
    /// Minimum interval between requests.
    min_interval: Duration,
}

impl GeminiClient {
    /// Reads `GEMINI_API_KEY`, falling back to `API_KEY`.
    pub fn from_env(config: &Config) -> Result<Self, ProviderError> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .or_else(|_| std::env::var("API_KEY"))
            .map_err(|_| ProviderError::NotConfigured("GEMINI_API_KEY is not set".into()))?;
        Self::new(api_key, config)
    }

    pub fn new(api_key: String, config: &Config) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            api_key,
            base_url: config.gemini_base_url.trim_end_matches('/').to_string(),
            translation_model: config.translation_model.clone(),
            tts_model: config.tts_model.clone(),
            tts_voice: config.tts_voice.clone(),
            next_allowed: Arc::new(tokio::sync::Mutex::new(Instant::now())),
            min_interval: Duration::from_millis(100), // 10 req/s
        })
    }

    /// Wait until the rate limiter allows a request.
    async fn rate_limit_wait(&self) {
        let mut next = self.next_allowed.lock().await;
        let now = Instant::now();
        if *next > now {
            tokio::time::sleep(*next - now).await;
        }
        *next = Instant::now() + self.min_interval;
    }

    async fn generate(
        &self,
        model: &str,
        body: &serde_json::Value,
    ) -> Result<GenerateResponse, ProviderError> {
        self.rate_limit_wait().await;
        let response = self.send_with_retry(model, body).await?;
        response
            .json::<GenerateResponse>()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))
    }

    /// Send request with retry logic.
    /// 429: Retry-After or 1s/2s/4s (max 3).
    /// 5xx: exponential backoff (max 2).
    /// Timeout: immediate retry once.
    async fn send_with_retry(
        &self,
        model: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, model);
        let mut attempt: u32 = 0;
        let max_429_retries: u32 = 3;
        let max_5xx_retries: u32 = 2;
        let mut timeout_retried = false;

        loop {
            let result = self
                .http
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .json(body)
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => {
                    return Ok(resp);
                }
                Ok(resp) if resp.status().as_u16() == 429 => {
                    if attempt >= max_429_retries {
                        return Err(ProviderError::RateLimited);
                    }
                    let wait = resp
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|s| s.parse::<u64>().ok())
                        .map(Duration::from_secs)
                        .unwrap_or_else(|| Duration::from_secs(1 << attempt));
                    warn!(attempt, wait_ms = wait.as_millis() as u64, "429 rate limited, retrying");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Ok(resp) if resp.status().is_server_error() => {
                    if attempt >= max_5xx_retries {
                        return Err(ProviderError::Status {
                            status: resp.status().as_u16(),
                            body: String::new(),
                        });
                    }
                    let wait = Duration::from_millis(500 * (1 << attempt));
                    warn!(
                        attempt,
                        status = resp.status().as_u16(),
                        wait_ms = wait.as_millis() as u64,
                        "5xx error, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let body_text = resp.text().await.unwrap_or_default();
                    return Err(ProviderError::Status {
                        status,
                        body: body_text.chars().take(200).collect(),
                    });
                }
                Err(e) if e.is_timeout() => {
                    if timeout_retried {
                        return Err(ProviderError::Timeout);
                    }
                    warn!("request timeout, retrying once");
                    timeout_retried = true;
                }
                Err(e) => {
                    return Err(ProviderError::Transport(e.to_string()));
                }
            }
        }
    }
}

#[async_trait]
impl TranslationProvider for GeminiClient {
    async fn translate(
        &self,
        text: &str,
        source_language_name: &str,
        target_language_name: &str,
    ) -> Result<String, ProviderError> {
        let prompt = build_translation_prompt(text, source_language_name, target_language_name);
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });
        let response = self.generate(&self.translation_model, &body).await?;
        extract_text(&response)
    }
}

#[async_trait]
impl SpeechSynthesisProvider for GeminiClient {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, ProviderError> {
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": text }] }],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {
                        "prebuiltVoiceConfig": { "voiceName": self.tts_voice }
                    }
                }
            }
        });
        let response = self.generate(&self.tts_model, &body).await?;
        extract_audio(&response)
    }
}

// --- Prompt construction ---

fn build_translation_prompt(text: &str, source: &str, target: &str) -> String {
    format!(
        "Translate the following text from {source} to {target}. \
         Only provide the translated text, without any additional explanation or preamble: \"{text}\""
    )
}

/// Concatenated text parts of the first candidate, trimmed.
fn extract_text(response: &GenerateResponse) -> Result<String, ProviderError> {
    let text: String = response
        .first_parts()
        .iter()
        .filter_map(|part| part.text.as_deref())
        .collect();
    let text = text.trim();
    if text.is_empty() {
        return Err(ProviderError::EmptyPayload("translation text"));
    }
    Ok(text.to_string())
}

/// Base64 inline audio of the first candidate's first part.
fn extract_audio(response: &GenerateResponse) -> Result<Vec<u8>, ProviderError> {
    let encoded = response
        .first_parts()
        .first()
        .and_then(|part| part.inline_data.as_ref())
        .map(|data| data.data.as_str())
        .filter(|data| !data.is_empty())
        .ok_or(ProviderError::EmptyPayload("audio data"))?;
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| ProviderError::Malformed(format!("audio base64: {e}")))
}

// --- Response types ---

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

impl GenerateResponse {
    fn first_parts(&self) -> &[Part] {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| content.parts.as_slice())
            .unwrap_or(&[])
    }
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: String,
}
