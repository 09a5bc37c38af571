//! Sentiment scoring
//!
//! Turns a batch of post titles into a single 1-10 mood score by asking a
//! chat-completion model and reading the first integer of its answer.
//! Providers:
//! - OpenAI-compatible `/chat/completions`
//! - Neutral (always answers "5")

use crate::config::SentimentConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use async_trait::async_trait;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Lowest score
pub const MIN_SCORE: i32 = 1;

/// Highest score
pub const MAX_SCORE: i32 = 10;

/// Score used whenever no usable answer is available
pub use crate::db::models::NEUTRAL_SCORE;

/// Trait for the raw completion call
#[async_trait]
pub trait SentimentApi: Send + Sync {
    /// Send one prompt, get the raw text answer
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Model name used in logs
    fn model_name(&self) -> &str;
}

// ============================================================================
// OpenAI-compatible client
// ============================================================================

const SYSTEM_PROMPT: &str = "You rate the collective mood of online discussions. \
Answer with a single integer from 1 (very negative) to 10 (very positive) and nothing else.";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// OpenAI chat-completions client
pub struct OpenAiSentimentApi {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiSentimentApi {
    pub fn new(
        api_key: String,
        model: String,
        base_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            api_key,
            model,
            base_url: base_url
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }
}

#[async_trait]
impl SentimentApi for OpenAiSentimentApi {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.0,
            max_tokens: 8,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Sentiment {
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Sentiment {
                message: format!("API error {}: {}", status, body),
            });
        }

        let result: ChatResponse = response.json().await.map_err(|e| AppError::Sentiment {
            message: format!("Failed to parse response: {}", e),
        })?;

        result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AppError::Sentiment {
                message: "Empty response".to_string(),
            })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Provider that never calls out and always answers neutral
pub struct NeutralSentimentApi;

#[async_trait]
impl SentimentApi for NeutralSentimentApi {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        Ok(NEUTRAL_SCORE.to_string())
    }

    fn model_name(&self) -> &str {
        "neutral"
    }
}

/// Mock provider for testing
pub struct MockSentimentApi {
    answer: std::result::Result<String, String>,
    calls: AtomicUsize,
}

impl MockSentimentApi {
    /// Always answers `text`
    pub fn answering(text: impl Into<String>) -> Self {
        Self {
            answer: Ok(text.into()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Always fails with `message`
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            answer: Err(message.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SentimentApi for MockSentimentApi {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer.clone().map_err(|message| AppError::Sentiment { message })
    }

    fn model_name(&self) -> &str {
        "mock-sentiment"
    }
}

/// Create a sentiment provider based on configuration
pub fn create_sentiment_api(config: &SentimentConfig) -> Result<Arc<dyn SentimentApi>> {
    match config.provider.as_str() {
        "openai" => {
            let key = config
                .api_key
                .clone()
                .filter(|k| !k.is_empty())
                .ok_or_else(|| AppError::Configuration {
                    message: "sentiment.api_key is required for the openai provider".to_string(),
                })?;
            Ok(Arc::new(OpenAiSentimentApi::new(
                key,
                config.model.clone(),
                config.api_base.clone(),
                Duration::from_secs(config.timeout_secs),
            )?))
        }
        "neutral" => Ok(Arc::new(NeutralSentimentApi)),
        other => {
            tracing::warn!(provider = other, "Unknown sentiment provider, using neutral");
            Ok(Arc::new(NeutralSentimentApi))
        }
    }
}

// ============================================================================
// Scorer
// ============================================================================

fn integer_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"-?\d+").expect("integer pattern compiles"))
}

/// First integer in `answer`, clamped to the score range.
///
/// Digit runs too long for an integer saturate toward their sign.
pub fn parse_score(answer: &str) -> Option<i32> {
    let found = integer_pattern().find(answer)?.as_str();

    let value = found.parse::<i64>().unwrap_or(if found.starts_with('-') {
        i64::MIN
    } else {
        i64::MAX
    });

    Some(value.clamp(MIN_SCORE as i64, MAX_SCORE as i64) as i32)
}

/// Scores a batch of texts; never fails
#[derive(Clone)]
pub struct SentimentScorer {
    api: Arc<dyn SentimentApi>,
}

impl SentimentScorer {
    pub fn new(api: Arc<dyn SentimentApi>) -> Self {
        Self { api }
    }

    /// Mood of `texts` about `subject`, in 1..=10.
    ///
    /// Any failure along the way yields the neutral score.
    pub async fn score(&self, texts: &[String], subject: &str) -> i32 {
        if texts.is_empty() {
            return NEUTRAL_SCORE;
        }

        let prompt = build_prompt(texts, subject);

        let answer = match self.api.complete(&prompt).await {
            Ok(answer) => {
                metrics::record_sentiment(true);
                answer
            }
            Err(e) => {
                metrics::record_sentiment(false);
                metrics::record_sentiment_fallback("request_failed");
                tracing::warn!(
                    subject = subject,
                    model = self.api.model_name(),
                    error = %e,
                    "Sentiment request failed, using neutral score"
                );
                return NEUTRAL_SCORE;
            }
        };

        match parse_score(&answer) {
            Some(score) => score,
            None => {
                metrics::record_sentiment_fallback("unparseable");
                tracing::warn!(
                    subject = subject,
                    answer = %answer,
                    "No score in sentiment answer, using neutral score"
                );
                NEUTRAL_SCORE
            }
        }
    }
}

fn build_prompt(texts: &[String], subject: &str) -> String {
    let mut prompt = format!(
        "Rate the overall mood of these recent post titles about {} on a scale of 1 to 10.\n\n",
        subject
    );
    for text in texts {
        prompt.push_str("- ");
        prompt.push_str(text.trim());
        prompt.push('\n');
    }
    prompt
}
