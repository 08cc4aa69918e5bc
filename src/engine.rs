use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::Config;
use crate::retry::{with_retry_if, RetryConfig};

/// Chat Completion request sent to the translation engine
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    max_completion_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

/// Batch translation client against an OpenAI-compatible chat completions
/// endpoint.
///
/// `translate_batch` is length- and order-preserving: the returned vector
/// always has one entry per input text, positionally aligned, with an empty
/// string meaning "no translation produced" for that position.
pub struct TranslationEngine {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl TranslationEngine {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.engine_timeout_secs))
            .build()
            .context("Failed to build translation engine HTTP client")?;

        Ok(Self {
            client,
            api_url: config.engine_api_url.clone(),
            api_key: config.engine_api_key.clone(),
            model: config.engine_model.clone(),
            max_tokens: config.engine_max_tokens,
        })
    }

    /// Translate a batch of source texts into `target_lang`.
    ///
    /// Retries transient failures (429, 5xx, network errors); other 4xx fail
    /// immediately. A request timeout surfaces as a network error and is
    /// treated like any other failed call by the orchestrator.
    pub async fn translate_batch(
        &self,
        texts: &[String],
        target_lang: &str,
    ) -> Result<Vec<String>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: build_system_prompt(target_lang, texts.len()),
                },
                Message {
                    role: "user".to_string(),
                    content: build_user_prompt(texts),
                },
            ],
            max_completion_tokens: self.max_tokens,
            temperature: 0.3,
        };

        let content = with_retry_if(
            &RetryConfig::engine_call(),
            &format!("Batch translation to {}", target_lang),
            || async {
                let response = self
                    .client
                    .post(&self.api_url)
                    .header("Authorization", format!("Bearer {}", self.api_key))
                    .header("Content-Type", "application/json")
                    .json(&request)
                    .send()
                    .await
                    .context("Failed to send request to translation engine")?;

                if !response.status().is_success() {
                    let status = response.status();
                    let body = response
                        .text()
                        .await
                        .unwrap_or_else(|e| format!("<failed to read body: {}>", e));
                    anyhow::bail!("Translation engine error ({}): {}", status, body);
                }

                let chat_response: ChatResponse = response
                    .json()
                    .await
                    .context("Failed to parse translation engine response")?;

                chat_response
                    .choices
                    .first()
                    .map(|c| c.message.content.clone())
                    .context("Translation engine response contained no choices")
            },
            is_retryable_error,
        )
        .await?;

        let translations = parse_numbered_response(&content, texts.len())?;
        debug!(
            "Engine returned {}/{} non-empty translations for {}",
            translations.iter().filter(|t| !t.is_empty()).count(),
            texts.len(),
            target_lang
        );
        Ok(translations)
    }
}

/// Build the system prompt for batch translation
fn build_system_prompt(target_lang: &str, count: usize) -> String {
    format!(
        r#"You are a professional software localization translator. Translate each numbered UI string to the language with code {target}.

## Rules

- Preserve ALL format placeholders exactly: %s, %d, %1$s, %2$d, {{name}}, and similar
- Preserve inline markup tags such as <b>, <u>, <a href="...">
- Do not translate product names or technical identifiers
- Keep the tone concise, as befits user-interface text

## Output format

- Return EXACTLY {count} lines, one per input string
- Each line must start with its number followed by a period: `1. <translation>`
- Keep every translation on a single line
- If a string cannot be translated, output only its number and period with nothing after it"#,
        target = target_lang,
        count = count
    )
}

/// Build the user prompt listing the source texts
fn build_user_prompt(texts: &[String]) -> String {
    let numbered = texts
        .iter()
        .enumerate()
        .map(|(i, t)| format!("{}. {}", i + 1, t))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Translate the following {} strings:\n\n{}",
        texts.len(),
        numbered
    )
}

/// Map the engine's numbered reply back to a same-length vector.
///
/// Lines the engine failed to produce come back as empty strings, keeping
/// positional alignment with the input. A reply with no recognizable
/// numbering at all is accepted only for single-item batches, where the
/// whole reply is the translation.
fn parse_numbered_response(content: &str, expected: usize) -> Result<Vec<String>> {
    let line_re =
        Regex::new(r"(?m)^\s*(\d+)\s*[.)]\s*(.*?)\s*$").context("Invalid response pattern")?;

    let mut translations = vec![String::new(); expected];
    let mut matched_any = false;

    for captures in line_re.captures_iter(content) {
        let index: usize = match captures[1].parse() {
            Ok(i) => i,
            Err(_) => continue,
        };
        if index == 0 || index > expected {
            continue;
        }
        matched_any = true;
        translations[index - 1] = captures[2].to_string();
    }

    if !matched_any {
        if expected == 1 && !content.trim().is_empty() {
            translations[0] = content.trim().to_string();
        } else if expected > 0 {
            anyhow::bail!(
                "Translation engine reply had no numbered lines for a batch of {}",
                expected
            );
        }
    }

    Ok(translations)
}

/// Determine if an error is retryable (5xx errors, 429 rate limit, network
/// errors). Other 4xx client errors should not be retried.
fn is_retryable_error(error: &anyhow::Error) -> bool {
    let error_str = error.to_string();

    // Error format: "Translation engine error (400 Bad Request): ..."
    if error_str.contains("Translation engine error") {
        if let Some(start) = error_str.find('(') {
            if let Some(end) = error_str[start..].find(')') {
                let status_str = &error_str[start + 1..start + end];
                let status_num = status_str.split_whitespace().next().unwrap_or("");
                if let Ok(status) = status_num.parse::<u16>() {
                    return status == 429 || status >= 500;
                }
            }
        }
    }

    // Retry network errors, timeouts, and other transient failures
    true
}
