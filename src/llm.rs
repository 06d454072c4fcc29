//! OpenAI-compatible vision model client.
//!
//! Used for two optional enrichments: reading text out of uploaded images
//! and writing product descriptions. Both are best effort; callers fall back
//! when the model is unavailable.

use std::time::Duration;

use serde_json::{json, Value};

use crate::config::LlmConfig;
use crate::images::{self, ImageError};

/// Answer the model gives when an image holds no text
const NO_TEXT: &str = "NO_TEXT";

const THUMBNAIL_QUALITY: u8 = 85;

const OCR_PROMPT: &str = "Read the text in this image. \
Return ONLY the text exactly as visible, without punctuation, commentary or extra lines. \
If the image contains a drawing or object and no text, return a short plain name of the object. \
If there is nothing to read, return NO_TEXT.";

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("model returned no content")]
    EmptyResponse,

    #[error(transparent)]
    Image(#[from] ImageError),
}

/// Pulls readable text out of an image.
pub trait TextExtractor: Send + Sync {
    /// `Ok(None)` when the image has no text.
    fn extract_text(&self, image: &[u8]) -> Result<Option<String>, LlmError>;
}

/// Writes a short product description for a catalog image.
pub trait Describer: Send + Sync {
    fn describe(&self, image: &[u8], category: &str) -> Result<String, LlmError>;
}

pub struct LlmClient {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: String,
    model: String,
    thumbnail_size: u32,
}

impl LlmClient {
    /// `None` when the model is disabled or no API key is configured.
    pub fn from_config(config: &LlmConfig) -> Result<Option<Self>, LlmError> {
        if !config.is_usable() {
            return Ok(None);
        }
        let Some(api_key) = config.api_key.clone() else {
            return Ok(None);
        };

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Some(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            thumbnail_size: config.thumbnail_size,
        }))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn ask_about_image(&self, prompt: &str, image: &[u8], max_tokens: u32) -> Result<String, LlmError> {
        let thumbnail = images::thumbnail_jpeg(image, self.thumbnail_size, THUMBNAIL_QUALITY)?;

        let body = json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": prompt},
                    {"type": "image_url", "image_url": {"url": images::data_url(&thumbnail)}}
                ]
            }]
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let value: Value = resp.json()?;
        message_content(&value).ok_or(LlmError::EmptyResponse)
    }
}

impl TextExtractor for LlmClient {
    fn extract_text(&self, image: &[u8]) -> Result<Option<String>, LlmError> {
        let answer = self.ask_about_image(OCR_PROMPT, image, 300)?;
        let text = interpret_ocr_answer(&answer);
        match &text {
            Some(t) => log::debug!("extracted text from upload: '{}'", t),
            None => log::debug!("no text found in upload"),
        }
        Ok(text)
    }
}

impl Describer for LlmClient {
    fn describe(&self, image: &[u8], category: &str) -> Result<String, LlmError> {
        let prompt = format!(
            "Describe this {category} in 2-3 sentences. Focus on the design, style, and key features. \
             Be specific and appealing for an e-commerce listing."
        );
        self.ask_about_image(&prompt, image, 150)
    }
}

/// `choices[0].message.content`, trimmed, if non-empty.
fn message_content(value: &Value) -> Option<String> {
    value
        .pointer("/choices/0/message/content")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

fn interpret_ocr_answer(answer: &str) -> Option<String> {
    let answer = answer.trim();
    if answer.is_empty() || answer.eq_ignore_ascii_case(NO_TEXT) {
        return None;
    }
    Some(answer.to_string())
}
