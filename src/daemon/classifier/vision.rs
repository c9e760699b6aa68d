//! Image classification through the Anthropic messages API.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("Vision classification timed out")]
    Timeout,
    #[error("Vision request failed: {0}")]
    Transport(String),
    #[error("Vision service answered {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Vision reply is malformed: {0}")]
    Malformed(String),
}

/// Sends an image and a prompt, returns the model's text reply.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VisionClient: Send + Sync {
    async fn describe(&self, image_jpeg: Vec<u8>, prompt: String) -> Result<String, VisionError>;
}

#[derive(Debug, Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    kind: &'static str,
    media_type: &'static str,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ContentBlock {
    Image { source: ImageSource },
    Text { text: String },
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ReplyBlock>,
}

#[derive(Debug, Deserialize)]
struct ReplyBlock {
    text: Option<String>,
}

pub struct AnthropicVisionClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl AnthropicVisionClient {
    pub fn new(
        endpoint: String,
        model: String,
        api_key: String,
        timeout: Duration,
    ) -> Result<Self, VisionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VisionError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model,
            api_key,
        })
    }
}

#[async_trait]
impl VisionClient for AnthropicVisionClient {
    #[instrument(skip(self, image_jpeg, prompt))]
    async fn describe(&self, image_jpeg: Vec<u8>, prompt: String) -> Result<String, VisionError> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: 100,
            messages: vec![Message {
                role: "user",
                content: vec![
                    ContentBlock::Image {
                        source: ImageSource {
                            kind: "base64",
                            media_type: "image/jpeg",
                            data: STANDARD.encode(image_jpeg),
                        },
                    },
                    ContentBlock::Text { text: prompt },
                ],
            }],
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.endpoint))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    VisionError::Timeout
                } else {
                    VisionError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VisionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let reply: MessagesResponse = response
            .json()
            .await
            .map_err(|e| VisionError::Malformed(e.to_string()))?;
        let text = reply
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");
        debug!("Vision reply {text:?}");
        Ok(text)
    }
}

/// What the model claims to see.
#[derive(Debug, Clone, PartialEq)]
pub struct VisionVerdict {
    pub project: Option<String>,
    pub confidence: f64,
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    project: Option<String>,
    confidence: Option<f64>,
}

const DEFAULT_VISION_CONFIDENCE: f64 = 0.5;

/// Extracts the first `{...}` span of `text` and reads `{project, confidence}` from it.
pub fn parse_verdict(text: &str) -> Result<VisionVerdict, VisionError> {
    let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) else {
        return Err(VisionError::Malformed(format!("no JSON object in {text:?}")));
    };
    if end < start {
        return Err(VisionError::Malformed(format!("no JSON object in {text:?}")));
    }
    let raw: RawVerdict = serde_json::from_str(&text[start..=end])
        .map_err(|e| VisionError::Malformed(e.to_string()))?;
    Ok(VisionVerdict {
        project: raw
            .project
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()),
        confidence: raw
            .confidence
            .filter(|v| v.is_finite())
            .unwrap_or(DEFAULT_VISION_CONFIDENCE)
            .clamp(0., 1.),
    })
}
