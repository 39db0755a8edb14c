use std::future::Future;
use std::pin::Pin;

use dc_core::core::{ExternalGenerator, GenerationError, GenerationPrompt};

use crate::bootstrap::ExternalSettings;

const INFERENCE_PATH: &str = "/v1/chat/completions";

/// Upper bound on the error body kept in `GenerationError::HttpStatus`.
const MAX_ERROR_BODY: usize = 512;

// ---------------------------------------------------------------------------
// OpenAiChatGenerator — OpenAI-compatible chat completions endpoint
// ---------------------------------------------------------------------------

pub struct OpenAiChatGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiChatGenerator {
    pub fn new(settings: &ExternalSettings) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}{INFERENCE_PATH}", settings.base_url),
            model: settings.model.clone(),
            api_key: settings.api_key(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn build_request_body(&self, prompt: &GenerationPrompt) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": prompt.system},
                {"role": "user", "content": prompt.request},
            ],
            "stream": false,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        })
    }
}

impl ExternalGenerator for OpenAiChatGenerator {
    fn name(&self) -> &str {
        &self.model
    }

    fn complete<'a>(
        &'a self,
        prompt: &'a GenerationPrompt,
    ) -> Pin<Box<dyn Future<Output = Result<String, GenerationError>> + Send + 'a>> {
        Box::pin(async move {
            let mut request = self
                .client
                .post(&self.endpoint)
                .json(&self.build_request_body(prompt));
            if let Some(key) = self.api_key.as_deref() {
                request = request.bearer_auth(key);
            }

            let resp = request
                .send()
                .await
                .map_err(|e| GenerationError::Transport(e.to_string()))?;

            let status = resp.status();
            let body = resp
                .bytes()
                .await
                .map_err(|e| GenerationError::Transport(e.to_string()))?;

            if !status.is_success() {
                let mut text = String::from_utf8_lossy(&body).into_owned();
                if text.len() > MAX_ERROR_BODY {
                    let cut = (0..=MAX_ERROR_BODY)
                        .rev()
                        .find(|&i| text.is_char_boundary(i))
                        .unwrap_or(0);
                    text.truncate(cut);
                }
                return Err(GenerationError::HttpStatus {
                    status: status.as_u16(),
                    body: text,
                });
            }

            tracing::debug!(
                model = %self.model,
                concern = %prompt.concern,
                bytes = body.len(),
                "external completion received"
            );
            parse_completion(&body)
        })
    }
}

// ---------------------------------------------------------------------------
// Response wire types (Deserialize only)
// ---------------------------------------------------------------------------

#[derive(serde::Deserialize)]
struct OaiResponseWire {
    choices: Vec<OaiChoiceWire>,
}

#[derive(serde::Deserialize)]
struct OaiChoiceWire {
    message: OaiMessageWire,
}

#[derive(serde::Deserialize)]
struct OaiMessageWire {
    content: Option<String>,
}

/// Content of the first choice of a chat completion response.
pub fn parse_completion(body: &[u8]) -> Result<String, GenerationError> {
    let resp: OaiResponseWire =
        serde_json::from_slice(body).map_err(|e| GenerationError::Malformed(e.to_string()))?;
    resp.choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| GenerationError::Malformed("completion has no content".to_owned()))
}
