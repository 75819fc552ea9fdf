use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use base64ct::{Base64, Encoding};
use serde::{Deserialize, Serialize};
use url::Url;

/// Handle on the hosted vision model. Built once at startup and handed to
/// every request through the application state; the inner reqwest client
/// carries the per-call timeout and the shared connection pool.
#[derive(Clone)]
pub struct StylistClient {
    http: reqwest::Client,
    chat_url: Url,
    api_key: String,
    model: String,
}

impl StylistClient {
    pub fn new(base_url: &str, api_key: &str, model: &str, timeout: Duration) -> Result<Self> {
        let chat_url = Url::parse(&format!(
            "{}/chat/completions",
            base_url.trim_end_matches('/')
        ))
        .context("Invalid API base URL")?;
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(StylistClient {
            http,
            chat_url,
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    /// One round trip against the chat completions API: system
    /// instruction, user prompt and the photo as an inline data URI.
    /// Every failure mode here counts as a service error; whether the
    /// returned text is acceptable is the caller's judgment.
    #[tracing::instrument(level = "info", skip(self, system, prompt, image))]
    pub(crate) async fn chat_completion(
        &self,
        system: &str,
        prompt: &str,
        image: &ImagePayload,
        max_tokens: u16,
        temperature: f32,
    ) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: MessageContent::Text(system),
                },
                Message {
                    role: "user",
                    content: MessageContent::Parts(vec![
                        Part::Text { text: prompt },
                        Part::ImageUrl {
                            image_url: ImageUrl {
                                url: image.to_data_uri(),
                            },
                        },
                    ]),
                },
            ],
            max_tokens,
            temperature,
        };

        let response = self
            .http
            .post(self.chat_url.clone())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .map(|response| response.error.message)
                .unwrap_or(body);
            return Err(anyhow!("Service responded with {status}: {detail}"));
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .context("Failed to decode completion body")?;
        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Completion contained no choices"))?;

        Ok(choice.message.content.trim().to_string())
    }
}

/// Uploaded photo, kept in memory for the lifetime of one request.
#[derive(Clone, Debug)]
pub struct ImagePayload {
    pub bytes: Box<[u8]>,
    pub mime: String,
}

impl ImagePayload {
    pub(crate) fn to_data_uri(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime,
            Base64::encode_string(&self.bytes)
        )
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u16,
    temperature: f32,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: MessageContent<'a>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum MessageContent<'a> {
    Text(&'a str),
    Parts(Vec<Part<'a>>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Part<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageResponse,
}

#[derive(Deserialize)]
struct MessageResponse {
    content: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}
