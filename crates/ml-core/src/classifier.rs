//! Remote classifier client.
//!
//! Speaks the OpenAI-compatible chat-completions dialect served by Ollama and
//! similar runtimes. One [`reqwest::blocking::Client`] is kept for the life of
//! the classifier so keep-alive connections are reused across calls.

use std::time::Duration;

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::verdict::ParseError;

/// Prompt sent alongside every frame.
pub const FIRE_PROMPT: &str = r#"You are an expert fire and smoke detection AI with high sensitivity to smoke.

SMOKE indicators to look for (even subtle signs):
- Hazy, milky, or cloudy air that reduces visibility or blurs background details
- Grey, white, brown, or yellowish drifting wisps or plumes
- Semi-transparent layers floating in the air
- Unusual haziness around light sources or windows
- Diffuse cloudiness that was not present in a normal scene
- Any airborne particles that obscure or soften edges of objects

FIRE indicators:
- Orange, red, or yellow flames
- Glowing embers or bright flickering light
- Charred or burning objects

Be sensitive: if you see ANY haze, unusual cloudiness, or airborne particles, detect it as smoke.

Answer ONLY in this exact JSON format (no extra text):
{"detected": true/false, "type": "fire"|"smoke"|"both"|"none", "confidence": "high"|"medium"|"low", "description": "one short sentence describing what you see"}

Examples:
{"detected": true, "type": "smoke", "confidence": "high", "description": "Thick grey smoke plume rising from lower left"}
{"detected": true, "type": "fire", "confidence": "high", "description": "Large orange flames on right side of frame"}
{"detected": true, "type": "both", "confidence": "high", "description": "Active flames with heavy smoke filling upper area"}
{"detected": false, "type": "none", "confidence": "high", "description": "Clear indoor scene, no haze or fire visible"}"#;

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("classifier call timed out after {0:?}")]
    Timeout(Duration),
    #[error("classifier transport error: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("classifier returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("classifier returned no completion")]
    EmptyCompletion,
    #[error("failed to build classifier client: {0}")]
    Client(#[source] reqwest::Error),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl ClassifyError {
    /// Short metric label for the failure class.
    pub fn kind(&self) -> &'static str {
        match self {
            ClassifyError::Timeout(_) => "timeout",
            ClassifyError::Transport(_) => "transport",
            ClassifyError::Status { .. } => "status",
            ClassifyError::EmptyCompletion => "empty",
            ClassifyError::Client(_) => "client",
            ClassifyError::Parse(_) => "parse",
        }
    }
}

/// Something that turns a JPEG into the model's raw textual answer.
pub trait Classifier: Send {
    fn classify(&mut self, jpeg: &[u8]) -> Result<String, ClassifyError>;
}

#[derive(Clone, Debug)]
pub struct OllamaSettings {
    pub endpoint: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout: Duration,
    pub prompt: String,
}

/// Blocking chat-completions client.
pub struct OllamaClassifier {
    client: reqwest::blocking::Client,
    settings: OllamaSettings,
}

impl OllamaClassifier {
    pub fn new(settings: OllamaSettings) -> Result<Self, ClassifyError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(settings.timeout)
            .pool_max_idle_per_host(1)
            .build()
            .map_err(ClassifyError::Client)?;
        Ok(Self { client, settings })
    }
}

impl Classifier for OllamaClassifier {
    fn classify(&mut self, jpeg: &[u8]) -> Result<String, ClassifyError> {
        let body = build_request(&self.settings, jpeg);
        let response = self
            .client
            .post(&self.settings.endpoint)
            .json(&body)
            .send()
            .map_err(|err| self.map_transport(err))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ClassifyError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let completion: ChatCompletion = response.json().map_err(|err| self.map_transport(err))?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(ClassifyError::EmptyCompletion)?;
        debug!(chars = content.len(), "classifier completion received");
        Ok(content)
    }
}

impl OllamaClassifier {
    fn map_transport(&self, err: reqwest::Error) -> ClassifyError {
        if err.is_timeout() {
            ClassifyError::Timeout(self.settings.timeout)
        } else {
            ClassifyError::Transport(err)
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: [ContentPart<'a>; 2],
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatContent,
}

#[derive(Deserialize)]
struct ChatContent {
    #[serde(default)]
    content: String,
}

fn build_request<'a>(settings: &'a OllamaSettings, jpeg: &[u8]) -> ChatRequest<'a> {
    let data_uri = format!("data:image/jpeg;base64,{}", STANDARD.encode(jpeg));
    ChatRequest {
        model: &settings.model,
        max_tokens: settings.max_tokens,
        messages: [ChatMessage {
            role: "user",
            content: [
                ContentPart::Text {
                    text: &settings.prompt,
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl { url: data_uri },
                },
            ],
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> OllamaSettings {
        OllamaSettings {
            endpoint: "http://127.0.0.1:11434/v1/chat/completions".into(),
            model: "gemma3:4b".into(),
            max_tokens: 80,
            timeout: Duration::from_secs(5),
            prompt: "look for fire".into(),
        }
    }

    #[test]
    fn request_body_matches_chat_completions_shape() {
        let settings = settings();
        let body = serde_json::to_value(build_request(&settings, &[0xFF, 0xD8, 0xFF])).unwrap();

        assert_eq!(body["model"], "gemma3:4b");
        assert_eq!(body["max_tokens"], 80);
        let content = &body["messages"][0]["content"];
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[0]["text"], "look for fire");
        assert_eq!(content[1]["type"], "image_url");
        assert_eq!(content[1]["image_url"]["url"], "data:image/jpeg;base64,/9j/");
    }

    #[test]
    fn completion_content_is_extracted() {
        let completion: ChatCompletion = serde_json::from_str(
            r#"{"choices":[{"index":0,"message":{"role":"assistant","content":"{\"detected\":false}"}}]}"#,
        )
        .unwrap();
        assert_eq!(completion.choices[0].message.content, r#"{"detected":false}"#);
    }

    #[test]
    fn error_kinds_are_stable_labels() {
        assert_eq!(ClassifyError::Timeout(Duration::from_secs(1)).kind(), "timeout");
        assert_eq!(ClassifyError::EmptyCompletion.kind(), "empty");
        assert_eq!(ClassifyError::Parse(ParseError::Empty).kind(), "parse");
    }

    #[test]
    fn unreachable_endpoint_is_a_transport_failure() {
        let mut classifier = OllamaClassifier::new(OllamaSettings {
            endpoint: "http://127.0.0.1:9/v1/chat/completions".into(),
            timeout: Duration::from_secs(2),
            ..settings()
        })
        .unwrap();
        let err = classifier.classify(&[1, 2, 3]).unwrap_err();
        assert!(matches!(
            err,
            ClassifyError::Transport(_) | ClassifyError::Timeout(_)
        ));
    }
}
