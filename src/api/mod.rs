//! Wire payloads for the Azure OpenAI chat, vision, and image endpoints.
//!
//! Assistant-run payloads live in [`assistant`].

use serde::{Deserialize, Serialize};

pub mod assistant;

/// One element of a multi-part user message.
///
/// Image parts carry the whole data URI as a flat string, which is the
/// shape the vision deployments accept.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "image_url")]
    ImageUrl { image_url: String },
    #[serde(rename = "text")]
    Text { text: String },
}

/// Message content: either plain text or an ordered part sequence.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum ChatContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl ChatContent {
    /// Plain-text view of the content, flattening part sequences to their
    /// text segments. Used for transcripts and history, never for wire
    /// payloads.
    pub fn display_text(&self) -> String {
        match self {
            ChatContent::Text(text) => text.clone(),
            ChatContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Serialize, Clone, Debug)]
pub struct ChatMessage {
    pub role: String,
    pub content: ChatContent,
}

#[derive(Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

#[derive(Deserialize)]
pub struct ChatResponseDelta {
    pub content: Option<String>,
}

#[derive(Deserialize)]
pub struct ChatStreamChoice {
    pub delta: ChatResponseDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Deserialize)]
pub struct ChatStreamResponse {
    pub choices: Vec<ChatStreamChoice>,
}

#[derive(Deserialize)]
pub struct ChatCompletionMessage {
    pub content: Option<String>,
}

#[derive(Deserialize)]
pub struct ChatCompletionChoice {
    pub message: ChatCompletionMessage,
}

#[derive(Deserialize)]
pub struct ChatCompletionResponse {
    pub choices: Vec<ChatCompletionChoice>,
}

/// Vision `extensions` request with OCR and grounding enhancements backed
/// by an Azure Computer Vision resource.
#[derive(Serialize)]
pub struct VisionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub enhancements: VisionEnhancements,
    #[serde(rename = "dataSources")]
    pub data_sources: Vec<VisionDataSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

#[derive(Serialize)]
pub struct VisionEnhancements {
    pub ocr: FeatureToggle,
    pub grounding: FeatureToggle,
}

#[derive(Serialize)]
pub struct FeatureToggle {
    pub enabled: bool,
}

#[derive(Serialize)]
pub struct VisionDataSource {
    #[serde(rename = "type")]
    pub kind: String,
    pub parameters: VisionDataSourceParameters,
}

#[derive(Serialize)]
pub struct VisionDataSourceParameters {
    pub endpoint: String,
    pub key: String,
}

impl VisionEnhancements {
    pub fn ocr_and_grounding() -> Self {
        VisionEnhancements {
            ocr: FeatureToggle { enabled: true },
            grounding: FeatureToggle { enabled: true },
        }
    }
}

#[derive(Serialize)]
pub struct ImageRequest {
    pub prompt: String,
    pub size: String,
    pub style: String,
    pub quality: String,
    pub n: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

#[derive(Deserialize)]
pub struct ImageData {
    pub url: String,
    pub revised_prompt: Option<String>,
}

#[derive(Deserialize)]
pub struct ImageResponse {
    pub data: Vec<ImageData>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_content_serializes_as_string() {
        let message = ChatMessage {
            role: "user".to_string(),
            content: ChatContent::Text("hello".to_string()),
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["content"], "hello");
    }

    #[test]
    fn part_content_serializes_with_flat_image_url() {
        let message = ChatMessage {
            role: "user".to_string(),
            content: ChatContent::Parts(vec![
                ContentPart::ImageUrl {
                    image_url: "data:image/jpeg;base64,QUJD".to_string(),
                },
                ContentPart::Text {
                    text: "what is this?".to_string(),
                },
            ]),
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["content"][0]["type"], "image_url");
        assert_eq!(json["content"][0]["image_url"], "data:image/jpeg;base64,QUJD");
        assert_eq!(json["content"][1]["type"], "text");
        assert_eq!(json["content"][1]["text"], "what is this?");
    }

    #[test]
    fn display_text_flattens_parts() {
        let content = ChatContent::Parts(vec![
            ContentPart::ImageUrl {
                image_url: "data:image/jpeg;base64,QUJD".to_string(),
            },
            ContentPart::Text {
                text: "caption".to_string(),
            },
        ]);
        assert_eq!(content.display_text(), "caption");
    }
}
