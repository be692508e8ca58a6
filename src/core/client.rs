use base64::prelude::BASE64_STANDARD;
use base64::Engine as _;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::api::{
    ChatCompletionResponse, ChatMessage, ChatRequest, ContentPart, ImageRequest, ImageResponse,
    VisionDataSource, VisionDataSourceParameters, VisionEnhancements, VisionRequest,
};
use crate::core::chat_stream::{
    emit_single_shot, run_chat_stream, StreamMessage, StreamOutcome, StreamParams, TransportError,
};
use crate::core::config::{ModelConfig, ModelKind};
use crate::core::message::Message;
use crate::utils::url::deployment_url;

/// A content-routing rule: when the active system message contains the
/// trigger substring, the outbound user text is wrapped in the rule's
/// template instead of being sent verbatim.
#[derive(Debug, Clone)]
pub struct RewriteRule {
    pub trigger: String,
    pub prefix: String,
    pub suffix: String,
}

impl RewriteRule {
    /// The built-in rule: translation-flavored system messages turn the
    /// question into an explicit translation instruction.
    pub fn translate() -> Self {
        Self {
            trigger: "翻譯".to_string(),
            prefix: "翻譯下列內容:\n\n#####".to_string(),
            suffix: "#####".to_string(),
        }
    }

    pub fn applies_to(&self, system_text: &str) -> bool {
        system_text.contains(&self.trigger)
    }

    pub fn rewrite(&self, question: &str) -> String {
        format!("{}{}{}", self.prefix, question, self.suffix)
    }
}

pub fn builtin_rewrite_rules() -> Vec<RewriteRule> {
    vec![RewriteRule::translate()]
}

/// An image riding along with a question. The vision deployments accept
/// inline base64 JPEG data URIs.
#[derive(Debug, Clone)]
pub struct ImageAttachment {
    bytes: Vec<u8>,
}

impl ImageAttachment {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub async fn read(path: &std::path::Path) -> std::io::Result<Self> {
        Ok(Self::new(tokio::fs::read(path).await?))
    }

    pub fn to_data_uri(&self) -> String {
        format!("data:image/jpeg;base64,{}", BASE64_STANDARD.encode(&self.bytes))
    }
}

#[derive(Debug, Clone)]
pub struct ImagePrompt {
    pub prompt: String,
    pub size: String,
    pub style: String,
    pub quality: String,
}

impl ImagePrompt {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            size: "1024x1024".to_string(),
            style: "vivid".to_string(),
            quality: "hd".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub revised_prompt: String,
    pub bytes: Vec<u8>,
}

/// Degrades an image-generation result at the presentation boundary:
/// failures surface as the error text in place of the revised prompt,
/// paired with an absent image. Internal callers keep the typed error.
pub fn present_image_result(
    result: Result<GeneratedImage, TransportError>,
) -> (String, Option<GeneratedImage>) {
    match result {
        Ok(image) => (image.revised_prompt.clone(), Some(image)),
        Err(err) => (err.to_string(), None),
    }
}

/// Per-model adapter: turns a running conversation plus a new question
/// into a remote call against one configured deployment and exposes the
/// reply incrementally.
pub struct ModelClient {
    http: reqwest::Client,
    config: ModelConfig,
    rewrite_rules: Vec<RewriteRule>,
}

impl ModelClient {
    pub fn new(http: reqwest::Client, config: ModelConfig) -> Self {
        Self {
            http,
            config,
            rewrite_rules: builtin_rewrite_rules(),
        }
    }

    pub fn with_rewrite_rules(mut self, rules: Vec<RewriteRule>) -> Self {
        self.rewrite_rules = rules;
        self
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn kind(&self) -> ModelKind {
        self.config.kind()
    }

    /// Builds the outgoing user turn. Attachments combine with the
    /// question into one multi-part message (images first, text last);
    /// text-only questions pass through the first matching rewrite rule.
    pub fn build_user_turn(
        &self,
        system_text: &str,
        question: &str,
        attachments: &[ImageAttachment],
    ) -> Message {
        if attachments.is_empty() {
            let text = self
                .rewrite_rules
                .iter()
                .find(|rule| rule.applies_to(system_text))
                .map(|rule| rule.rewrite(question))
                .unwrap_or_else(|| question.to_string());
            return Message::user(text);
        }

        let mut parts: Vec<ContentPart> = attachments
            .iter()
            .map(|attachment| ContentPart::ImageUrl {
                image_url: attachment.to_data_uri(),
            })
            .collect();
        parts.push(ContentPart::Text {
            text: question.to_string(),
        });
        Message::user_parts(parts)
    }

    /// One streamed chat-completions call. Chunks are forwarded to `tx`
    /// in arrival order; the returned outcome carries the accumulated
    /// reply (or the diagnostic) for the committing caller.
    pub async fn converse(
        &self,
        messages: Vec<ChatMessage>,
        max_tokens: u32,
        user: &str,
        cancel: CancellationToken,
        tx: &mpsc::UnboundedSender<StreamMessage>,
    ) -> StreamOutcome {
        let request = ChatRequest {
            model: self.config.deployment.clone(),
            messages,
            max_tokens,
            stream: true,
            user: Some(user.to_string()),
        };
        let params = StreamParams {
            client: self.http.clone(),
            url: deployment_url(
                &self.config.endpoint,
                &self.config.deployment,
                "chat/completions",
                &self.config.api_version,
            ),
            api_key: self.config.key.clone(),
            cancel,
        };
        tracing::debug!(model = %self.config.model_name, "dispatching chat stream");
        run_chat_stream(&params, &request, tx).await
    }

    /// One non-streamed vision call with OCR and grounding enabled,
    /// surfaced as a single-chunk sequence for interface uniformity.
    pub async fn converse_vision(
        &self,
        messages: Vec<ChatMessage>,
        max_tokens: u32,
        user: &str,
        tx: &mpsc::UnboundedSender<StreamMessage>,
    ) -> StreamOutcome {
        tracing::debug!(model = %self.config.model_name, "dispatching vision request");
        emit_single_shot(self.vision_request(messages, max_tokens, user).await, tx)
    }

    async fn vision_request(
        &self,
        messages: Vec<ChatMessage>,
        max_tokens: u32,
        user: &str,
    ) -> Result<String, TransportError> {
        let request = VisionRequest {
            model: self.config.deployment.clone(),
            messages,
            max_tokens,
            enhancements: VisionEnhancements::ocr_and_grounding(),
            data_sources: vec![VisionDataSource {
                kind: "AzureComputerVision".to_string(),
                parameters: VisionDataSourceParameters {
                    endpoint: self.config.cv_endpoint.clone().unwrap_or_default(),
                    key: self.config.cv_key.clone().unwrap_or_default(),
                },
            }],
            user: Some(user.to_string()),
        };
        let url = deployment_url(
            &self.config.endpoint,
            &self.config.deployment,
            "extensions/chat/completions",
            &self.config.api_version,
        );

        let response = self
            .http
            .post(url)
            .header("api-key", &self.config.key)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(TransportError::Network)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Err(TransportError::Http { status, body });
        }

        let completion: ChatCompletionResponse =
            response.json().await.map_err(TransportError::Network)?;
        completion
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| TransportError::Malformed("missing message content".to_string()))
    }

    /// One image-generation call, then one fetch of the produced image.
    /// No retry on either; failures stay typed until presentation.
    pub async fn generate_image(
        &self,
        prompt: &ImagePrompt,
        user: &str,
    ) -> Result<GeneratedImage, TransportError> {
        let request = ImageRequest {
            prompt: prompt.prompt.clone(),
            size: prompt.size.clone(),
            style: prompt.style.clone(),
            quality: prompt.quality.clone(),
            n: 1,
            user: Some(user.to_string()),
        };
        let url = deployment_url(
            &self.config.endpoint,
            &self.config.deployment,
            "images/generations",
            &self.config.api_version,
        );
        tracing::debug!(model = %self.config.model_name, "dispatching image generation");

        let response = self
            .http
            .post(url)
            .header("api-key", &self.config.key)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(TransportError::Network)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Err(TransportError::Http { status, body });
        }

        let decoded: ImageResponse = response.json().await.map_err(TransportError::Network)?;
        let first = decoded
            .data
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::Malformed("empty image data".to_string()))?;

        let image_response = self
            .http
            .get(&first.url)
            .send()
            .await
            .map_err(TransportError::Network)?;
        if !image_response.status().is_success() {
            let status = image_response.status();
            return Err(TransportError::Http {
                status,
                body: "image fetch failed".to_string(),
            });
        }
        let bytes = image_response
            .bytes()
            .await
            .map_err(TransportError::Network)?;

        Ok(GeneratedImage {
            revised_prompt: first.revised_prompt.unwrap_or_default(),
            bytes: bytes.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ChatContent;

    fn test_client() -> ModelClient {
        let config = ModelConfig {
            model_name: "GPT-3.5 Turbo".to_string(),
            deployment: "gpt-35-turbo".to_string(),
            endpoint: "https://res.openai.azure.com".to_string(),
            key: "k".to_string(),
            api_version: "2024-02-01".to_string(),
            model_info: String::new(),
            deployment_info: String::new(),
            cv_endpoint: None,
            cv_key: None,
        };
        ModelClient::new(reqwest::Client::new(), config)
    }

    #[test]
    fn translate_system_message_wraps_the_question() {
        let client = test_client();
        let turn = client.build_user_turn("你是翻譯專家。", "hello", &[]);
        assert_eq!(
            turn.content,
            ChatContent::Text("翻譯下列內容:\n\n#####hello#####".to_string())
        );
    }

    #[test]
    fn plain_system_message_passes_the_question_verbatim() {
        let client = test_client();
        let turn = client.build_user_turn("be helpful", "hello", &[]);
        assert_eq!(turn.content, ChatContent::Text("hello".to_string()));
    }

    #[test]
    fn attachments_build_a_parts_message_images_first() {
        let client = test_client();
        let attachment = ImageAttachment::new(b"ABC".to_vec());
        let turn = client.build_user_turn("be helpful", "what is this?", &[attachment]);

        match turn.content {
            ChatContent::Parts(parts) => {
                assert_eq!(parts.len(), 2);
                assert_eq!(
                    parts[0],
                    ContentPart::ImageUrl {
                        image_url: "data:image/jpeg;base64,QUJD".to_string()
                    }
                );
                assert_eq!(
                    parts[1],
                    ContentPart::Text {
                        text: "what is this?".to_string()
                    }
                );
            }
            other => panic!("expected parts content, got {other:?}"),
        }
    }

    #[test]
    fn rewrite_rules_do_not_apply_to_attachment_turns() {
        let client = test_client();
        let attachment = ImageAttachment::new(b"ABC".to_vec());
        let turn = client.build_user_turn("請幫我翻譯", "hello", &[attachment]);
        match turn.content {
            ChatContent::Parts(parts) => {
                assert_eq!(
                    parts[1],
                    ContentPart::Text {
                        text: "hello".to_string()
                    }
                );
            }
            other => panic!("expected parts content, got {other:?}"),
        }
    }

    #[test]
    fn failed_generation_presents_error_text_and_no_image() {
        let err = TransportError::Http {
            status: reqwest::StatusCode::BAD_REQUEST,
            body: "content policy".to_string(),
        };
        let expected = err.to_string();
        let (revised_prompt, image) = present_image_result(Err(err));
        assert_eq!(revised_prompt, expected);
        assert!(image.is_none());
    }

    #[test]
    fn successful_generation_presents_the_revised_prompt() {
        let image = GeneratedImage {
            revised_prompt: "a watercolor fox".to_string(),
            bytes: vec![1, 2, 3],
        };
        let (revised_prompt, image) = present_image_result(Ok(image));
        assert_eq!(revised_prompt, "a watercolor fox");
        assert_eq!(image.expect("image").bytes, vec![1, 2, 3]);
    }
}
