//! Wire payloads for the assistants surface: assistant/thread/file objects
//! and the per-event bodies of a streamed run.

use serde::{Deserialize, Serialize};

#[derive(Serialize)]
pub struct CreateAssistantRequest {
    pub name: String,
    pub model: String,
    pub tools: Vec<ToolSpec>,
}

#[derive(Serialize)]
pub struct ToolSpec {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Deserialize)]
pub struct AssistantObject {
    pub id: String,
}

#[derive(Deserialize)]
pub struct ThreadObject {
    pub id: String,
}

#[derive(Deserialize)]
pub struct FileObject {
    pub id: String,
    #[serde(default)]
    pub filename: String,
}

#[derive(Serialize)]
pub struct CreateMessageRequest {
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub file_ids: Vec<String>,
}

#[derive(Serialize)]
pub struct CreateRunRequest {
    pub assistant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    pub stream: bool,
}

/// One raw server-sent event from a streamed run: the `event:` name plus
/// the decoded `data:` payload. The router deserializes `data` into the
/// body type the event name calls for.
#[derive(Debug, Clone)]
pub struct RunEvent {
    pub name: String,
    pub data: serde_json::Value,
}

#[derive(Deserialize)]
pub struct RunStep {
    pub step_details: Option<StepDetails>,
}

#[derive(Deserialize)]
pub struct RunStepDelta {
    pub delta: RunStepDeltaBody,
}

#[derive(Deserialize)]
pub struct RunStepDeltaBody {
    pub step_details: Option<StepDetails>,
}

#[derive(Deserialize)]
pub struct StepDetails {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallDetails>,
}

#[derive(Deserialize)]
pub struct ToolCallDetails {
    #[serde(rename = "type")]
    pub kind: String,
    pub code_interpreter: Option<CodeInterpreterDetails>,
}

#[derive(Deserialize)]
pub struct CodeInterpreterDetails {
    pub input: Option<String>,
    #[serde(default)]
    pub outputs: Vec<CodeInterpreterOutput>,
}

#[derive(Deserialize)]
pub struct CodeInterpreterOutput {
    #[serde(rename = "type")]
    pub kind: String,
    pub image: Option<ImageFileRef>,
}

#[derive(Deserialize)]
pub struct ImageFileRef {
    pub file_id: String,
}

#[derive(Deserialize)]
pub struct MessageDelta {
    pub delta: MessageDeltaBody,
}

#[derive(Deserialize)]
pub struct MessageDeltaBody {
    #[serde(default)]
    pub content: Vec<MessageContentDelta>,
}

#[derive(Deserialize)]
pub struct MessageContentDelta {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: Option<TextDeltaBody>,
    pub image_file: Option<ImageFileRef>,
}

#[derive(Deserialize)]
pub struct TextDeltaBody {
    pub value: Option<String>,
    #[serde(default)]
    pub annotations: Vec<TextAnnotation>,
}

#[derive(Deserialize)]
pub struct TextAnnotation {
    #[serde(rename = "type")]
    pub kind: String,
    pub file_path: Option<FilePathRef>,
}

#[derive(Deserialize)]
pub struct FilePathRef {
    pub file_id: String,
}
