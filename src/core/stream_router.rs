//! Normalizes the heterogeneous event stream of an assistant run into the
//! ordered [`StreamEvent`] sequence the presentation layer consumes.
//!
//! The router is a pure mapping over arrival order: no buffering, no
//! coalescing, no reordering. The UI renders text deltas by concatenation,
//! so dropping or duplicating one corrupts the visible transcript.

use crate::api::assistant::{MessageDelta, RunEvent, RunStep, RunStepDelta};

/// Transcript text the code-block markers render as.
pub const CODE_BLOCK_OPENER: &str = "Generating code to interpret:\n\n```py";
pub const SECTION_BREAK: &str = "\nResponse:\n";
pub const CODE_BLOCK_CLOSER: &str = "\n```\nExecuting code...";

/// One normalized unit of assistant-run output.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Incremental answer or code-interpreter input text.
    TextDelta(String),
    /// A tool-call run step opened; rendered as a code-block opener.
    ToolCallStarted,
    /// The run produced a message; rendered as a section break.
    SectionBreak,
    /// A code-interpreter run step finished; rendered as a code-block
    /// closer plus an "executing" notice.
    ToolCallFinished,
    /// The run produced a downloadable file. Carries no text; the session
    /// layer fetches and persists the file.
    ToolCallOutputReady { file_id: String, kind: String },
    /// Terminal: a fault ended the run.
    Error(String),
}

impl StreamEvent {
    /// How the marker variants render in the transcript. Text deltas
    /// render as themselves; file-ready and error events have no fixed
    /// text.
    pub fn transcript_text(&self) -> Option<&str> {
        match self {
            StreamEvent::TextDelta(text) => Some(text),
            StreamEvent::ToolCallStarted => Some(CODE_BLOCK_OPENER),
            StreamEvent::SectionBreak => Some(SECTION_BREAK),
            StreamEvent::ToolCallFinished => Some(CODE_BLOCK_CLOSER),
            StreamEvent::ToolCallOutputReady { .. } | StreamEvent::Error(_) => None,
        }
    }
}

/// Maps one raw run event to its normalized events, in payload order.
/// Unknown event names and payload shapes map to nothing.
pub fn route_event(event: &RunEvent) -> Vec<StreamEvent> {
    match event.name.as_str() {
        "thread.run.step.created" => {
            let Ok(step) = serde_json::from_value::<RunStep>(event.data.clone()) else {
                return Vec::new();
            };
            match step.step_details {
                Some(details) if details.kind == "tool_calls" => {
                    vec![StreamEvent::ToolCallStarted]
                }
                _ => Vec::new(),
            }
        }
        "thread.message.created" => vec![StreamEvent::SectionBreak],
        "thread.message.delta" => {
            let Ok(delta) = serde_json::from_value::<MessageDelta>(event.data.clone()) else {
                return Vec::new();
            };
            let mut events = Vec::new();
            for item in &delta.delta.content {
                match item.kind.as_str() {
                    "text" => {
                        let Some(text) = &item.text else { continue };
                        if let Some(value) = text.value.as_ref().filter(|v| !v.is_empty()) {
                            events.push(StreamEvent::TextDelta(value.clone()));
                        } else if let Some(annotation) = text.annotations.first() {
                            if let Some(file_path) = &annotation.file_path {
                                events.push(StreamEvent::ToolCallOutputReady {
                                    file_id: file_path.file_id.clone(),
                                    kind: annotation.kind.clone(),
                                });
                            }
                        }
                    }
                    "image_file" => {
                        if let Some(image_file) = &item.image_file {
                            events.push(StreamEvent::ToolCallOutputReady {
                                file_id: image_file.file_id.clone(),
                                kind: "image".to_string(),
                            });
                        }
                    }
                    _ => {}
                }
            }
            events
        }
        "thread.run.step.completed" => {
            let Ok(step) = serde_json::from_value::<RunStep>(event.data.clone()) else {
                return Vec::new();
            };
            let mut events = Vec::new();
            if let Some(details) = step.step_details {
                if details.kind == "tool_calls" {
                    for tool in &details.tool_calls {
                        if tool.kind == "code_interpreter" {
                            events.push(StreamEvent::ToolCallFinished);
                        }
                    }
                }
            }
            events
        }
        "thread.run.step.delta" => {
            let Ok(step_delta) = serde_json::from_value::<RunStepDelta>(event.data.clone()) else {
                return Vec::new();
            };
            let mut events = Vec::new();
            if let Some(details) = step_delta.delta.step_details {
                if details.kind == "tool_calls" {
                    for tool in &details.tool_calls {
                        if tool.kind != "code_interpreter" {
                            continue;
                        }
                        let Some(interpreter) = &tool.code_interpreter else {
                            continue;
                        };
                        if let Some(input) =
                            interpreter.input.as_ref().filter(|input| !input.is_empty())
                        {
                            events.push(StreamEvent::TextDelta(input.clone()));
                        } else if let Some(output) = interpreter.outputs.first() {
                            if output.kind == "image" {
                                if let Some(image) = &output.image {
                                    events.push(StreamEvent::ToolCallOutputReady {
                                        file_id: image.file_id.clone(),
                                        kind: "image".to_string(),
                                    });
                                }
                            }
                        }
                    }
                }
            }
            events
        }
        _ => Vec::new(),
    }
}
