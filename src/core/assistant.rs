//! Client for the stateful assistant (code-interpreter) mode: assistant
//! and thread lifecycle, file upload, streamed runs, and output-file
//! retrieval. Unlike the stateless chat calls, resetting this mode means
//! discarding remote resources, not just local memory.

use futures_util::StreamExt;
use memchr::memchr;
use std::path::Path;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::api::assistant::{
    AssistantObject, CreateAssistantRequest, CreateMessageRequest, CreateRunRequest, FileObject,
    RunEvent, ThreadObject, ToolSpec,
};
use crate::core::chat_stream::{format_api_error, TransportError};
use crate::core::config::ModelConfig;
use crate::core::stream_router::{route_event, StreamEvent};
use crate::utils::url::service_url;

const ASSISTANT_NAME: &str = "code interpreter";

/// Local file name for a run output: `<file_id>.png` for images, the
/// remote file's original extension otherwise.
pub fn output_file_name(file_id: &str, kind: &str, original_filename: Option<&str>) -> String {
    if kind == "image" {
        return format!("{file_id}.png");
    }
    let extension = original_filename
        .and_then(|name| Path::new(name).extension())
        .map(|ext| ext.to_string_lossy().into_owned())
        .unwrap_or_else(|| "bin".to_string());
    format!("{file_id}.{extension}")
}

pub struct AssistantClient {
    http: reqwest::Client,
    config: ModelConfig,
    assistant_id: String,
    thread_id: String,
}

impl AssistantClient {
    /// Creates the remote assistant (code-interpreter tool enabled) and a
    /// fresh thread against the given backing deployment.
    pub async fn create(
        http: reqwest::Client,
        config: ModelConfig,
    ) -> Result<Self, TransportError> {
        let (assistant_id, thread_id) = create_remote_pair(&http, &config).await?;
        Ok(Self {
            http,
            config,
            assistant_id,
            thread_id,
        })
    }

    pub fn backing_model(&self) -> &str {
        &self.config.model_name
    }

    /// Uploads one file for the assistant to work on; returns its id.
    pub async fn upload_file(
        &self,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<String, TransportError> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new()
            .text("purpose", "assistants")
            .part("file", part);

        let url = service_url(&self.config.endpoint, "files", &self.config.api_version);
        let response = self
            .http
            .post(url)
            .header("api-key", &self.config.key)
            .multipart(form)
            .send()
            .await
            .map_err(TransportError::Network)?;
        let file: FileObject = decode_response(response).await?;
        Ok(file.id)
    }

    pub async fn file_info(&self, file_id: &str) -> Result<FileObject, TransportError> {
        let url = service_url(
            &self.config.endpoint,
            &format!("files/{file_id}"),
            &self.config.api_version,
        );
        let response = self
            .http
            .get(url)
            .header("api-key", &self.config.key)
            .send()
            .await
            .map_err(TransportError::Network)?;
        decode_response(response).await
    }

    pub async fn fetch_file(&self, file_id: &str) -> Result<Vec<u8>, TransportError> {
        let url = service_url(
            &self.config.endpoint,
            &format!("files/{file_id}/content"),
            &self.config.api_version,
        );
        let response = self
            .http
            .get(url)
            .header("api-key", &self.config.key)
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
        let bytes = response.bytes().await.map_err(TransportError::Network)?;
        Ok(bytes.to_vec())
    }

    /// Creates a user message on the thread and streams one run, routing
    /// every raw event through the stream router in arrival order. A
    /// fault yields a single terminal `Error` event; the sequence ends by
    /// returning.
    pub async fn run_stream(
        &self,
        prompt: &str,
        file_ids: Vec<String>,
        instructions: &str,
        cancel: CancellationToken,
        tx: &mpsc::UnboundedSender<StreamEvent>,
    ) {
        let work = async {
            if let Err(err) = self.create_thread_message(prompt, file_ids).await {
                let _ = tx.send(StreamEvent::Error(err.diagnostic()));
                return;
            }

            let run_request = CreateRunRequest {
                assistant_id: self.assistant_id.clone(),
                instructions: if instructions.is_empty() {
                    None
                } else {
                    Some(instructions.to_string())
                },
                stream: true,
            };
            let url = service_url(
                &self.config.endpoint,
                &format!("threads/{}/runs", self.thread_id),
                &self.config.api_version,
            );
            tracing::debug!(thread = %self.thread_id, "starting assistant run");

            let response = match self
                .http
                .post(url)
                .header("api-key", &self.config.key)
                .header("Content-Type", "application/json")
                .json(&run_request)
                .send()
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    let _ = tx.send(StreamEvent::Error(format_api_error(&err.to_string())));
                    return;
                }
            };
            if !response.status().is_success() {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "<no body>".to_string());
                let _ = tx.send(StreamEvent::Error(format_api_error(&body)));
                return;
            }

            let mut stream = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();
            let mut current_event = String::new();

            while let Some(chunk) = stream.next().await {
                let chunk_bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        let _ = tx.send(StreamEvent::Error(format_api_error(&err.to_string())));
                        return;
                    }
                };
                buffer.extend_from_slice(&chunk_bytes);

                while let Some(newline_pos) = memchr(b'\n', &buffer) {
                    let line = match std::str::from_utf8(&buffer[..newline_pos]) {
                        Ok(s) => s.trim().to_string(),
                        Err(err) => {
                            tracing::debug!("invalid UTF-8 in run stream: {err}");
                            buffer.drain(..=newline_pos);
                            continue;
                        }
                    };
                    buffer.drain(..=newline_pos);

                    if let Some(name) = line.strip_prefix("event:") {
                        current_event = name.trim().to_string();
                        continue;
                    }
                    let Some(payload) = line.strip_prefix("data:").map(str::trim_start) else {
                        continue;
                    };
                    if payload == "[DONE]" {
                        return;
                    }
                    if current_event == "thread.run.failed" {
                        let _ = tx.send(StreamEvent::Error(format_api_error(payload)));
                        return;
                    }
                    let data = match serde_json::from_str::<serde_json::Value>(payload) {
                        Ok(data) => data,
                        Err(_) => continue,
                    };
                    let event = RunEvent {
                        name: current_event.clone(),
                        data,
                    };
                    for routed in route_event(&event) {
                        let _ = tx.send(routed);
                    }
                }
            }
        };

        tokio::select! {
            _ = work => {}
            _ = cancel.cancelled() => {}
        }
    }

    async fn create_thread_message(
        &self,
        prompt: &str,
        file_ids: Vec<String>,
    ) -> Result<(), TransportError> {
        let request = CreateMessageRequest {
            role: "user".to_string(),
            content: prompt.to_string(),
            file_ids,
        };
        let url = service_url(
            &self.config.endpoint,
            &format!("threads/{}/messages", self.thread_id),
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
        Ok(())
    }
}

async fn create_remote_pair(
    http: &reqwest::Client,
    config: &ModelConfig,
) -> Result<(String, String), TransportError> {
    let assistant_request = CreateAssistantRequest {
        name: ASSISTANT_NAME.to_string(),
        model: config.deployment.clone(),
        tools: vec![ToolSpec {
            kind: "code_interpreter".to_string(),
        }],
    };
    let assistants_url = service_url(&config.endpoint, "assistants", &config.api_version);
    let response = http
        .post(assistants_url)
        .header("api-key", &config.key)
        .header("Content-Type", "application/json")
        .json(&assistant_request)
        .send()
        .await
        .map_err(TransportError::Network)?;
    let assistant: AssistantObject = decode_response(response).await?;

    let threads_url = service_url(&config.endpoint, "threads", &config.api_version);
    let response = http
        .post(threads_url)
        .header("api-key", &config.key)
        .header("Content-Type", "application/json")
        .json(&serde_json::json!({}))
        .send()
        .await
        .map_err(TransportError::Network)?;
    let thread: ThreadObject = decode_response(response).await?;

    tracing::debug!(assistant = %assistant.id, thread = %thread.id, "created assistant resources");
    Ok((assistant.id, thread.id))
}

async fn decode_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, TransportError> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<no body>".to_string());
        return Err(TransportError::Http { status, body });
    }
    response.json().await.map_err(TransportError::Network)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_outputs_are_named_with_a_png_extension() {
        assert_eq!(output_file_name("file-abc", "image", None), "file-abc.png");
        // The remote filename is ignored for images.
        assert_eq!(
            output_file_name("file-abc", "image", Some("plot.svg")),
            "file-abc.png"
        );
    }

    #[test]
    fn other_outputs_keep_the_original_extension() {
        assert_eq!(
            output_file_name("file-xyz", "file_path", Some("/mnt/data/report.csv")),
            "file-xyz.csv"
        );
        assert_eq!(
            output_file_name("file-xyz", "file_path", Some("noext")),
            "file-xyz.bin"
        );
        assert_eq!(output_file_name("file-xyz", "file_path", None), "file-xyz.bin");
    }
}
