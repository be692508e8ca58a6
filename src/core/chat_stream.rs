use futures_util::StreamExt;
use memchr::memchr;
use std::error::Error as StdError;
use std::fmt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::api::{ChatRequest, ChatStreamResponse};

/// A remote-call failure. Raised internally as a typed error; only the
/// presentation layer renders it as inline transcript text.
#[derive(Debug)]
pub enum TransportError {
    Network(reqwest::Error),
    Http {
        status: reqwest::StatusCode,
        body: String,
    },
    Malformed(String),
}

impl TransportError {
    /// Diagnostic text in the fenced form the transcript renders inline.
    pub fn diagnostic(&self) -> String {
        match self {
            TransportError::Network(err) => format_api_error(&err.to_string()),
            TransportError::Http { body, .. } => format_api_error(body),
            TransportError::Malformed(detail) => format_api_error(detail),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Network(err) => write!(f, "request failed: {err}"),
            TransportError::Http { status, body } => {
                write!(f, "request failed with status {status}: {body}")
            }
            TransportError::Malformed(detail) => {
                write!(f, "unexpected response payload: {detail}")
            }
        }
    }
}

impl StdError for TransportError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            TransportError::Network(err) => Some(err),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub enum StreamMessage {
    Chunk(String),
    Error(String),
    End,
}

/// What a driven stream amounted to, for the caller that commits the
/// exchange. Consumers of the snapshot sequence never see this; they see
/// the [`StreamMessage`]s forwarded while the stream ran.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamOutcome {
    Completed(String),
    Failed(String),
    Cancelled,
}

enum SsePayload {
    Chunk(String),
    Done,
    Error(String),
    Ignore,
}

fn extract_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

fn parse_data_payload(payload: &str) -> SsePayload {
    if payload == "[DONE]" {
        return SsePayload::Done;
    }

    match serde_json::from_str::<ChatStreamResponse>(payload) {
        Ok(response) => match response.choices.first() {
            Some(choice) => match &choice.delta.content {
                Some(content) if !content.is_empty() => SsePayload::Chunk(content.clone()),
                _ => SsePayload::Ignore,
            },
            None => SsePayload::Ignore,
        },
        Err(_) => {
            if payload.trim().is_empty() {
                return SsePayload::Ignore;
            }
            SsePayload::Error(format_api_error(payload))
        }
    }
}

fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value.get("error").and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.to_string()),
                serde_json::Value::Object(map) => map
                    .get("message")
                    .and_then(|message| message.as_str().map(str::to_owned)),
                _ => None,
            })
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        });

    summary.map(|text| {
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        collapsed.trim().to_string()
    })
}

pub fn format_api_error(error_text: &str) -> String {
    let trimmed = error_text.trim();

    if trimmed.is_empty() {
        return "API Error:\n```\n<empty>\n```".to_string();
    }

    if let Ok(json_value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Ok(pretty_json) = serde_json::to_string_pretty(&json_value) {
            if let Some(summary) = extract_error_summary(&json_value) {
                if !summary.is_empty() {
                    return format!("API Error: {}\n```json\n{}\n```", summary, pretty_json);
                }
            }
            return format!("API Error:\n```json\n{}\n```", pretty_json);
        }
    }

    if trimmed.starts_with('<') && trimmed.ends_with('>') {
        format!("API Error:\n```xml\n{}\n```", trimmed)
    } else {
        format!("API Error:\n```\n{}\n```", trimmed)
    }
}

pub struct StreamParams {
    pub client: reqwest::Client,
    pub url: String,
    pub api_key: String,
    pub cancel: CancellationToken,
}

fn fail(tx: &mpsc::UnboundedSender<StreamMessage>, diagnostic: String) -> StreamOutcome {
    let _ = tx.send(StreamMessage::Error(diagnostic.clone()));
    let _ = tx.send(StreamMessage::End);
    StreamOutcome::Failed(diagnostic)
}

/// Drives one streamed chat-completions call, forwarding chunks to `tx`
/// in arrival order. Transport failures become a terminal `Error` message
/// rather than a returned fault, so the consumer's sequence always ends
/// cleanly. Cancellation stops the stream without sending anything more.
pub async fn run_chat_stream(
    params: &StreamParams,
    request: &ChatRequest,
    tx: &mpsc::UnboundedSender<StreamMessage>,
) -> StreamOutcome {
    let work = async {
        let response = match params
            .client
            .post(&params.url)
            .header("api-key", &params.api_key)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => return fail(tx, format_api_error(&err.to_string())),
        };

        if !response.status().is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return fail(tx, format_api_error(&body));
        }

        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        let mut accumulated = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk_bytes = match chunk {
                Ok(bytes) => bytes,
                Err(err) => return fail(tx, format_api_error(&err.to_string())),
            };
            buffer.extend_from_slice(&chunk_bytes);

            while let Some(newline_pos) = memchr(b'\n', &buffer) {
                let line = match std::str::from_utf8(&buffer[..newline_pos]) {
                    Ok(s) => s.trim().to_string(),
                    Err(err) => {
                        tracing::debug!("invalid UTF-8 in stream: {err}");
                        buffer.drain(..=newline_pos);
                        continue;
                    }
                };
                buffer.drain(..=newline_pos);

                let Some(payload) = extract_data_payload(&line) else {
                    continue;
                };
                match parse_data_payload(payload) {
                    SsePayload::Chunk(content) => {
                        accumulated.push_str(&content);
                        let _ = tx.send(StreamMessage::Chunk(content));
                    }
                    SsePayload::Done => {
                        let _ = tx.send(StreamMessage::End);
                        return StreamOutcome::Completed(accumulated);
                    }
                    SsePayload::Error(diagnostic) => return fail(tx, diagnostic),
                    SsePayload::Ignore => {}
                }
            }
        }

        let _ = tx.send(StreamMessage::End);
        StreamOutcome::Completed(accumulated)
    };

    tokio::select! {
        outcome = work => outcome,
        _ = params.cancel.cancelled() => StreamOutcome::Cancelled,
    }
}

/// Surfaces a non-streamed call as a degenerate single-chunk sequence, so
/// every model kind exposes the same incremental interface.
pub fn emit_single_shot(
    result: Result<String, TransportError>,
    tx: &mpsc::UnboundedSender<StreamMessage>,
) -> StreamOutcome {
    match result {
        Ok(text) => {
            if !text.is_empty() {
                let _ = tx.send(StreamMessage::Chunk(text.clone()));
            }
            let _ = tx.send(StreamMessage::End);
            StreamOutcome::Completed(text)
        }
        Err(err) => fail(tx, err.diagnostic()),
    }
}

/// Folds a [`StreamMessage`] sequence into the snapshot sequence the
/// presentation layer renders: each yielded value is the full accumulated
/// answer so far. Error messages degrade into inline diagnostic text,
/// so a consumer always receives a non-empty, well-formed sequence even
/// when the remote call failed before producing any output.
pub struct Snapshots {
    rx: mpsc::UnboundedReceiver<StreamMessage>,
    accumulated: String,
    finished: bool,
}

impl Snapshots {
    pub fn new(rx: mpsc::UnboundedReceiver<StreamMessage>) -> Self {
        Self {
            rx,
            accumulated: String::new(),
            finished: false,
        }
    }

    pub async fn next(&mut self) -> Option<String> {
        if self.finished {
            return None;
        }
        loop {
            match self.rx.recv().await {
                None | Some(StreamMessage::End) => {
                    self.finished = true;
                    return None;
                }
                Some(StreamMessage::Chunk(content)) => {
                    if content.is_empty() {
                        continue;
                    }
                    self.accumulated.push_str(&content);
                    return Some(self.accumulated.clone());
                }
                Some(StreamMessage::Error(diagnostic)) => {
                    self.accumulated.push_str(&diagnostic);
                    self.finished = true;
                    return Some(self.accumulated.clone());
                }
            }
        }
    }

    pub fn text(&self) -> &str {
        &self.accumulated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_data_payload_handles_spacing_variants() {
        for (line, expected) in [
            (r#"data: {"choices":[{"delta":{"content":"Hello"}}]}"#, "Hello"),
            (r#"data:{"choices":[{"delta":{"content":"World"}}]}"#, "World"),
        ] {
            let payload = extract_data_payload(line).expect("data line");
            match parse_data_payload(payload) {
                SsePayload::Chunk(content) => assert_eq!(content, expected),
                _ => panic!("expected chunk for {line}"),
            }
        }

        assert!(matches!(
            parse_data_payload(extract_data_payload("data: [DONE]").unwrap()),
            SsePayload::Done
        ));
        assert!(matches!(
            parse_data_payload(extract_data_payload("data:[DONE]").unwrap()),
            SsePayload::Done
        ));
    }

    #[test]
    fn parse_data_payload_routes_stream_errors() {
        let payload = r#"{"error":{"message":"internal server error"}}"#;
        match parse_data_payload(payload) {
            SsePayload::Error(text) => {
                assert!(text.starts_with("API Error: internal server error"));
            }
            _ => panic!("expected error payload"),
        }
    }

    #[test]
    fn format_api_error_prettifies_json_with_summary() {
        let raw = r#"{"error":{"message":"model overloaded","type":"invalid_request_error"}}"#;
        let formatted = format_api_error(raw);

        let expected = r#"API Error: model overloaded
```json
{
  "error": {
    "message": "model overloaded",
    "type": "invalid_request_error"
  }
}
```"#;
        assert_eq!(formatted, expected);
    }

    #[test]
    fn format_api_error_handles_xml_and_plaintext() {
        assert_eq!(
            format_api_error("<error>bad</error>"),
            "API Error:\n```xml\n<error>bad</error>\n```"
        );
        assert_eq!(
            format_api_error("api failure"),
            "API Error:\n```\napi failure\n```"
        );
    }

    #[tokio::test]
    async fn snapshots_accumulate_chunks() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(StreamMessage::Chunk("Hel".to_string())).unwrap();
        tx.send(StreamMessage::Chunk("lo".to_string())).unwrap();
        tx.send(StreamMessage::End).unwrap();

        let mut snapshots = Snapshots::new(rx);
        assert_eq!(snapshots.next().await.as_deref(), Some("Hel"));
        assert_eq!(snapshots.next().await.as_deref(), Some("Hello"));
        assert_eq!(snapshots.next().await, None);
        assert_eq!(snapshots.next().await, None);
    }

    #[tokio::test]
    async fn snapshots_degrade_errors_to_inline_text() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(StreamMessage::Chunk("partial ".to_string())).unwrap();
        tx.send(StreamMessage::Error("API Error: boom".to_string()))
            .unwrap();
        tx.send(StreamMessage::End).unwrap();

        let mut snapshots = Snapshots::new(rx);
        assert_eq!(snapshots.next().await.as_deref(), Some("partial "));
        assert_eq!(
            snapshots.next().await.as_deref(),
            Some("partial API Error: boom")
        );
        assert_eq!(snapshots.next().await, None);
    }

    #[tokio::test]
    async fn a_failed_stream_still_yields_a_non_empty_sequence() {
        let (tx, rx) = mpsc::unbounded_channel();
        let outcome = fail(&tx, "API Error: unreachable".to_string());
        assert_eq!(
            outcome,
            StreamOutcome::Failed("API Error: unreachable".to_string())
        );

        let mut snapshots = Snapshots::new(rx);
        let only = snapshots.next().await.expect("diagnostic snapshot");
        assert!(!only.is_empty());
        assert_eq!(only, "API Error: unreachable");
        assert_eq!(snapshots.next().await, None);
    }

    #[tokio::test]
    async fn single_shot_success_is_one_chunk_then_end() {
        let (tx, rx) = mpsc::unbounded_channel();
        let outcome = emit_single_shot(Ok("whole answer".to_string()), &tx);
        assert_eq!(outcome, StreamOutcome::Completed("whole answer".to_string()));

        let mut snapshots = Snapshots::new(rx);
        assert_eq!(snapshots.next().await.as_deref(), Some("whole answer"));
        assert_eq!(snapshots.next().await, None);
    }
}
