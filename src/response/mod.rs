//! User-facing answer: templated text and the chunked stream that delivers it.

mod render;

use std::pin::Pin;

use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

pub use render::{DIRECT_RESPONSE_TOOL, EMPTY_DIRECT_RESPONSE, ResponseRenderer};

/// Generic failure text shown when a turn aborts.
pub const TURN_FAILURE_MESSAGE: &str = "죄송합니다. 처리 중 오류가 발생했습니다.";

/// Terminal text of a stream whose turn or delivery was cancelled.
pub const TURN_CANCELLED_MESSAGE: &str = "요청이 취소되었습니다.";

/// The result a turn's chain settled on, before rendering.
#[derive(Debug, Clone, PartialEq)]
pub enum FinalPayload {
    /// Pre-composed answer, rendered verbatim.
    Direct(String),
    Tool { name: String, output: Value },
}

impl FinalPayload {
    /// Payload implied by the last stage's output when the chain ran to its end.
    pub fn from_stage_output(output: &Value) -> Self {
        if let Some(name) = output.get("tool_name").and_then(Value::as_str) {
            return FinalPayload::Tool {
                name: name.to_string(),
                output: output.get("tool_output").cloned().unwrap_or(Value::Null),
            };
        }
        if let Some(text) = output.get("direct_response").and_then(Value::as_str) {
            return FinalPayload::Direct(text.to_string());
        }
        FinalPayload::Tool {
            name: String::new(),
            output: output.clone(),
        }
    }

    /// Payload taken from a terminating rule's field.
    pub fn from_terminal(payload: Value) -> Self {
        match payload {
            Value::String(text) => FinalPayload::Direct(text),
            Value::Null => FinalPayload::Direct(String::new()),
            other => Self::from_stage_output(&other),
        }
    }

    pub fn tool_name(&self) -> &str {
        match self {
            FinalPayload::Direct(_) => DIRECT_RESPONSE_TOOL,
            FinalPayload::Tool { name, .. } => name,
        }
    }
}

/// One item of the response surface. Serialises as `{"type": ..., "content": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum ResponseEvent {
    #[serde(rename = "response")]
    Chunk(String),
    Complete,
    Error(String),
}

pub type ResponseStream = Pin<Box<dyn Stream<Item = ResponseEvent> + Send>>;

/// Splits on character boundaries into pieces of at most `chunk_chars` chars.
pub fn chunk_text(text: &str, chunk_chars: usize) -> Vec<String> {
    let chunk_chars = chunk_chars.max(1);
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(chunk_chars)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

/// Text chunks followed by `Complete`.
pub fn text_stream(text: &str, chunk_chars: usize) -> ResponseStream {
    let events: Vec<ResponseEvent> = chunk_text(text, chunk_chars)
        .into_iter()
        .map(ResponseEvent::Chunk)
        .chain(std::iter::once(ResponseEvent::Complete))
        .collect();
    Box::pin(stream::iter(events))
}

/// Like [`text_stream`], but once `cancel` fires the remaining chunks are
/// replaced by a single `Error(TURN_CANCELLED_MESSAGE)`.
pub fn cancellable_text_stream(
    text: &str,
    chunk_chars: usize,
    cancel: CancellationToken,
) -> ResponseStream {
    let chunks = chunk_text(text, chunk_chars).into_iter();
    let events = stream::unfold(Some(chunks), move |pending| {
        let cancel = cancel.clone();
        async move {
            let mut chunks = pending?;
            if cancel.is_cancelled() {
                return Some((ResponseEvent::Error(TURN_CANCELLED_MESSAGE.into()), None));
            }
            match chunks.next() {
                Some(chunk) => Some((ResponseEvent::Chunk(chunk), Some(chunks))),
                None => Some((ResponseEvent::Complete, None)),
            }
        }
    });
    Box::pin(events)
}

pub fn error_stream(message: impl Into<String>) -> ResponseStream {
    Box::pin(stream::iter([ResponseEvent::Error(message.into())]))
}

/// Drains a stream into the concatenated text, or the error message.
pub async fn collect_text(mut stream: ResponseStream) -> Result<String, String> {
    use futures_util::StreamExt;

    let mut text = String::new();
    while let Some(event) = stream.next().await {
        match event {
            ResponseEvent::Chunk(chunk) => text.push_str(&chunk),
            ResponseEvent::Complete => return Ok(text),
            ResponseEvent::Error(message) => return Err(message),
        }
    }
    Ok(text)
}
