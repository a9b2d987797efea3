//! Server-sent-event decoding for streamed chat completions.
//!
//! One worker task owns the response body and republishes each `data:` payload
//! as a typed increment over a bounded channel. The body is dropped on every
//! exit path: end of input, `[DONE]`, read error, cancellation, or the
//! consumer going away.

use crate::chat::{
    ChatCompletionResponse, ChatCompletionResponseChoice, ChatCompletionStreamResponse,
};
use crate::error::{LlmError, Result};
use crate::types::{ChatMessage, Role, UsageInfo, order_choices};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::collections::BTreeMap;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

pub const STREAM_CHANNEL_CAPACITY: usize = 32;

const DATA_PREFIX: &[u8] = b"data: ";
const DONE_SENTINEL: &[u8] = b"[DONE]";

/// Handle to an in-flight streamed completion.
///
/// Yields increments in the order the server sent them. Malformed chunks show
/// up as `Err(LlmError::StreamParse)` and the stream keeps going; a read error
/// is the last item. Dropping the handle stops the worker.
#[derive(Debug)]
pub struct ChatStream {
    rx: mpsc::Receiver<Result<ChatCompletionStreamResponse>>,
    cancel: CancellationToken,
}

impl ChatStream {
    pub async fn recv(&mut self) -> Option<Result<ChatCompletionStreamResponse>> {
        self.rx.recv().await
    }

    /// Stops the worker. Increments already queued are still delivered.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drains the stream into one response, failing on the first error increment.
    pub async fn into_response(mut self) -> Result<ChatCompletionResponse> {
        let mut acc = StreamAccumulator::default();
        while let Some(item) = self.recv().await {
            acc.push(item?);
        }
        Ok(acc.finish())
    }
}

impl Stream for ChatStream {
    type Item = Result<ChatCompletionStreamResponse>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for ChatStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Starts the decoder task over `byte_stream` and returns immediately.
pub fn spawn_decoder<S, E>(byte_stream: S) -> ChatStream
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
    let cancel = CancellationToken::new();
    let worker = decode_sse(Box::pin(byte_stream), tx, cancel.clone())
        .instrument(tracing::debug_span!("chat_stream_decoder"));
    tokio::spawn(worker);
    ChatStream { rx, cancel }
}

async fn decode_sse<S, E>(
    mut body: Pin<Box<S>>,
    tx: mpsc::Sender<Result<ChatCompletionStreamResponse>>,
    cancel: CancellationToken,
) where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send,
    E: std::fmt::Display,
{
    let mut framer = LineFramer::default();
    let mut emitted: u64 = 0;
    loop {
        while let Some(line) = framer.next_line() {
            if !handle_line(&line, &tx, &cancel, &mut emitted).await {
                return;
            }
        }

        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(emitted, "chat stream cancelled by consumer");
                return;
            }
            next = body.next() => next,
        };

        match next {
            Some(Ok(chunk)) => framer.push(&chunk),
            Some(Err(error)) => {
                tracing::warn!(%error, emitted, "chat stream read failed");
                deliver(
                    &tx,
                    &cancel,
                    Err(LlmError::Stream(format!(
                        "error reading stream response: {error}"
                    ))),
                )
                .await;
                return;
            }
            None => {
                if let Some(line) = framer.finish() {
                    handle_line(&line, &tx, &cancel, &mut emitted).await;
                }
                tracing::debug!(emitted, "chat stream ended");
                return;
            }
        }
    }
}

/// Returns `false` once the stream must stop.
async fn handle_line(
    line: &[u8],
    tx: &mpsc::Sender<Result<ChatCompletionStreamResponse>>,
    cancel: &CancellationToken,
    emitted: &mut u64,
) -> bool {
    let item = match classify_line(line) {
        SseLine::Skip => return true,
        SseLine::Done => {
            tracing::debug!(emitted = *emitted, "chat stream received [DONE]");
            return false;
        }
        SseLine::Data(payload) => parse_increment(payload),
    };
    if let Err(error) = &item {
        tracing::warn!(%error, "skipping malformed chat stream chunk");
    }
    *emitted += 1;
    deliver(tx, cancel, item).await
}

/// Waits for channel capacity unless the consumer cancels or disappears.
async fn deliver(
    tx: &mpsc::Sender<Result<ChatCompletionStreamResponse>>,
    cancel: &CancellationToken,
    item: Result<ChatCompletionStreamResponse>,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = tx.send(item) => sent.is_ok(),
    }
}

fn parse_increment(payload: &[u8]) -> Result<ChatCompletionStreamResponse> {
    let mut chunk: ChatCompletionStreamResponse = serde_json::from_slice(payload).map_err(|e| {
        LlmError::StreamParse(format!("error decoding stream response: {e}"))
    })?;
    order_choices(&mut chunk.choices, |c| c.index)
        .map_err(|e| LlmError::StreamParse(format!("invalid stream response: {e}")))?;
    Ok(chunk)
}

#[derive(Debug, PartialEq, Eq)]
enum SseLine<'a> {
    Skip,
    Done,
    Data(&'a [u8]),
}

fn classify_line(line: &[u8]) -> SseLine<'_> {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return SseLine::Skip;
    };
    let payload = payload.trim_ascii();
    if payload == DONE_SENTINEL {
        SseLine::Done
    } else {
        SseLine::Data(payload)
    }
}

/// Splits a byte stream into `\n`-terminated lines across chunk boundaries.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
}

impl LineFramer {
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Next complete line, including its `\n`.
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        let end = self.buffer.iter().position(|b| *b == b'\n')?;
        Some(self.buffer.drain(..=end).collect())
    }

    /// Whatever is left once the input has ended.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }
}

/// Rebuilds full messages by concatenating deltas per choice index.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    id: String,
    object: String,
    created: i64,
    model: String,
    choices: BTreeMap<u32, ChatCompletionResponseChoice>,
    usage: UsageInfo,
}

impl StreamAccumulator {
    pub fn push(&mut self, chunk: ChatCompletionStreamResponse) {
        if self.id.is_empty() {
            self.id = chunk.id;
        }
        if self.model.is_empty() {
            self.model = chunk.model;
        }
        if self.object.is_empty() {
            self.object = chunk.object;
        }
        if self.created == 0 {
            self.created = chunk.created;
        }
        if let Some(usage) = chunk.usage {
            self.usage = usage;
        }

        for choice in chunk.choices {
            let entry =
                self.choices
                    .entry(choice.index)
                    .or_insert_with(|| ChatCompletionResponseChoice {
                        index: choice.index,
                        message: ChatMessage::new(Role::Assistant, ""),
                        finish_reason: None,
                    });
            let delta = choice.delta;
            if let Some(role) = delta.role {
                entry.message.role = role;
            }
            entry.message.content.push_str(&delta.content);
            for call in delta.tool_calls {
                match entry.message.tool_calls.last_mut() {
                    // Continuation fragments carry no id.
                    Some(last) if call.id.is_empty() => {
                        if last.function.name.is_empty() {
                            last.function.name = call.function.name;
                        }
                        last.function.arguments.push_str(&call.function.arguments);
                    }
                    _ => entry.message.tool_calls.push(call),
                }
            }
            if entry.finish_reason.is_none() {
                entry.finish_reason = choice.finish_reason;
            }
        }
    }

    pub fn finish(self) -> ChatCompletionResponse {
        ChatCompletionResponse {
            id: self.id,
            object: if self.object.is_empty() {
                "chat.completion".to_string()
            } else {
                self.object
            },
            created: self.created,
            model: self.model,
            choices: self.choices.into_values().collect(),
            usage: self.usage,
        }
    }
}
