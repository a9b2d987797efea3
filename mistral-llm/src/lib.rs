//! Typed async client for the Mistral API.
//!
//! Chat completion (buffered and streamed), fill-in-the-middle, embeddings and
//! model listing over one retrying HTTP core.

mod chat;
mod client;
mod embeddings;
mod error;
mod fim;
mod models;
mod stream;
mod types;

pub use chat::{
    ChatCompletionResponse, ChatCompletionResponseChoice, ChatCompletionResponseChoiceStream,
    ChatCompletionStreamResponse, ChatRequestParams,
};
pub use client::{
    CODESTRAL_API_KEY_ENV, CODESTRAL_ENDPOINT, ClientConfig, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT,
    ENDPOINT, MISTRAL_API_KEY_ENV, MistralClient, RETRY_STATUS_CODES,
};
pub use embeddings::{EmbeddingObject, EmbeddingResponse};
pub use error::{LlmError, Result};
pub use fim::{FimCompletionResponse, FimRequestParams};
pub use models::{ModelCard, ModelList, ModelPermission};
pub use stream::{ChatStream, LineFramer, STREAM_CHANNEL_CAPACITY, StreamAccumulator, spawn_decoder};
pub use types::{
    ChatMessage, DeltaMessage, FinishReason, Function, FunctionCall, ResponseFormat,
    ResponseFormatType, Role, Tool, ToolCall, ToolChoice, ToolType, UsageInfo, model,
};
