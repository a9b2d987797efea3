use crate::client::MistralClient;
use crate::error::Result;
use crate::stream::{ChatStream, spawn_decoder};
use crate::types::{
    ChatMessage, DeltaMessage, FinishReason, ResponseFormat, Tool, ToolChoice, UsageInfo,
    null_as_default, order_choices,
};
use reqwest::Method;
use serde::{Deserialize, Serialize};

pub const CHAT_COMPLETIONS_PATH: &str = "v1/chat/completions";

/// Sampling and tool settings for `chat` and `chat_stream`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequestParams {
    /// Higher values like 0.8 make the output more random, lower values like
    /// 0.2 more deterministic. Alter this or `top_p`, not both.
    pub temperature: f64,
    /// Nucleus sampling: only tokens within the top `top_p` probability mass
    /// are considered.
    pub top_p: f64,
    pub random_seed: u64,
    pub max_tokens: u32,
    /// Prepend the provider's safety prompt.
    pub safe_prompt: bool,
    pub tools: Vec<Tool>,
    /// Only sent when `tools` is non-empty.
    pub tool_choice: Option<ToolChoice>,
    pub response_format: Option<ResponseFormat>,
}

impl Default for ChatRequestParams {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            top_p: 1.0,
            random_seed: 42069,
            max_tokens: 4000,
            safe_prompt: false,
            tools: Vec::new(),
            tool_choice: None,
            response_format: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    top_p: f64,
    random_seed: u64,
    max_tokens: u32,
    #[serde(skip_serializing_if = "is_false")]
    safe_prompt: bool,
    #[serde(skip_serializing_if = "is_empty_slice")]
    tools: &'a [Tool],
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
    #[serde(skip_serializing_if = "is_false")]
    stream: bool,
}

impl<'a> ChatCompletionRequest<'a> {
    fn new(
        model: &'a str,
        messages: &'a [ChatMessage],
        params: &'a ChatRequestParams,
        stream: bool,
    ) -> Self {
        Self {
            model,
            messages,
            temperature: params.temperature,
            top_p: params.top_p,
            random_seed: params.random_seed,
            max_tokens: params.max_tokens,
            safe_prompt: params.safe_prompt,
            tools: &params.tools,
            tool_choice: params.tool_choice.filter(|_| !params.tools.is_empty()),
            response_format: params.response_format,
            stream,
        }
    }
}

fn is_false(v: &bool) -> bool {
    !*v
}

fn is_empty_slice<T>(v: &&[T]) -> bool {
    v.is_empty()
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub object: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub created: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub model: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub choices: Vec<ChatCompletionResponseChoice>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub usage: UsageInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionResponseChoice {
    #[serde(default, deserialize_with = "null_as_default")]
    pub index: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: ChatMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

/// One streamed increment. Choices carry deltas instead of full messages.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChatCompletionStreamResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub model: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub choices: Vec<ChatCompletionResponseChoiceStream>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub created: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub object: String,
    /// Usually present on the final increment only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionResponseChoiceStream {
    #[serde(default, deserialize_with = "null_as_default")]
    pub index: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub delta: DeltaMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

impl MistralClient {
    #[tracing::instrument(
        level = "info",
        skip_all,
        fields(model = %model, messages = messages.len(), tools = params.tools.len())
    )]
    pub async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        params: &ChatRequestParams,
    ) -> Result<ChatCompletionResponse> {
        let req = ChatCompletionRequest::new(model, messages, params, false);
        let mut resp: ChatCompletionResponse = self
            .request_json(Method::POST, CHAT_COMPLETIONS_PATH, Some(&req))
            .await?;
        order_choices(&mut resp.choices, |c| c.index)?;
        tracing::debug!(
            choices = resp.choices.len(),
            prompt_tokens = resp.usage.prompt_tokens,
            completion_tokens = resp.usage.completion_tokens,
            "chat completion received"
        );
        Ok(resp)
    }

    /// Returns once the server has accepted the request; increments arrive on
    /// the returned handle as the server produces them.
    #[tracing::instrument(
        level = "info",
        skip_all,
        fields(model = %model, messages = messages.len(), tools = params.tools.len())
    )]
    pub async fn chat_stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        params: &ChatRequestParams,
    ) -> Result<ChatStream> {
        let req = ChatCompletionRequest::new(model, messages, params, true);
        let response = self
            .request_stream(Method::POST, CHAT_COMPLETIONS_PATH, Some(&req))
            .await?;
        Ok(spawn_decoder(response.bytes_stream()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientConfig;
    use crate::error::LlmError;
    use crate::types::{Role, ToolCall, model};
    use futures_util::StreamExt;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(server: &MockServer) -> MistralClient {
        MistralClient::with_config(ClientConfig {
            api_key: Some("test-key".to_string()),
            endpoint: server.uri(),
            max_retries: 2,
            ..ClientConfig::default()
        })
        .unwrap()
    }

    fn weather_tool() -> Tool {
        Tool::function(
            "get_weather",
            "Current weather for a city",
            json!({"type": "object", "properties": {"city": {"type": "string"}}}),
        )
    }

    #[test]
    fn default_request_omits_optional_fields() {
        let params = ChatRequestParams::default();
        let messages = [ChatMessage::user("hello")];
        let body = serde_json::to_value(ChatCompletionRequest::new(
            model::MISTRAL_TINY,
            &messages,
            &params,
            false,
        ))
        .unwrap();
        assert_eq!(
            body,
            json!({
                "model": "mistral-tiny-2312",
                "messages": [{"role": "user", "content": "hello"}],
                "temperature": 1.0,
                "top_p": 1.0,
                "random_seed": 42069,
                "max_tokens": 4000
            })
        );
    }

    #[test]
    fn tool_choice_requires_tools() {
        let mut params = ChatRequestParams {
            tool_choice: Some(ToolChoice::Any),
            ..ChatRequestParams::default()
        };
        let messages = [ChatMessage::user("hello")];
        let body = serde_json::to_value(ChatCompletionRequest::new(
            model::MISTRAL_SMALL_LATEST,
            &messages,
            &params,
            true,
        ))
        .unwrap();
        assert!(body.get("tool_choice").is_none());
        assert!(body.get("tools").is_none());
        assert_eq!(body["stream"], true);

        params.tools.push(weather_tool());
        params.response_format = Some(ResponseFormat::JSON_OBJECT);
        let body = serde_json::to_value(ChatCompletionRequest::new(
            model::MISTRAL_SMALL_LATEST,
            &messages,
            &params,
            false,
        ))
        .unwrap();
        assert_eq!(body["tool_choice"], "any");
        assert_eq!(body["tools"][0]["function"]["name"], "get_weather");
        assert_eq!(body["response_format"]["type"], "json_object");
        assert!(body.get("stream").is_none());
    }

    #[tokio::test]
    async fn chat_decodes_full_response() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(header("content-type", "application/json"))
            .and(body_partial_json(json!({
                "model": "mistral-small-latest",
                "messages": [{"role": "user", "content": "hi"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "cmpl-1",
                "object": "chat.completion",
                "created": 1_702_256_327,
                "model": "mistral-small-latest",
                "choices": [
                    {
                        "index": 1,
                        "message": {"role": "assistant", "content": "Second"},
                        "finish_reason": "length"
                    },
                    {
                        "index": 0,
                        "message": {
                            "role": "assistant",
                            "content": "",
                            "tool_calls": [{
                                "id": "call_1",
                                "type": "function",
                                "function": {"name": "get_weather", "arguments": "{\"city\":\"paris\"}"}
                            }]
                        },
                        "finish_reason": "tool_calls"
                    }
                ],
                "usage": {"prompt_tokens": 12, "completion_tokens": 30, "total_tokens": 42},
                "unexpected": true
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let params = ChatRequestParams {
            tools: vec![weather_tool()],
            tool_choice: Some(ToolChoice::Auto),
            ..ChatRequestParams::default()
        };
        let resp = client
            .chat(
                model::MISTRAL_SMALL_LATEST,
                &[ChatMessage::user("hi")],
                &params,
            )
            .await
            .unwrap();

        assert_eq!(resp.id, "cmpl-1");
        assert_eq!(resp.created, 1_702_256_327);
        assert_eq!(resp.choices.len(), 2);
        assert_eq!(resp.choices[0].index, 0);
        assert_eq!(resp.choices[0].finish_reason, Some(FinishReason::ToolCalls));
        assert_eq!(
            resp.choices[0].message.tool_calls[0],
            ToolCall::new("call_1", "get_weather", &json!({"city": "paris"})).unwrap()
        );
        assert_eq!(resp.choices[1].message.content, "Second");
        assert_eq!(resp.choices[1].finish_reason, Some(FinishReason::Length));
        assert_eq!(
            resp.usage,
            UsageInfo {
                prompt_tokens: 12,
                completion_tokens: 30,
                total_tokens: 42
            }
        );
    }

    #[tokio::test]
    async fn chat_rejects_duplicate_choice_indices() {
        let server = MockServer::start().await;
        let choice = json!({"index": 0, "message": {"role": "assistant", "content": "x"}});
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"choices": [choice, choice]})),
            )
            .mount(&server)
            .await;

        let err = test_client(&server)
            .chat(
                model::MISTRAL_TINY,
                &[ChatMessage::user("hi")],
                &ChatRequestParams::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::ResponseFormat(_)));
    }

    #[tokio::test]
    async fn chat_reports_incompatible_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": "nope"})))
            .mount(&server)
            .await;

        let err = test_client(&server)
            .chat(
                model::MISTRAL_TINY,
                &[ChatMessage::user("hi")],
                &ChatRequestParams::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::ResponseFormat(_)));
    }

    #[tokio::test]
    async fn chat_tolerates_missing_fields() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "a"})))
            .mount(&server)
            .await;

        let resp = test_client(&server)
            .chat(
                model::MISTRAL_TINY,
                &[ChatMessage::user("hi")],
                &ChatRequestParams::default(),
            )
            .await
            .unwrap();
        assert_eq!(resp.id, "a");
        assert!(resp.choices.is_empty());
    }

    #[test]
    fn choice_without_index_or_message_decodes_to_zero_values() {
        let resp: ChatCompletionResponse =
            serde_json::from_value(json!({"choices": [{"finish_reason": "stop"}]})).unwrap();
        assert_eq!(resp.choices[0].index, 0);
        assert_eq!(resp.choices[0].message.role, Role::Assistant);
        assert_eq!(resp.choices[0].message.content, "");

        let chunk: ChatCompletionStreamResponse =
            serde_json::from_value(json!({"choices": [{"index": null, "delta": {"content": "x"}}]}))
                .unwrap();
        assert_eq!(chunk.choices[0].index, 0);
    }

    #[tokio::test]
    async fn chat_stream_delivers_increments_over_http() {
        let server = MockServer::start().await;
        let sse = concat!(
            "data: {\"id\":\"s1\",\"model\":\"mistral-tiny\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"Hi\"}}]}\n\n",
            "data: {\"id\":\"s1\",\"model\":\"mistral-tiny\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\" there\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        );

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
            .expect(1)
            .mount(&server)
            .await;

        let stream = test_client(&server)
            .chat_stream(
                model::MISTRAL_TINY,
                &[ChatMessage::user("hi")],
                &ChatRequestParams::default(),
            )
            .await
            .unwrap();

        let increments: Vec<_> = stream.map(|i| i.unwrap()).collect().await;
        assert_eq!(increments.len(), 2);
        assert_eq!(increments[0].choices[0].delta.role, Some(Role::Assistant));
        let text: String = increments
            .iter()
            .map(|i| i.choices[0].delta.content.as_str())
            .collect();
        assert_eq!(text, "Hi there");
        assert_eq!(
            increments[1].choices[0].finish_reason,
            Some(FinishReason::Stop)
        );
    }

    #[tokio::test]
    async fn chat_stream_surfaces_api_errors_before_streaming() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad model"))
            .expect(1)
            .mount(&server)
            .await;

        let err = test_client(&server)
            .chat_stream(
                "no-such-model",
                &[ChatMessage::user("hi")],
                &ChatRequestParams::default(),
            )
            .await
            .unwrap_err();
        match err {
            LlmError::Api { status, body, .. } => {
                assert_eq!(status.as_u16(), 400);
                assert_eq!(body, "bad model");
            }
            other => panic!("expected api error, got {other:?}"),
        }
    }
}
