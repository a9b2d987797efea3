use crate::chat::ChatCompletionResponse;
use crate::client::MistralClient;
use crate::error::Result;
use crate::types::order_choices;
use reqwest::Method;
use serde::Serialize;

pub const FIM_COMPLETIONS_PATH: &str = "v1/fim/completions";

/// Fill-in-the-middle responses share the chat completion shape.
pub type FimCompletionResponse = ChatCompletionResponse;

/// The model writes the text that belongs between `prompt` and `suffix`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FimRequestParams {
    pub model: String,
    pub prompt: String,
    pub suffix: String,
    pub max_tokens: u32,
    pub temperature: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

impl FimRequestParams {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            suffix: suffix.into(),
            max_tokens: 1024,
            temperature: 0.0,
            stop: Vec::new(),
        }
    }
}

impl MistralClient {
    #[tracing::instrument(level = "info", skip_all, fields(model = %params.model))]
    pub async fn fim(&self, params: &FimRequestParams) -> Result<FimCompletionResponse> {
        let mut resp: FimCompletionResponse = self
            .request_json(Method::POST, FIM_COMPLETIONS_PATH, Some(params))
            .await?;
        order_choices(&mut resp.choices, |c| c.index)?;
        Ok(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientConfig;
    use crate::types::{FinishReason, model};
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn stop_is_omitted_when_empty() {
        let params = FimRequestParams::new(model::CODESTRAL_LATEST, "def fib(", "return a");
        let v = serde_json::to_value(&params).unwrap();
        assert!(v.get("stop").is_none());
        assert_eq!(v["suffix"], "return a");

        let params = FimRequestParams {
            stop: vec!["\n\n".to_string()],
            ..params
        };
        let v = serde_json::to_value(&params).unwrap();
        assert_eq!(v["stop"], json!(["\n\n"]));
    }

    #[tokio::test]
    async fn fim_posts_prompt_and_suffix() {
        let server = MockServer::start().await;
        let params = FimRequestParams {
            max_tokens: 64,
            ..FimRequestParams::new(model::CODESTRAL_LATEST, "def add(a, b):\n", "\nprint(add(1, 2))")
        };

        Mock::given(method("POST"))
            .and(path("/v1/fim/completions"))
            .and(body_json(json!({
                "model": "codestral-latest",
                "prompt": "def add(a, b):\n",
                "suffix": "\nprint(add(1, 2))",
                "max_tokens": 64,
                "temperature": 0.0
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "fim-1",
                "object": "chat.completion",
                "created": 1,
                "model": "codestral-latest",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": "    return a + b"},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 8, "completion_tokens": 6, "total_tokens": 14}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = MistralClient::with_config(ClientConfig {
            api_key: Some("k".to_string()),
            endpoint: server.uri(),
            ..ClientConfig::default()
        })
        .unwrap();
        let resp = client.fim(&params).await.unwrap();
        assert_eq!(resp.choices[0].message.content, "    return a + b");
        assert_eq!(resp.choices[0].finish_reason, Some(FinishReason::Stop));
        assert_eq!(resp.usage.total_tokens, 14);
    }
}
