use crate::client::MistralClient;
use crate::error::{LlmError, Result};
use crate::types::{UsageInfo, null_as_default};
use reqwest::Method;
use serde::{Deserialize, Serialize};

pub const EMBEDDINGS_PATH: &str = "v1/embeddings";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingObject {
    #[serde(default, deserialize_with = "null_as_default")]
    pub object: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub embedding: Vec<f64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub object: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub data: Vec<EmbeddingObject>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub model: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub usage: UsageInfo,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

impl MistralClient {
    /// One embedding per input, in input order.
    #[tracing::instrument(level = "info", skip_all, fields(model = %model, inputs = input.len()))]
    pub async fn embeddings(&self, model: &str, input: &[String]) -> Result<EmbeddingResponse> {
        if input.is_empty() {
            return Err(LlmError::InvalidInput(
                "embeddings input must not be empty".to_string(),
            ));
        }
        let req = EmbeddingRequest { model, input };
        let mut resp: EmbeddingResponse = self
            .request_json(Method::POST, EMBEDDINGS_PATH, Some(&req))
            .await?;
        resp.data.sort_by_key(|d| d.index);
        Ok(resp)
    }
}
