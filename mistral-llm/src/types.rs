use crate::error::{LlmError, Result};
use serde::{Deserialize, Deserializer, Serialize};

/// Model identifiers accepted by the API.
pub mod model {
    pub const MISTRAL_LARGE_LATEST: &str = "mistral-large-latest";
    pub const MISTRAL_MEDIUM_LATEST: &str = "mistral-medium-latest";
    pub const MISTRAL_SMALL_LATEST: &str = "mistral-small-latest";
    pub const OPEN_MIXTRAL_8X7B: &str = "open-mixtral-8x7b";
    pub const OPEN_MISTRAL_7B: &str = "open-mistral-7b";

    pub const MISTRAL_LARGE_2402: &str = "mistral-large-2402";
    pub const MISTRAL_MEDIUM_2312: &str = "mistral-medium-2312";
    pub const MISTRAL_SMALL_2402: &str = "mistral-small-2402";
    pub const MISTRAL_SMALL_2312: &str = "mistral-small-2312";
    pub const MISTRAL_TINY: &str = "mistral-tiny-2312";

    pub const CODESTRAL_LATEST: &str = "codestral-latest";
    pub const MISTRAL_EMBED: &str = "mistral-embed";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    /// Assumed when a response message omits its role.
    #[default]
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    Error,
    ToolCalls,
    /// Any value this client does not know yet.
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormatType {
    Text,
    JsonObject,
}

/// `{"type": "json_object"}` forces the model to answer with valid JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: ResponseFormatType,
}

impl ResponseFormat {
    pub const TEXT: Self = Self {
        kind: ResponseFormatType::Text,
    };
    pub const JSON_OBJECT: Self = Self {
        kind: ResponseFormatType::JsonObject,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolType {
    #[default]
    Function,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    Auto,
    Any,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    #[serde(rename = "type")]
    pub kind: ToolType,
    pub function: Function,
}

impl Tool {
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            kind: ToolType::Function,
            function: Function {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub description: String,
    /// JSON Schema.
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    /// JSON object string.
    #[serde(default, deserialize_with = "null_as_default")]
    pub arguments: String,
}

impl FunctionCall {
    pub fn parsed_arguments(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        match serde_json::from_str::<serde_json::Value>(&self.arguments) {
            Ok(serde_json::Value::Object(map)) => Ok(map),
            Ok(other) => Err(LlmError::InvalidInput(format!(
                "tool call {} arguments must be a JSON object, got {other}",
                self.name
            ))),
            Err(e) => Err(LlmError::InvalidInput(format!(
                "tool call {} arguments are not valid JSON: {e}",
                self.name
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: ToolType,
    #[serde(default)]
    pub function: FunctionCall,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: &serde_json::Value,
    ) -> Result<Self> {
        let name = name.into();
        if !arguments.is_object() {
            return Err(LlmError::InvalidInput(format!(
                "tool call {name} arguments must be a JSON object"
            )));
        }
        Ok(Self {
            id: id.into(),
            kind: ToolType::Function,
            function: FunctionCall {
                name,
                arguments: arguments.to_string(),
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: Role,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Result of executing the tool call `tool_call_id`.
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(Role::Tool, content)
        }
    }
}

/// Incremental fragment of a message in a streamed response.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeltaMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UsageInfo {
    #[serde(default, deserialize_with = "null_as_default")]
    pub prompt_tokens: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub completion_tokens: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_tokens: u32,
}

/// Treats an explicit JSON `null` like a missing field.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Sorts choices by index and rejects duplicate indices.
pub(crate) fn order_choices<T>(choices: &mut [T], index: impl Fn(&T) -> u32) -> Result<()> {
    choices.sort_by_key(|c| index(c));
    if let Some(pair) = choices.windows(2).find(|w| index(&w[0]) == index(&w[1])) {
        return Err(LlmError::ResponseFormat(format!(
            "duplicate choice index {}",
            index(&pair[0])
        )));
    }
    Ok(())
}
