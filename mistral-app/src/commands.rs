use crate::config::AppConfig;
use anyhow::Context;
use futures_util::StreamExt;
use mistral_llm::{
    ChatMessage, ChatRequestParams, FimRequestParams, LlmError, MistralClient,
};
use std::io::Write;

pub fn chat_params(cfg: &AppConfig) -> ChatRequestParams {
    let mut params = ChatRequestParams::default();
    if let Some(t) = cfg.defaults.temperature {
        params.temperature = t;
    }
    if let Some(n) = cfg.defaults.max_tokens {
        params.max_tokens = n;
    }
    params
}

pub fn conversation(system: Option<&str>, prompt: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = system.filter(|s| !s.trim().is_empty()) {
        messages.push(ChatMessage::system(system));
    }
    messages.push(ChatMessage::user(prompt));
    messages
}

#[tracing::instrument(level = "info", skip_all, fields(model = %model, stream = stream))]
pub async fn chat(
    client: &MistralClient,
    cfg: &AppConfig,
    model: &str,
    system: Option<&str>,
    prompt: &str,
    stream: bool,
) -> anyhow::Result<()> {
    let messages = conversation(system, prompt);
    let params = chat_params(cfg);

    if !stream {
        let resp = client
            .chat(model, &messages, &params)
            .await
            .context("chat completion failed")?;
        for choice in &resp.choices {
            println!("{}", choice.message.content);
        }
        tracing::info!(
            prompt_tokens = resp.usage.prompt_tokens,
            completion_tokens = resp.usage.completion_tokens,
            "chat completion done"
        );
        return Ok(());
    }

    let mut increments = client
        .chat_stream(model, &messages, &params)
        .await
        .context("chat stream failed to start")?;
    let mut stdout = std::io::stdout();
    while let Some(item) = increments.next().await {
        match item {
            Ok(chunk) => {
                for choice in chunk.choices.iter().filter(|c| c.index == 0) {
                    write!(stdout, "{}", choice.delta.content)?;
                }
                stdout.flush()?;
                if let Some(usage) = chunk.usage {
                    tracing::info!(
                        prompt_tokens = usage.prompt_tokens,
                        completion_tokens = usage.completion_tokens,
                        "chat stream usage"
                    );
                }
            }
            Err(error @ LlmError::StreamParse(_)) => {
                tracing::warn!(%error, "skipping malformed stream chunk");
            }
            Err(error) => return Err(error).context("chat stream aborted"),
        }
    }
    writeln!(stdout)?;
    Ok(())
}

#[tracing::instrument(level = "info", skip_all, fields(model = %model))]
pub async fn fim(
    client: &MistralClient,
    cfg: &AppConfig,
    model: &str,
    prompt: &str,
    suffix: &str,
) -> anyhow::Result<()> {
    let mut params = FimRequestParams::new(model, prompt, suffix);
    if let Some(t) = cfg.defaults.temperature {
        params.temperature = t;
    }
    if let Some(n) = cfg.defaults.max_tokens {
        params.max_tokens = n;
    }
    let resp = client.fim(&params).await.context("fim completion failed")?;
    for choice in &resp.choices {
        println!("{}", choice.message.content);
    }
    Ok(())
}

#[tracing::instrument(level = "info", skip_all, fields(model = %model, inputs = inputs.len()))]
pub async fn embed(client: &MistralClient, model: &str, inputs: &[String]) -> anyhow::Result<()> {
    let resp = client
        .embeddings(model, inputs)
        .await
        .context("embeddings request failed")?;
    for item in &resp.data {
        let line = serde_json::to_string(&item.embedding)?;
        println!("{}\t{line}", item.index);
    }
    tracing::info!(prompt_tokens = resp.usage.prompt_tokens, "embeddings done");
    Ok(())
}

#[tracing::instrument(level = "info", skip_all)]
pub async fn models(client: &MistralClient) -> anyhow::Result<()> {
    let list = client.list_models().await.context("listing models failed")?;
    for card in &list.data {
        println!("{}\t{}", card.id, card.owned_by);
    }
    Ok(())
}
