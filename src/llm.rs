use crate::error::{Error, Result};
use crate::openai::OpenAIClient;
use crate::retriever::Chunk;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const QA_SYSTEM_PROMPT: &str = "Use the following pieces of context to answer the user's question. \
If you don't know the answer, just say that you don't know, don't try to make up an answer.";

pub struct LLMConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            model: "gpt-3.5-turbo".to_string(),
            temperature: 0.7,
            max_tokens: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: PromptRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: PromptRole::User, content: content.into() }
    }
}

/// A hosted chat model that turns a prompt into a single completion.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, messages: &[PromptMessage]) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

pub struct LLM {
    client: OpenAIClient,
    config: LLMConfig,
}

impl LLM {
    pub fn new(client: OpenAIClient, config: LLMConfig) -> Self {
        LLM { client, config }
    }

    fn build_request_body(&self, messages: &[PromptMessage]) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": self.config.temperature,
        });
        if let Some(max_tokens) = self.config.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        body
    }
}

fn extract_answer(response: ChatCompletionResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .ok_or_else(|| Error::generation("chat completion returned no answer"))
}

#[async_trait]
impl ChatModel for LLM {
    async fn complete(&self, messages: &[PromptMessage]) -> Result<String> {
        let body = self.build_request_body(messages);
        tracing::debug!(model = %self.config.model, messages = messages.len(), "requesting chat completion");
        let response: ChatCompletionResponse = self.client.post("chat/completions", &body).await?;
        extract_answer(response)
    }
}

/// Renders prior exchanges as a plain dialogue transcript.
pub fn format_history(history: &[(String, String)]) -> String {
    history
        .iter()
        .map(|(question, answer)| format!("Human: {}\nAssistant: {}", question, answer))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Prompt asking the model to turn a follow-up into a standalone question.
pub fn construct_condense_prompt(question: &str, history: &[(String, String)]) -> Vec<PromptMessage> {
    vec![PromptMessage::user(format!(
        "Given the following conversation and a follow up question, rephrase the follow up \
         question to be a standalone question, in its original language.\n\n\
         Chat History:\n{}\nFollow Up Input: {}\nStandalone question:",
        format_history(history),
        question
    ))]
}

/// Prompt answering `question` from the retrieved `context` chunks.
pub fn construct_prompt(question: &str, context: &[Chunk]) -> Vec<PromptMessage> {
    let context_str = context
        .iter()
        .map(|chunk| chunk.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    vec![
        PromptMessage::system(format!("{}\n----------------\n{}", QA_SYSTEM_PROMPT, context_str)),
        PromptMessage::user(question),
    ]
}
