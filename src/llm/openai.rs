//! `OpenAI` chat completions with tool calling

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Dispatch, Dispatcher, ToolRegistry};
use crate::assistant::{Message, ToolCall};
use crate::{Error, Result};

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [Value]>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

/// Chat client that runs tool rounds until the model answers in text
pub struct OpenAiChat {
    client: reqwest::blocking::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    temperature: f32,
    max_tool_rounds: u32,
    tools: ToolRegistry,
}

impl OpenAiChat {
    /// Create a new chat client
    ///
    /// # Errors
    ///
    /// Returns error if API key is empty or the HTTP client cannot be built
    pub fn new(
        api_key: SecretString,
        base_url: String,
        model: String,
        temperature: f32,
        max_tool_rounds: u32,
        tools: ToolRegistry,
    ) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for chat".to_string(),
            ));
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        tracing::debug!(model, tools = tools.definitions().len(), "chat client initialized");

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            temperature,
            max_tool_rounds,
            tools,
        })
    }

    fn complete(&self, messages: &[Message], tools: Option<&[Value]>) -> Result<Choice> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            tools,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .map_err(|e| {
                tracing::error!(error = %e, "chat request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            tracing::error!(status = %status, body = %body, "chat API error");
            return Err(Error::Llm(format!("chat API error {status}: {body}")));
        }

        let result: ChatResponse = response.json()?;
        result
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Llm("chat response had no choices".to_string()))
    }
}

impl Dispatcher for OpenAiChat {
    fn respond(&self, history: &mut Vec<Message>) -> Result<Dispatch> {
        let definitions = self.tools.definitions();

        for round in 0..=self.max_tool_rounds {
            // The last round withholds tools so the model must answer
            let offer_tools = round < self.max_tool_rounds && !definitions.is_empty();
            let choice = self.complete(history, offer_tools.then_some(definitions.as_slice()))?;

            let calls = choice.message.tool_calls.unwrap_or_default();
            if !offer_tools || calls.is_empty() {
                let text = choice.message.content.unwrap_or_default();
                tracing::debug!(
                    rounds = round,
                    finish_reason = choice.finish_reason.as_deref().unwrap_or("unknown"),
                    response_len = text.len(),
                    "model responded"
                );
                return Ok(Dispatch::Reply(text.trim().to_string()));
            }

            history.push(Message::tool_request(choice.message.content, calls.clone()));
            for call in &calls {
                let result = self.tools.execute(&call.function.name, &call.function.arguments);
                history.push(Message::tool_result(&call.id, result));
            }
        }

        Err(Error::Llm("tool round limit reached".to_string()))
    }
}
