//! `claude` module: single-turn prompts through [`cadence_api::ClaudeClient`].

use std::sync::Arc;

use async_trait::async_trait;
use cadence_api::{ClaudeClient, MessageRequest};
use serde_json::{Map, Value, json};

use super::{number_input, string_input};
use crate::executor::{ActionContext, StepOutcome};
use crate::registry::{ActionCapability, ActionHandler, ModuleDefinition};

pub fn module() -> ModuleDefinition {
    ModuleDefinition::new("claude", ActionCapability::Claude)
        .with_version("1.0.0")
        .with_description("Prompts Claude through the Messages API")
        .with_action("run-prompt", Arc::new(RunPromptAction))
}

/// Inputs: `prompt` (required), `apiKey`, `model`, `systemPrompt`, `maxTokens`, `temperature`.
pub struct RunPromptAction;

#[async_trait]
impl ActionHandler for RunPromptAction {
    async fn invoke(&self, inputs: Map<String, Value>, context: ActionContext) -> StepOutcome {
        let Some(prompt) = string_input(&inputs, "prompt") else {
            return StepOutcome::failure("run-prompt requires a 'prompt' input");
        };
        let client = match ClaudeClient::new_from_env(string_input(&inputs, "apiKey")) {
            Ok(client) => client,
            Err(error) => return StepOutcome::failure(format!("{error:#}")),
        };

        let request = build_request(prompt, &inputs);
        context
            .logger
            .info(&format!("sending prompt to {} ({} chars)", request.model, prompt.len()));
        match client.create_message(&request).await {
            Ok(response) => StepOutcome::success(json!({
                "id": response.id,
                "model": response.model,
                "output": response.text(),
                "stopReason": response.stop_reason,
                "usage": response.usage,
            })),
            Err(error) => {
                context.logger.warn(&format!("prompt failed: {error:#}"));
                StepOutcome::failure(format!("{error:#}"))
            }
        }
    }
}

fn build_request(prompt: &str, inputs: &Map<String, Value>) -> MessageRequest {
    let mut request = MessageRequest::user_prompt(prompt);
    if let Some(model) = string_input(inputs, "model") {
        request.model = model.to_string();
    }
    if let Some(system) = string_input(inputs, "systemPrompt") {
        request.system = system.to_string();
    }
    if let Some(max_tokens) = number_input(inputs, "maxTokens").filter(|tokens| *tokens >= 1.0) {
        request.max_tokens = max_tokens as u32;
    }
    if let Some(temperature) = number_input(inputs, "temperature").filter(|value| (0.0..=1.0).contains(value)) {
        request.temperature = temperature;
    }
    request
}
