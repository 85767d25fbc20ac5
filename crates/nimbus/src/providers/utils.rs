use anyhow::Result;
use regex::Regex;
use serde_json::{json, Value};

use crate::errors::AgentError;
use crate::models::message::{Message, MessageContent};
use crate::models::role::Role;
use crate::models::tool::{Tool, ToolCall};

/// Convert the internal Message format to the Anthropic messages spec.
///
/// Messages whose converted content is empty are skipped entirely; the API
/// rejects empty content arrays.
pub fn messages_to_anthropic_spec(messages: &[Message]) -> Vec<Value> {
    let mut messages_spec = Vec::new();

    for message in messages {
        let role = match message.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };

        let mut blocks = Vec::new();
        for content in &message.content {
            match content {
                MessageContent::Text(text) => {
                    if !text.text.is_empty() {
                        blocks.push(json!({
                            "type": "text",
                            "text": text.text,
                        }));
                    }
                }
                MessageContent::ToolRequest(request) => match &request.tool_call {
                    Ok(tool_call) => {
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": request.id,
                            "name": tool_call.name,
                            "input": tool_call.arguments,
                        }));
                    }
                    Err(e) => {
                        blocks.push(json!({
                            "type": "text",
                            "text": format!("Malformed tool request: {}", e),
                        }));
                    }
                },
                MessageContent::ToolResponse(response) => match &response.tool_result {
                    Ok(contents) => {
                        let segments: Vec<Value> = contents
                            .iter()
                            .filter_map(|content| content.as_text())
                            .map(|text| json!({"type": "text", "text": text}))
                            .collect();
                        blocks.push(json!({
                            "type": "tool_result",
                            "tool_use_id": response.id,
                            "content": segments,
                        }));
                    }
                    Err(e) => {
                        // Surfaced to the model so it can interpret the failure
                        blocks.push(json!({
                            "type": "tool_result",
                            "tool_use_id": response.id,
                            "content": [{
                                "type": "text",
                                "text": format!("The tool call returned the following error:\n{}", e),
                            }],
                            "is_error": true,
                        }));
                    }
                },
            }
        }

        if !blocks.is_empty() {
            messages_spec.push(json!({
                "role": role,
                "content": blocks,
            }));
        }
    }

    messages_spec
}

/// Convert internal Tool descriptors to the Anthropic tools spec
pub fn tools_to_anthropic_spec(tools: &[Tool]) -> Result<Vec<Value>> {
    let mut tool_names = std::collections::HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        if !tool_names.insert(&tool.name) {
            anyhow::bail!("Duplicate tool name: {}", tool.name);
        }

        result.push(json!({
            "name": tool.name,
            "description": tool.description,
            "input_schema": tool.input_schema,
        }));
    }

    Ok(result)
}

/// Convert an Anthropic messages API response to the internal Message format
pub fn anthropic_response_to_message(response: &Value) -> Result<Message> {
    let blocks = response
        .get("content")
        .and_then(|content| content.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid response format from Anthropic API"))?;

    let mut content = Vec::new();
    for block in blocks {
        match block.get("type").and_then(|t| t.as_str()) {
            Some("text") => {
                if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                    content.push(MessageContent::text(text));
                }
            }
            Some("tool_use") => {
                let id = block["id"].as_str().unwrap_or_default().to_string();
                let name = block["name"].as_str().unwrap_or_default().to_string();
                let input = block.get("input").cloned().unwrap_or(json!({}));

                if !is_valid_tool_name(&name) {
                    let error = AgentError::ToolNotFound(format!(
                        "The provided tool name '{}' had invalid characters, it must match this regex [a-zA-Z0-9_-]+",
                        name
                    ));
                    content.push(MessageContent::tool_request(id, Err(error)));
                } else {
                    content.push(MessageContent::tool_request(
                        id,
                        Ok(ToolCall::new(&name, input)),
                    ));
                }
            }
            // Unknown block types are ignored
            _ => {}
        }
    }

    Ok(Message {
        role: Role::Assistant,
        created: chrono::Utc::now().timestamp(),
        content,
    })
}

fn is_valid_tool_name(name: &str) -> bool {
    let re = Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap();
    re.is_match(name)
}
