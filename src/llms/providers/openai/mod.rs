//! OpenAI-compatible Chat Completions gateway.
//!
//! Works with any endpoint that implements `POST {base_url}/chat/completions`
//! with function tools. Capabilities are sent as `tools`; `tool_calls` in the
//! reply become [`Invocation`]s.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::capabilities::CapabilityDescriptor;
use crate::config::ModelSettings;
use crate::llms::gateway::{ModelGateway, ModelRequest, ModelResponse};
use crate::types::{CapabilityResult, Invocation, Message};
use crate::utilities::errors::ModelGatewayError;

/// Delay before the first retry; doubled for each later one.
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

pub struct OpenAiGateway {
    settings: ModelSettings,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiGateway").field("settings", &self.settings).finish()
    }
}

impl OpenAiGateway {
    pub fn new(settings: ModelSettings) -> Result<Self, ModelGatewayError> {
        let client = reqwest::Client::builder().timeout(settings.timeout).build()?;
        Ok(Self { settings, client })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.settings.base_url.trim_end_matches('/'))
    }

    /// Build the Chat Completions request body.
    pub fn build_request_body(&self, request: &ModelRequest<'_>) -> Value {
        let mut body = json!({
            "model": self.settings.model,
            "messages": render_messages(request.system_prompt, request.history),
            "temperature": self.settings.temperature,
        });
        if !request.capabilities.is_empty() {
            body["tools"] = Value::Array(request.capabilities.iter().map(tool_definition).collect());
            body["tool_choice"] = json!("auto");
        }
        body
    }
}

#[async_trait]
impl ModelGateway for OpenAiGateway {
    fn model(&self) -> &str {
        &self.settings.model
    }

    async fn complete(&self, request: ModelRequest<'_>) -> Result<ModelResponse, ModelGatewayError> {
        let api_key = self
            .settings
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(ModelGatewayError::MissingCredential)?;

        log::debug!(
            "Model call: model={}, messages={}, capabilities={}",
            self.settings.model,
            request.history.len(),
            request.capabilities.len()
        );
        let body = self.build_request_body(&request);
        let endpoint = self.endpoint();

        let mut last_error = ModelGatewayError::Transport("no attempt made".to_string());
        let mut retry_delay = RETRY_BASE_DELAY;

        for attempt in 0..=self.settings.max_retries {
            if attempt > 0 {
                log::warn!("Model call retry attempt {} after {:?}", attempt, retry_delay);
                tokio::time::sleep(retry_delay).await;
                retry_delay *= 2;
            }

            let response = match self.client.post(&endpoint).bearer_auth(api_key).json(&body).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = e.into();
                    continue;
                }
            };

            let status = response.status();
            let text = match response.text().await {
                Ok(text) => text,
                Err(e) => {
                    last_error = e.into();
                    continue;
                }
            };

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                last_error = ModelGatewayError::Status {
                    status: status.as_u16(),
                    body: truncate(&text, 500),
                };
                continue;
            }
            if !status.is_success() {
                return Err(ModelGatewayError::Status {
                    status: status.as_u16(),
                    body: truncate(&text, 500),
                });
            }

            let parsed: Value = serde_json::from_str(&text).map_err(|e| {
                ModelGatewayError::Malformed(format!("{} - body: {}", e, truncate(&text, 500)))
            })?;
            if let Some(usage) = parsed.get("usage") {
                log::debug!(
                    "Token usage: prompt={}, completion={}, total={}",
                    usage.get("prompt_tokens").and_then(Value::as_i64).unwrap_or(0),
                    usage.get("completion_tokens").and_then(Value::as_i64).unwrap_or(0),
                    usage.get("total_tokens").and_then(Value::as_i64).unwrap_or(0),
                );
            }
            return parse_response(&parsed);
        }

        Err(last_error)
    }
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// A capability as a Chat Completions function tool.
pub fn tool_definition(descriptor: &CapabilityDescriptor) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": descriptor.name,
            "description": descriptor.description,
            "parameters": descriptor.input_schema,
        }
    })
}

/// Render history as Chat Completions messages.
///
/// Invocation ids are only unique within one model turn, so a result is
/// matched against the invocations of the nearest preceding model message.
/// Only invocations answered within their own turn are sent as `tool_calls`,
/// each followed directly by its result, as the API requires. Invocations
/// that were never executed are described in the assistant text instead.
pub fn render_messages(system_prompt: &str, history: &[Message]) -> Vec<Value> {
    let mut rendered = vec![json!({"role": "system", "content": system_prompt})];
    let mut answered_ids: HashSet<&str> = HashSet::new();

    for (at, message) in history.iter().enumerate() {
        match message {
            Message::User { text } => rendered.push(json!({"role": "user", "content": text})),
            Message::SystemNotice { text } => rendered.push(json!({"role": "system", "content": text})),
            Message::Model { text, invocations } => {
                let turn_results = results_of_turn(&history[at + 1..]);
                let result_for = |inv: &Invocation| turn_results.iter().find(|r| r.invocation_id == inv.id).copied();

                let (answered, unanswered): (Vec<&Invocation>, Vec<&Invocation>) =
                    invocations.iter().partition(|inv| result_for(*inv).is_some());

                let mut content = text.clone().unwrap_or_default();
                if !unanswered.is_empty() {
                    let names: Vec<&str> = unanswered.iter().map(|i| i.capability_name.as_str()).collect();
                    if !content.is_empty() {
                        content.push('\n');
                    }
                    content.push_str(&format!("[requested, not executed: {}]", names.join(", ")));
                }

                let mut assistant = json!({"role": "assistant", "content": content});
                if !answered.is_empty() {
                    assistant["tool_calls"] = Value::Array(
                        answered
                            .iter()
                            .map(|inv| {
                                json!({
                                    "id": inv.id,
                                    "type": "function",
                                    "function": {
                                        "name": inv.capability_name,
                                        "arguments": inv.arguments.to_string(),
                                    }
                                })
                            })
                            .collect(),
                    );
                }
                rendered.push(assistant);

                answered_ids.clear();
                for inv in answered {
                    if let Some(result) = result_for(inv) {
                        answered_ids.insert(result.invocation_id.as_str());
                        rendered.push(json!({
                            "role": "tool",
                            "tool_call_id": result.invocation_id,
                            "content": result.outcome.content(),
                        }));
                    }
                }
            }
            Message::CapabilityResult(result) => {
                if !answered_ids.contains(result.invocation_id.as_str()) {
                    log::warn!("Capability result '{}' has no matching invocation", result.invocation_id);
                }
            }
        }
    }
    rendered
}

/// Results recorded after a model turn, up to the next model turn.
fn results_of_turn(rest: &[Message]) -> Vec<&CapabilityResult> {
    rest.iter()
        .take_while(|m| !matches!(m, Message::Model { .. }))
        .filter_map(|m| match m {
            Message::CapabilityResult(r) => Some(r),
            _ => None,
        })
        .collect()
}

/// Parse a Chat Completions response body.
pub fn parse_response(response: &Value) -> Result<ModelResponse, ModelGatewayError> {
    let message = response
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| ModelGatewayError::Malformed("no choices[0].message in response".to_string()))?;

    let text = message
        .get("content")
        .and_then(Value::as_str)
        .map(str::to_string);

    let invocations = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| calls.iter().filter_map(parse_tool_call).collect())
        .unwrap_or_default();

    Ok(ModelResponse { text, invocations })
}

fn parse_tool_call(call: &Value) -> Option<Invocation> {
    let function = call.get("function")?;
    let name = function.get("name").and_then(Value::as_str)?;
    let id = call
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple()));

    let arguments = match function.get("arguments") {
        Some(Value::String(raw)) if raw.trim().is_empty() => json!({}),
        Some(Value::String(raw)) => serde_json::from_str(raw).unwrap_or_else(|_| json!({ "_raw": raw })),
        Some(Value::Null) | None => json!({}),
        Some(other) => other.clone(),
    };
    Some(Invocation::new(id, name, arguments))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CapabilityOutcome;

    fn gateway() -> OpenAiGateway {
        OpenAiGateway::new(ModelSettings {
            base_url: "https://llm.example.com/v1/".to_string(),
            model: "test-model".to_string(),
            api_key: None,
            temperature: 0.0,
            timeout: Duration::from_secs(5),
            max_retries: 0,
        })
        .unwrap()
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        assert_eq!(gateway().endpoint(), "https://llm.example.com/v1/chat/completions");
    }

    #[test]
    fn test_request_body_includes_tools_only_when_present() {
        let history = vec![Message::user("hi")];
        let none = gateway().build_request_body(&ModelRequest {
            system_prompt: "sys",
            capabilities: &[],
            history: &history,
        });
        assert!(none.get("tools").is_none());
        assert_eq!(none["model"], "test-model");

        let caps = vec![CapabilityDescriptor::new("get_forecast", "weather", "Forecast")];
        let some = gateway().build_request_body(&ModelRequest {
            system_prompt: "sys",
            capabilities: &caps,
            history: &history,
        });
        assert_eq!(some["tools"][0]["function"]["name"], "get_forecast");
        assert_eq!(some["tool_choice"], "auto");
    }

    #[test]
    fn test_render_places_results_after_their_call() {
        let answered = Invocation::new("c1", "get_forecast", json!({"city": "Oslo"}));
        let dropped = Invocation::new("c2", "teleport", json!({}));
        let history = vec![
            Message::user("weather?"),
            Message::model(None, vec![answered.clone(), dropped]),
            Message::notice("'teleport' cannot be fulfilled"),
            Message::result(&answered, CapabilityOutcome::Ok("rain".to_string())),
        ];

        let rendered = render_messages("sys", &history);
        let roles: Vec<_> = rendered.iter().map(|m| m["role"].as_str().unwrap()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "tool", "system"]);

        let assistant = &rendered[2];
        assert_eq!(assistant["tool_calls"].as_array().unwrap().len(), 1);
        assert_eq!(assistant["tool_calls"][0]["function"]["arguments"], "{\"city\":\"Oslo\"}");
        assert!(assistant["content"].as_str().unwrap().contains("teleport"));
        assert_eq!(rendered[3]["tool_call_id"], "c1");
        assert_eq!(rendered[3]["content"], "rain");
    }

    #[test]
    fn test_render_reused_id_answers_only_its_own_turn() {
        let blocked = Invocation::new("call_0", "web_search_query", json!({"q": "a"}));
        let reissued = Invocation::new("call_0", "web_search_query", json!({"q": "b"}));
        let history = vec![
            Message::user("search"),
            Message::model(None, vec![blocked]),
            Message::notice("loading provider web-search"),
            Message::notice("Loaded provider(s): web-search"),
            Message::model(None, vec![reissued.clone()]),
            Message::result(&reissued, CapabilityOutcome::Ok("found b".to_string())),
        ];

        let rendered = render_messages("sys", &history);
        let roles: Vec<_> = rendered.iter().map(|m| m["role"].as_str().unwrap()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "system", "system", "assistant", "tool"]);

        let first = &rendered[2];
        assert!(first.get("tool_calls").is_none());
        assert!(first["content"].as_str().unwrap().contains("not executed: web_search_query"));

        let second = &rendered[5];
        assert_eq!(second["tool_calls"].as_array().unwrap().len(), 1);
        assert_eq!(second["tool_calls"][0]["function"]["arguments"], "{\"q\":\"b\"}");
        assert_eq!(rendered[6]["tool_call_id"], "call_0");
        assert_eq!(rendered[6]["content"], "found b");
    }

    #[test]
    fn test_parse_text_answer() {
        let response = parse_response(&json!({
            "choices": [{"message": {"role": "assistant", "content": "Done."}}]
        }))
        .unwrap();
        assert_eq!(response, ModelResponse::answer("Done."));
    }

    #[test]
    fn test_parse_tool_calls() {
        let response = parse_response(&json!({
            "choices": [{"message": {"content": null, "tool_calls": [
                {"id": "a", "type": "function", "function": {"name": "web_search_query", "arguments": "{\"q\":\"rust\"}"}},
                {"type": "function", "function": {"name": "current_time", "arguments": ""}},
                {"id": "c", "type": "function", "function": {"name": "broken", "arguments": "{not json"}},
                {"id": "d", "type": "function", "function": {}}
            ]}}]
        }))
        .unwrap();

        assert_eq!(response.text, None);
        assert_eq!(response.invocations.len(), 3);
        assert_eq!(response.invocations[0].arguments, json!({"q": "rust"}));
        assert!(response.invocations[1].id.starts_with("call_"));
        assert_eq!(response.invocations[1].arguments, json!({}));
        assert_eq!(response.invocations[2].arguments, json!({"_raw": "{not json"}));
    }

    #[test]
    fn test_parse_malformed_response() {
        let err = parse_response(&json!({"error": "nope"})).unwrap_err();
        assert!(matches!(err, ModelGatewayError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_missing_credential_is_reported_before_any_request() {
        let history = vec![Message::user("hi")];
        let err = gateway()
            .complete(ModelRequest {
                system_prompt: "sys",
                capabilities: &[],
                history: &history,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ModelGatewayError::MissingCredential));
    }
}
