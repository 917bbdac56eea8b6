//! OpenAI-compatible implementation of the shared `agent_provider` contract.
//!
//! This adapter translates the runtime's `Message` history into chat
//! completion payloads, sends them through `chat_api` and maps the first
//! choice back into a `Completion`.

use std::sync::Arc;
use std::time::Duration;

use agent_provider::{
    Completion, CompletionError, CompletionService, FunctionCall, Message, ProviderInitError,
    ProviderProfile, Role, SamplingConfig, ToolCall, ToolDefinition, Usage,
};
use chat_api::{
    ChatApiClient, ChatApiConfig, ChatApiError, ChatMessage, ChatRequest, ChatResponse,
    ChatToolCall, ChatToolCallFunction, ChatToolSpec,
};

/// Stable provider identifier used by `coding_agent` startup selection.
pub const OPENAI_PROVIDER_ID: &str = "openai";

const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Runtime configuration for the OpenAI-compatible provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenAiProviderConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
    pub timeout: Option<Duration>,
}

impl OpenAiProviderConfig {
    #[must_use]
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: None,
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn into_chat_api_config(self) -> ChatApiConfig {
        let mut config = ChatApiConfig::new(self.api_key);

        if let Some(base_url) = self.base_url {
            config = config.with_base_url(base_url);
        }

        if let Some(timeout) = self.timeout {
            config = config.with_timeout(timeout);
        }

        config
    }
}

trait CompletionClient: Send + Sync {
    fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, ChatApiError>;
}

#[derive(Debug)]
struct DefaultCompletionClient {
    client: ChatApiClient,
}

impl CompletionClient for DefaultCompletionClient {
    fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, ChatApiError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|error| {
                ChatApiError::Unknown(format!("failed to initialize tokio runtime: {error}"))
            })?;

        runtime.block_on(self.client.complete(request))
    }
}

/// `CompletionService` adapter backed by `chat_api` transport primitives.
pub struct OpenAiProvider {
    model: String,
    client: Arc<dyn CompletionClient>,
}

impl OpenAiProvider {
    /// Creates a provider using real HTTP transport.
    pub fn new(config: OpenAiProviderConfig) -> Result<Self, ProviderInitError> {
        if config.api_key.trim().is_empty() {
            return Err(ProviderInitError::new(
                "Failed to initialize openai provider: API key is not configured (set OPENAI_KEY)",
            ));
        }

        let model = sanitize_model(&config.model);
        let client = Arc::new(DefaultCompletionClient {
            client: ChatApiClient::new(config.into_chat_api_config()).map_err(map_init_error)?,
        });

        Ok(Self { model, client })
    }

    #[cfg(test)]
    fn with_completion_client_for_tests(
        model: &str,
        client: Arc<dyn CompletionClient>,
    ) -> Self {
        Self {
            model: sanitize_model(model),
            client,
        }
    }
}

impl CompletionService for OpenAiProvider {
    fn profile(&self) -> ProviderProfile {
        ProviderProfile {
            provider_id: OPENAI_PROVIDER_ID.to_string(),
            model_id: self.model.clone(),
        }
    }

    fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        sampling: &SamplingConfig,
    ) -> Result<Completion, CompletionError> {
        let model = if sampling.model.trim().is_empty() {
            self.model.clone()
        } else {
            sampling.model.trim().to_string()
        };

        let request = ChatRequest::new(model, messages.iter().map(to_chat_message).collect())
            .with_tools(tools.iter().map(to_tool_spec).collect())
            .with_sampling(sampling.temperature, sampling.max_tokens);

        let response = self
            .client
            .complete(&request)
            .map_err(|error| CompletionError::new(format!("API request failed: {error}")))?;

        from_chat_response(response)
    }
}

fn to_chat_message(message: &Message) -> ChatMessage {
    let tool_calls = if message.tool_calls.is_empty() {
        None
    } else {
        Some(
            message
                .tool_calls
                .iter()
                .map(|call| ChatToolCall {
                    id: call.id.clone(),
                    kind: "function".to_string(),
                    function: ChatToolCallFunction {
                        name: call.function.name.clone(),
                        arguments: call.function.arguments.clone(),
                    },
                    index: None,
                })
                .collect(),
        )
    };

    ChatMessage {
        role: message.role.as_str().to_string(),
        content: message.content.clone(),
        tool_calls,
        tool_call_id: message.tool_call_id.clone(),
    }
}

fn to_tool_spec(tool: &ToolDefinition) -> ChatToolSpec {
    ChatToolSpec::function(&tool.name, &tool.description, tool.parameters.clone())
}

fn from_chat_response(response: ChatResponse) -> Result<Completion, CompletionError> {
    let usage = response
        .usage
        .map(|usage| Usage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        })
        .unwrap_or_default();

    let choice = response
        .choices
        .into_iter()
        .min_by_key(|choice| choice.index)
        .ok_or_else(|| CompletionError::new("API returned no choices"))?;

    let role = parse_role(&choice.message.role)?;
    let mut tool_calls: Vec<ChatToolCall> = choice.message.tool_calls.unwrap_or_default();
    if tool_calls.iter().all(|call| call.index.is_some()) {
        tool_calls.sort_by_key(|call| call.index);
    }

    let tool_calls = tool_calls
        .into_iter()
        .map(|call| ToolCall {
            id: call.id,
            function: FunctionCall {
                name: call.function.name,
                arguments: call.function.arguments,
            },
        })
        .collect();

    Ok(Completion {
        message: Message {
            role,
            content: choice.message.content.filter(|content| !content.is_empty()),
            tool_calls,
            tool_call_id: None,
        },
        usage,
    })
}

fn parse_role(role: &str) -> Result<Role, CompletionError> {
    match role {
        "assistant" | "" => Ok(Role::Assistant),
        other => Err(CompletionError::new(format!(
            "API returned unexpected message role '{other}'"
        ))),
    }
}

fn sanitize_model(model: &str) -> String {
    let model = model.trim();
    if model.is_empty() {
        DEFAULT_MODEL.to_string()
    } else {
        model.to_string()
    }
}

fn map_init_error(error: ChatApiError) -> ProviderInitError {
    ProviderInitError::new(format!("Failed to initialize openai provider: {error}"))
}
