//! Azure OpenAI LLM Provider with streaming support

use async_trait::async_trait;

use super::openai::{resolve_api_key, AuthHeader, OpenAiProvider};
use super::{CompletionRequest, CompletionResponse, LlmProvider, LlmStream};
use crate::agents::config::LlmProviderConfig;
use crate::agents::error::{LlmError, LlmResult};

const DEFAULT_API_VERSION: &str = "2024-02-15-preview";

/// Azure OpenAI LLM Provider
///
/// Same wire format as OpenAI, addressed by deployment name with an
/// `api-key` header and an `api-version` query parameter.
pub struct AzureOpenAiProvider {
    inner: OpenAiProvider,
}

impl AzureOpenAiProvider {
    /// Create a new Azure OpenAI provider from configuration
    pub fn new(config: &LlmProviderConfig) -> LlmResult<Self> {
        let api_key = resolve_api_key(config.api_key_env.as_deref(), "AZURE_OPENAI_API_KEY")?;
        let completions_url = deployment_url(config)?;

        let inner = OpenAiProvider::with_endpoint(
            "azure",
            completions_url,
            AuthHeader::ApiKey(api_key),
            config,
        );

        Ok(Self { inner })
    }
}

/// `{base}/openai/deployments/{model}/chat/completions?api-version={version}`
fn deployment_url(config: &LlmProviderConfig) -> LlmResult<String> {
    let base_url = config.base_url.as_deref().ok_or_else(|| {
        LlmError::InvalidRequest(
            "Azure OpenAI requires base_url to be set (e.g., https://your-resource.openai.azure.com)".to_string(),
        )
    })?;

    Ok(format!(
        "{}/openai/deployments/{}/chat/completions?api-version={}",
        base_url.trim_end_matches('/'),
        config.model,
        config.api_version.as_deref().unwrap_or(DEFAULT_API_VERSION)
    ))
}

#[async_trait]
impl LlmProvider for AzureOpenAiProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn complete(&self, request: CompletionRequest) -> LlmResult<CompletionResponse> {
        self.inner.complete(request).await
    }

    fn complete_stream(&self, request: CompletionRequest) -> LlmStream {
        self.inner.complete_stream(request)
    }
}
