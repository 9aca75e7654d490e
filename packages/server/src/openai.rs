//! OpenAI-backed implementation of the generation contract.
//!
//! Uses the `json_schema` response format so the completion is guaranteed to
//! deserialize into [`GeneratedContent`] or fail loudly as a parse error.
//! Each tenant maps to a [`TenantProfile`] selecting model and editorial
//! voice; unknown tenants fall back to the default profile.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use pipeline::{GeneratedContent, GenerationClient, GenerationError};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

/// Per-tenant generation configuration.
#[derive(Debug, Clone)]
pub struct TenantProfile {
    pub model: String,
    /// Editorial voice folded into the system prompt.
    pub voice: String,
    /// Byline attached when the model does not produce one.
    pub default_author: String,
}

impl Default for TenantProfile {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            voice: "a clear, neutral editorial voice".to_string(),
            default_author: "Editorial Desk".to_string(),
        }
    }
}

/// [`GenerationClient`] backed by the OpenAI chat completions API.
pub struct OpenAiGenerationClient {
    http_client: Client,
    api_key: String,
    base_url: String,
    profiles: HashMap<String, TenantProfile>,
    default_profile: TenantProfile,
}

impl OpenAiGenerationClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http_client: Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            profiles: HashMap::new(),
            default_profile: TenantProfile::default(),
        }
    }

    /// Set a custom base URL (for Azure, proxies, etc.).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Register a tenant-specific profile.
    pub fn with_profile(mut self, tenant: impl Into<String>, profile: TenantProfile) -> Self {
        self.profiles.insert(tenant.into(), profile);
        self
    }

    pub fn with_default_profile(mut self, profile: TenantProfile) -> Self {
        self.default_profile = profile;
        self
    }

    fn profile_for(&self, tenant: &str) -> &TenantProfile {
        self.profiles.get(tenant).unwrap_or(&self.default_profile)
    }

    fn system_prompt(profile: &TenantProfile) -> String {
        format!(
            "You are an editor turning a raw transcript into a publishable article. \
             Write in {}. Produce a title, the full article body, an author byline \
             (use \"{}\" if none is evident), and a one-paragraph summary.",
            profile.voice, profile.default_author
        )
    }

    fn response_schema() -> serde_json::Value {
        json!({
            "type": "json_schema",
            "json_schema": {
                "name": "generated_content",
                "strict": true,
                "schema": {
                    "type": "object",
                    "properties": {
                        "title": { "type": "string" },
                        "body": { "type": "string" },
                        "author": { "type": "string" },
                        "summary": { "type": "string" },
                        "slug_candidate": { "type": ["string", "null"] }
                    },
                    "required": ["title", "body", "author", "summary", "slug_candidate"],
                    "additionalProperties": false
                }
            }
        })
    }
}

#[derive(Deserialize)]
struct ChatResponseRaw {
    choices: Vec<ChoiceRaw>,
}

#[derive(Deserialize)]
struct ChoiceRaw {
    message: MessageRaw,
}

#[derive(Deserialize)]
struct MessageRaw {
    content: String,
}

#[async_trait]
impl GenerationClient for OpenAiGenerationClient {
    async fn generate(
        &self,
        source_text: &str,
        tenant: &str,
    ) -> Result<GeneratedContent, GenerationError> {
        if self.api_key.is_empty() {
            return Err(GenerationError::Config("OpenAI API key not set".into()));
        }

        let profile = self.profile_for(tenant);
        let start = Instant::now();

        let body = json!({
            "model": profile.model,
            "messages": [
                { "role": "system", "content": Self::system_prompt(profile) },
                { "role": "user", "content": source_text },
            ],
            "response_format": Self::response_schema(),
        });

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, tenant = %tenant, "OpenAI request failed");
                GenerationError::Network(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(status = %status, error = %error_text, "OpenAI API error");
            return Err(GenerationError::Api(format!(
                "OpenAI API error: {}",
                error_text
            )));
        }

        let chat_response: ChatResponseRaw = response
            .json()
            .await
            .map_err(|e| GenerationError::Parse(e.to_string()))?;

        let content = chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| GenerationError::Api("No response from OpenAI".into()))?;

        let generated: GeneratedContent = serde_json::from_str(&content)
            .map_err(|e| GenerationError::Parse(format!("invalid structured output: {}", e)))?;

        debug!(
            model = %profile.model,
            tenant = %tenant,
            duration_ms = start.elapsed().as_millis(),
            "generated content fields"
        );

        Ok(generated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_tenant_falls_back_to_default_profile() {
        let client = OpenAiGenerationClient::new("key").with_profile(
            "acme",
            TenantProfile {
                model: "gpt-4o-mini".into(),
                voice: "a brisk newsroom voice".into(),
                default_author: "Acme Desk".into(),
            },
        );

        assert_eq!(client.profile_for("acme").model, "gpt-4o-mini");
        assert_eq!(client.profile_for("nobody").model, "gpt-4o");
    }

    #[test]
    fn system_prompt_carries_voice_and_byline() {
        let profile = TenantProfile {
            model: "gpt-4o".into(),
            voice: "a wry, conversational voice".into(),
            default_author: "The Signal Desk".into(),
        };
        let prompt = OpenAiGenerationClient::system_prompt(&profile);
        assert!(prompt.contains("a wry, conversational voice"));
        assert!(prompt.contains("The Signal Desk"));
    }
}
