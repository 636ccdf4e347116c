// HTTP client for the preview analysis and editor endpoints

use super::types::{
    AnalyzePreviewRequest, EditorPromptRequest, EditorPromptResponse, PreviewAnalysisResponse,
};
use super::{EditorBridge, PreviewAnalyzer};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

pub const ANALYZE_PREVIEW_PATH: &str = "/api/ai/analyze-preview";
pub const EDITOR_PROMPT_PATH: &str = "/api/cursor/prompt";

/// Talks to the backend's analysis and editor endpoints over HTTP
#[derive(Clone)]
pub struct HttpAnalysisClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpAnalysisClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("coding-manager")
            .build()
            .unwrap_or_else(|e| {
                log::warn!("[Preview] Falling back to default HTTP client: {}", e);
                reqwest::Client::new()
            });

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_json<B: Serialize, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R, String> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| format!("Failed to reach {}: {}", url, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(format!("Backend error ({}) from {}: {}", status, path, text));
        }

        response
            .json()
            .await
            .map_err(|e| format!("Failed to parse response from {}: {}", path, e))
    }
}

#[async_trait]
impl PreviewAnalyzer for HttpAnalysisClient {
    async fn analyze_preview(
        &self,
        request: AnalyzePreviewRequest,
    ) -> Result<PreviewAnalysisResponse, String> {
        self.post_json(ANALYZE_PREVIEW_PATH, &request).await
    }
}

#[async_trait]
impl EditorBridge for HttpAnalysisClient {
    async fn forward_prompt(&self, prompt: &str, context: &str) -> Result<(), String> {
        let body = EditorPromptRequest {
            prompt: prompt.to_string(),
            context: context.to_string(),
        };
        let response: EditorPromptResponse = self.post_json(EDITOR_PROMPT_PATH, &body).await?;

        if response.success {
            Ok(())
        } else {
            Err(response
                .message
                .unwrap_or_else(|| "Editor rejected the prompt".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash() {
        let client = HttpAnalysisClient::new("http://127.0.0.1:3421/", Duration::from_secs(1));
        assert_eq!(client.base_url(), "http://127.0.0.1:3421");
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_an_error() {
        let client = HttpAnalysisClient::new("http://127.0.0.1:9", Duration::from_millis(500));
        let err = client.forward_prompt("fix it", "").await.unwrap_err();
        assert!(err.starts_with("Failed to reach"));
    }
}
