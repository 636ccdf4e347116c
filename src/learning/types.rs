use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome attached to a history entry once an instruction resolves
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptResult {
    pub success: bool,
    pub response_snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_code: Option<String>,
}

impl PromptResult {
    pub fn success(response_snippet: impl Into<String>, generated_code: Option<String>) -> Self {
        Self {
            success: true,
            response_snippet: response_snippet.into(),
            generated_code,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            response_snippet: message.into(),
            generated_code: None,
        }
    }
}

/// One submitted instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptHistoryItem {
    pub id: String,
    pub prompt: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<PromptResult>,
}

impl PromptHistoryItem {
    pub fn succeeded(&self) -> bool {
        self.result.as_ref().map(|r| r.success).unwrap_or(false)
    }
}

/// Explicit user ratings for one prompt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackCounts {
    pub positive: u32,
    pub negative: u32,
}
