// Request and response bodies for the preview analysis and editor endpoints

use serde::{Deserialize, Serialize};

/// Goal sent with every loop-driven analysis
pub const GOAL_GENERAL: &str = "general";

/// Body of `POST /api/ai/analyze-preview`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzePreviewRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dom_snapshot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub analysis_goal: String,
}

impl AnalyzePreviewRequest {
    /// The markup to analyze, whichever field carried it
    pub fn markup(&self) -> Option<&str> {
        self.html_content
            .as_deref()
            .or(self.dom_snapshot.as_deref())
            .filter(|s| !s.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewIssue {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub severity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewSuggestion {
    pub description: String,
    pub priority: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_snippet: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreviewAnalysis {
    pub summary: String,
    #[serde(default)]
    pub issues: Vec<PreviewIssue>,
    #[serde(default)]
    pub suggestions: Vec<PreviewSuggestion>,
}

/// Response of `POST /api/ai/analyze-preview`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewAnalysisResponse {
    pub analysis: PreviewAnalysis,
    /// Instruction to forward to the editor integration, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor_prompt: Option<String>,
}

/// Body of `POST /api/cursor/prompt`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditorPromptRequest {
    pub prompt: String,
    #[serde(default)]
    pub context: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditorPromptResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
