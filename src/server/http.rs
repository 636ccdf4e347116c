//! HTTP endpoints of the mock backend: preview analysis and editor prompts

use super::BackendState;
use crate::preview::{
    analyze_markup, AnalyzePreviewRequest, EditorPromptRequest, EditorPromptResponse,
    PreviewAnalysisResponse,
};
use axum::{extract::State, http::StatusCode, Json};

/// `POST /api/ai/analyze-preview`
pub async fn analyze_preview_handler(
    Json(request): Json<AnalyzePreviewRequest>,
) -> Json<PreviewAnalysisResponse> {
    log::debug!(
        "[Backend] Analyzing preview {:?} (goal: {})",
        request.file_name,
        request.analysis_goal
    );
    Json(analyze_markup(&request))
}

/// `POST /api/cursor/prompt`
pub async fn editor_prompt_handler(
    State(state): State<BackendState>,
    Json(request): Json<EditorPromptRequest>,
) -> (StatusCode, Json<EditorPromptResponse>) {
    if request.prompt.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(EditorPromptResponse {
                success: false,
                message: Some("Prompt must not be empty".to_string()),
            }),
        );
    }

    log::info!(
        "[Backend] Editor received prompt ({} chars of context)",
        request.context.len()
    );
    state.record_editor_prompt(&request.prompt);

    (
        StatusCode::OK,
        Json(EditorPromptResponse {
            success: true,
            message: None,
        }),
    )
}
