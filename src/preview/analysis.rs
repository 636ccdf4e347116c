// Heuristic markup analysis used when no model-backed analyzer is available

use super::types::{
    AnalyzePreviewRequest, PreviewAnalysis, PreviewAnalysisResponse, PreviewIssue,
    PreviewSuggestion,
};
use super::PreviewAnalyzer;
use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;

static IMG_TAG_PATTERN: OnceLock<Regex> = OnceLock::new();
static ALT_ATTR_PATTERN: OnceLock<Regex> = OnceLock::new();
static TITLE_PATTERN: OnceLock<Regex> = OnceLock::new();
static INLINE_STYLE_PATTERN: OnceLock<Regex> = OnceLock::new();
static VIEWPORT_PATTERN: OnceLock<Regex> = OnceLock::new();

fn get_img_tag_pattern() -> &'static Regex {
    IMG_TAG_PATTERN.get_or_init(|| Regex::new(r"(?is)<img\b[^>]*>").unwrap())
}

fn get_alt_attr_pattern() -> &'static Regex {
    ALT_ATTR_PATTERN.get_or_init(|| Regex::new(r"(?i)\balt\s*=").unwrap())
}

fn get_title_pattern() -> &'static Regex {
    TITLE_PATTERN.get_or_init(|| Regex::new(r"(?is)<title[^>]*>\s*[^<\s][^<]*</title>").unwrap())
}

fn get_inline_style_pattern() -> &'static Regex {
    INLINE_STYLE_PATTERN.get_or_init(|| Regex::new(r#"(?i)\sstyle\s*=\s*["']"#).unwrap())
}

fn get_viewport_pattern() -> &'static Regex {
    VIEWPORT_PATTERN
        .get_or_init(|| Regex::new(r#"(?i)<meta\b[^>]*name\s*=\s*["']viewport["']"#).unwrap())
}

/// Inspect markup for common accessibility and layout problems
pub fn analyze_markup(request: &AnalyzePreviewRequest) -> PreviewAnalysisResponse {
    let Some(markup) = request.markup() else {
        return PreviewAnalysisResponse {
            analysis: PreviewAnalysis {
                summary: "No markup was provided for analysis".to_string(),
                ..Default::default()
            },
            cursor_prompt: None,
        };
    };

    let mut issues = Vec::new();
    let mut suggestions = Vec::new();

    let missing_alt = get_img_tag_pattern()
        .find_iter(markup)
        .filter(|tag| !get_alt_attr_pattern().is_match(tag.as_str()))
        .count();
    if missing_alt > 0 {
        issues.push(PreviewIssue {
            kind: "accessibility".to_string(),
            description: format!("{} image(s) are missing alt text", missing_alt),
            severity: "medium".to_string(),
            code_location: Some("<img>".to_string()),
        });
        suggestions.push(PreviewSuggestion {
            description: "Describe every image with an alt attribute".to_string(),
            priority: "high".to_string(),
            code_snippet: Some(r#"<img src="..." alt="Describe the image">"#.to_string()),
        });
    }

    if !get_title_pattern().is_match(markup) {
        issues.push(PreviewIssue {
            kind: "seo".to_string(),
            description: "The document has no title".to_string(),
            severity: "low".to_string(),
            code_location: Some("<head>".to_string()),
        });
        suggestions.push(PreviewSuggestion {
            description: "Add a descriptive <title> to the document head".to_string(),
            priority: "medium".to_string(),
            code_snippet: Some("<title>Page title</title>".to_string()),
        });
    }

    let inline_styles = get_inline_style_pattern().find_iter(markup).count();
    if inline_styles > 0 {
        issues.push(PreviewIssue {
            kind: "maintainability".to_string(),
            description: format!("{} element(s) use inline styles", inline_styles),
            severity: "low".to_string(),
            code_location: None,
        });
        suggestions.push(PreviewSuggestion {
            description: "Move inline styles into a stylesheet class".to_string(),
            priority: "low".to_string(),
            code_snippet: None,
        });
    }

    if !get_viewport_pattern().is_match(markup) {
        issues.push(PreviewIssue {
            kind: "responsive".to_string(),
            description: "No viewport meta tag; the layout will not scale on mobile".to_string(),
            severity: "medium".to_string(),
            code_location: Some("<head>".to_string()),
        });
        suggestions.push(PreviewSuggestion {
            description: "Declare a responsive viewport".to_string(),
            priority: "medium".to_string(),
            code_snippet: Some(
                r#"<meta name="viewport" content="width=device-width, initial-scale=1">"#
                    .to_string(),
            ),
        });
    }

    let summary = if issues.is_empty() {
        "No issues found in the preview".to_string()
    } else {
        format!("Found {} issue(s) in the preview", issues.len())
    };

    let cursor_prompt = (!issues.is_empty()).then(|| {
        let target = request.file_name.as_deref().unwrap_or("the previewed page");
        let details: Vec<&str> = issues.iter().map(|i| i.description.as_str()).collect();
        format!("Fix the following issues in {}: {}", target, details.join("; "))
    });

    PreviewAnalysisResponse {
        analysis: PreviewAnalysis {
            summary,
            issues,
            suggestions,
        },
        cursor_prompt,
    }
}

/// Offline analyzer backed by [`analyze_markup`]
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicAnalyzer;

#[async_trait]
impl PreviewAnalyzer for HeuristicAnalyzer {
    async fn analyze_preview(
        &self,
        request: AnalyzePreviewRequest,
    ) -> Result<PreviewAnalysisResponse, String> {
        Ok(analyze_markup(&request))
    }
}
