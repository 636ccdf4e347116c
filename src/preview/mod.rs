//! Preview capture and analysis bridge
//!
//! A [`RenderTarget`] is whatever renders the page under development. Capture
//! is best-effort: the DOM snapshot and the screenshot can each fail on their
//! own, and a failure only leaves that half of the [`PreviewSnapshot`] empty.

mod analysis;
mod client;
mod types;

pub use analysis::{analyze_markup, HeuristicAnalyzer};
pub use client::{HttpAnalysisClient, ANALYZE_PREVIEW_PATH, EDITOR_PROMPT_PATH};
pub use types::*;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::path::{Path, PathBuf};

/// Something that can serialize its rendered structure and rasterize itself
pub trait RenderTarget: Send + Sync {
    /// Short name used in logs and as the analyzed file name
    fn name(&self) -> String;

    /// Serialized markup of the rendered document
    fn serialize_dom(&self) -> Result<String, String>;

    /// PNG-encoded screenshot
    fn rasterize(&self) -> Result<Vec<u8>, String>;
}

/// An HTML file on disk. Rasterization is unsupported.
#[derive(Debug, Clone)]
pub struct HtmlFileTarget {
    path: PathBuf,
}

impl HtmlFileTarget {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RenderTarget for HtmlFileTarget {
    fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    fn serialize_dom(&self) -> Result<String, String> {
        std::fs::read_to_string(&self.path)
            .map_err(|e| format!("Failed to read preview {:?}: {}", self.path, e))
    }

    fn rasterize(&self) -> Result<Vec<u8>, String> {
        Err("Screenshots are not available for file previews".to_string())
    }
}

/// Result of one capture
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreviewSnapshot {
    pub name: String,
    pub dom: Option<String>,
    pub screenshot_base64: Option<String>,
}

impl PreviewSnapshot {
    /// Capture both halves, logging and skipping whichever fails
    pub fn capture(target: &dyn RenderTarget) -> Self {
        let name = target.name();

        let dom = match target.serialize_dom() {
            Ok(dom) => Some(dom),
            Err(e) => {
                log::warn!("[Preview] DOM capture failed for {}: {}", name, e);
                None
            }
        };

        let screenshot_base64 = match target.rasterize() {
            Ok(png) => Some(BASE64.encode(png)),
            Err(e) => {
                log::debug!("[Preview] Screenshot capture failed for {}: {}", name, e);
                None
            }
        };

        Self {
            name,
            dom,
            screenshot_base64,
        }
    }

    /// Neither half was captured
    pub fn is_empty(&self) -> bool {
        self.dom.is_none() && self.screenshot_base64.is_none()
    }

    pub fn has_dom(&self) -> bool {
        self.dom.as_deref().map(|d| !d.trim().is_empty()).unwrap_or(false)
    }

    pub fn to_request(&self, goal: &str) -> AnalyzePreviewRequest {
        AnalyzePreviewRequest {
            html_content: None,
            dom_snapshot: self.dom.clone(),
            screenshot_base64: self.screenshot_base64.clone(),
            file_type: Some("html".to_string()),
            file_name: Some(self.name.clone()),
            analysis_goal: goal.to_string(),
        }
    }
}

/// Submits captured previews for analysis
#[async_trait]
pub trait PreviewAnalyzer: Send + Sync {
    async fn analyze_preview(
        &self,
        request: AnalyzePreviewRequest,
    ) -> Result<PreviewAnalysisResponse, String>;
}

/// Forwards instructions to the external editor integration
#[async_trait]
pub trait EditorBridge: Send + Sync {
    async fn forward_prompt(&self, prompt: &str, context: &str) -> Result<(), String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Canvas;

    impl RenderTarget for Canvas {
        fn name(&self) -> String {
            "canvas".to_string()
        }

        fn serialize_dom(&self) -> Result<String, String> {
            Err("cross-origin frame".to_string())
        }

        fn rasterize(&self) -> Result<Vec<u8>, String> {
            Ok(vec![0x89, b'P', b'N', b'G'])
        }
    }

    #[test]
    fn test_html_file_capture() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("index.html");
        std::fs::write(&path, "<html><body>hi</body></html>").unwrap();

        let snapshot = PreviewSnapshot::capture(&HtmlFileTarget::new(&path));
        assert_eq!(snapshot.name, "index.html");
        assert!(snapshot.has_dom());
        assert!(snapshot.screenshot_base64.is_none());

        let request = snapshot.to_request(GOAL_GENERAL);
        assert_eq!(request.file_name.as_deref(), Some("index.html"));
        assert_eq!(request.markup(), Some("<html><body>hi</body></html>"));
    }

    #[test]
    fn test_missing_file_yields_empty_snapshot() {
        let snapshot = PreviewSnapshot::capture(&HtmlFileTarget::new("/nonexistent/preview.html"));
        assert!(snapshot.is_empty());
        assert!(!snapshot.has_dom());
    }

    #[test]
    fn test_partial_capture_keeps_screenshot() {
        let snapshot = PreviewSnapshot::capture(&Canvas);
        assert!(snapshot.dom.is_none());
        assert_eq!(snapshot.screenshot_base64.as_deref(), Some("iVBORw=="));
        assert!(!snapshot.is_empty());
    }
}
