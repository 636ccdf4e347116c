// Pluggable test and code-analysis steps run once per tick

use crate::remote::{RemoteClient, TestTarget};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

/// What a step achieved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    /// Added to the step's improvement counter
    pub improvements: u32,
    pub summary: String,
}

#[async_trait]
pub trait ImprovementStep: Send + Sync {
    fn name(&self) -> &str;

    /// An `Err` fails the whole tick and puts the loop into the error state
    async fn run(&self) -> Result<StepOutcome, String>;
}

/// Waits a fixed delay and always reports one improvement
pub struct PlaceholderStep {
    name: String,
    delay: Duration,
}

impl PlaceholderStep {
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
        }
    }
}

#[async_trait]
impl ImprovementStep for PlaceholderStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> Result<StepOutcome, String> {
        tokio::time::sleep(self.delay).await;
        Ok(StepOutcome {
            improvements: 1,
            summary: format!("{} finished", self.name),
        })
    }
}

/// Runs the tests for a set of files and counts the passing ones
pub struct RemoteTestStep {
    client: RemoteClient,
    file_ids: Vec<i64>,
}

impl RemoteTestStep {
    pub fn new(client: RemoteClient, file_ids: Vec<i64>) -> Self {
        Self { client, file_ids }
    }
}

#[async_trait]
impl ImprovementStep for RemoteTestStep {
    fn name(&self) -> &str {
        "tests"
    }

    async fn run(&self) -> Result<StepOutcome, String> {
        if self.file_ids.is_empty() {
            return Ok(StepOutcome {
                improvements: 0,
                summary: "No files to test".to_string(),
            });
        }

        let outcome = self
            .client
            .run_test(TestTarget::Files(self.file_ids.clone()))
            .await
            .map_err(|e| format!("Test run failed: {}", e))?;

        let total = outcome.results().len();
        let passed = outcome.passed_count();
        Ok(StepOutcome {
            improvements: passed as u32,
            summary: format!("{}/{} tests passed", passed, total),
        })
    }
}

/// Submits workspace files for analysis and counts those without severe issues
pub struct RemoteCodeAnalysisStep {
    client: RemoteClient,
    files: Vec<(i64, PathBuf)>,
}

impl RemoteCodeAnalysisStep {
    pub fn new(client: RemoteClient, files: Vec<(i64, PathBuf)>) -> Self {
        Self { client, files }
    }
}

#[async_trait]
impl ImprovementStep for RemoteCodeAnalysisStep {
    fn name(&self) -> &str {
        "code analysis"
    }

    async fn run(&self) -> Result<StepOutcome, String> {
        let mut clean = 0;
        let mut issues = 0;

        for (file_id, path) in &self.files {
            let content = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| format!("Failed to read {:?}: {}", path, e))?;

            let analysis = self
                .client
                .update_code(*file_id, &content)
                .await
                .map_err(|e| format!("Code analysis of file {} failed: {}", file_id, e))?;

            issues += analysis.issues.len();
            if !analysis.issues.iter().any(|i| i.is_severe()) {
                clean += 1;
            }
        }

        Ok(StepOutcome {
            improvements: clean,
            summary: format!(
                "{} of {} file(s) clean, {} issue(s) reported",
                clean,
                self.files.len(),
                issues
            ),
        })
    }
}
