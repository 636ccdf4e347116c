// Wire message types and payload structures for the backend message channel
// Every frame is a JSON text message with a `type` discriminator

use serde::{Deserialize, Serialize};

// Outbound message types (client -> backend)
pub const MSG_CURSOR_PROMPT: &str = "cursorPrompt";
pub const MSG_UPDATE_CODE: &str = "updateCode";
pub const MSG_RUN_TEST: &str = "runTest";

// Inbound message types (backend -> client)
pub const MSG_CURSOR_RESPONSE: &str = "cursorResponse";
pub const MSG_CODE_ANALYSIS: &str = "codeAnalysis";
pub const MSG_TEST_RESULT: &str = "testResult";
pub const MSG_ERROR: &str = "error";

// Connection acknowledgement sent by the backend on open
pub const MSG_CONNECTED: &str = "connected";

// Unsolicited push notification for file content changes
pub const MSG_FILE_UPDATE: &str = "fileUpdate";

/// Payload for instruction submission
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorPromptPayload {
    pub prompt: String,
    pub file_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_content: Option<String>,
}

/// Payload for code update submission
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCodePayload {
    pub file_id: i64,
    pub content: String,
}

/// Payload for test execution. Exactly one of the fields is set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTestPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_ids: Option<Vec<i64>>,
}

/// Payload for file update push notifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUpdatePayload {
    pub file_id: i64,
    pub content: String,
}

/// New content for a file proposed by the editor integration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChanges {
    pub file_id: i64,
    pub new_content: String,
}

/// Result of submitting an instruction against a file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructionResponse {
    pub response: String,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub code_snippet: String,
    #[serde(default)]
    pub detailed_analysis: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_changes: Option<FileChanges>,
}

/// A single issue reported by code analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeIssue {
    pub title: String,
    pub description: String,
    /// "low", "medium", "high" or "critical"
    pub severity: String,
}

impl CodeIssue {
    /// Whether this issue should block an improvement from counting
    pub fn is_severe(&self) -> bool {
        matches!(self.severity.to_lowercase().as_str(), "high" | "critical")
    }
}

/// Result of submitting a code update for analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeAnalysis {
    pub file_id: i64,
    #[serde(default)]
    pub issues: Vec<CodeIssue>,
}

/// Outcome of a single test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
}

/// One assertion inside a test run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestAssertion {
    pub name: String,
    pub status: TestStatus,
}

/// Detailed metrics for a test run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestDetails {
    /// Coverage percentage (0-100)
    pub coverage: f64,
    #[serde(rename = "executionTime")]
    pub execution_time_ms: u64,
    #[serde(default)]
    pub assertions: Vec<TestAssertion>,
}

/// Result record for one test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub test_id: i64,
    pub status: TestStatus,
    pub result: String,
    pub details: TestDetails,
}

/// Response to a test run: one record for a single test, a list for a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TestRunOutcome {
    Single(TestResult),
    Batch(Vec<TestResult>),
}

impl TestRunOutcome {
    /// All results as a slice-friendly list
    pub fn results(&self) -> Vec<&TestResult> {
        match self {
            TestRunOutcome::Single(result) => vec![result],
            TestRunOutcome::Batch(results) => results.iter().collect(),
        }
    }

    pub fn passed_count(&self) -> usize {
        self.results()
            .iter()
            .filter(|r| r.status == TestStatus::Passed)
            .count()
    }
}
