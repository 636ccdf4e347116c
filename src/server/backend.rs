//! Mock coding backend
//!
//! Answers channel requests the way the real editor integration would, with
//! heuristic code analysis and simulated test runs.

use crate::channel::{ChannelError, InboundMessage, OutboundMessage};
use crate::events::{
    CodeAnalysis, CodeIssue, CursorPromptPayload, FileChanges, FileUpdatePayload,
    InstructionResponse, RunTestPayload, TestAssertion, TestDetails, TestResult, TestRunOutcome,
    TestStatus, UpdateCodePayload, MSG_CODE_ANALYSIS, MSG_CURSOR_PROMPT, MSG_CURSOR_RESPONSE,
    MSG_FILE_UPDATE, MSG_RUN_TEST, MSG_TEST_RESULT, MSG_UPDATE_CODE,
};
use rand::Rng;
use regex::Regex;
use std::sync::OnceLock;

/// Lines longer than this are reported
const MAX_LINE_LEN: usize = 120;

static DEBUG_PATTERN: OnceLock<Regex> = OnceLock::new();
static MARKER_PATTERN: OnceLock<Regex> = OnceLock::new();
static VAR_PATTERN: OnceLock<Regex> = OnceLock::new();
static EVAL_PATTERN: OnceLock<Regex> = OnceLock::new();

fn get_debug_pattern() -> &'static Regex {
    DEBUG_PATTERN
        .get_or_init(|| Regex::new(r"\b(console\.(log|debug)|println!|dbg!|print)\s*\(").unwrap())
}

fn get_marker_pattern() -> &'static Regex {
    MARKER_PATTERN.get_or_init(|| Regex::new(r"\b(TODO|FIXME|XXX)\b").unwrap())
}

fn get_var_pattern() -> &'static Regex {
    VAR_PATTERN.get_or_init(|| Regex::new(r"^\s*var\s+[A-Za-z_$]").unwrap())
}

fn get_eval_pattern() -> &'static Regex {
    EVAL_PATTERN.get_or_init(|| Regex::new(r"\beval\s*\(").unwrap())
}

/// Report heuristic issues in a source file, in line order
pub fn analyze_code(content: &str) -> Vec<CodeIssue> {
    let mut issues = Vec::new();

    for (index, line) in content.lines().enumerate() {
        let line_no = index + 1;

        if get_eval_pattern().is_match(line) {
            issues.push(CodeIssue {
                title: "Use of eval".to_string(),
                description: format!("Line {} evaluates dynamic code", line_no),
                severity: "high".to_string(),
            });
        }
        if get_debug_pattern().is_match(line) {
            issues.push(CodeIssue {
                title: "Debug statement".to_string(),
                description: format!("Line {} contains a leftover debug statement", line_no),
                severity: "low".to_string(),
            });
        }
        if let Some(marker) = get_marker_pattern().find(line) {
            issues.push(CodeIssue {
                title: "Unresolved marker".to_string(),
                description: format!("Line {} has a {} marker", line_no, marker.as_str()),
                severity: "low".to_string(),
            });
        }
        if get_var_pattern().is_match(line) {
            issues.push(CodeIssue {
                title: "var declaration".to_string(),
                description: format!("Line {} uses var; prefer let or const", line_no),
                severity: "medium".to_string(),
            });
        }
        if line.chars().count() > MAX_LINE_LEN {
            issues.push(CodeIssue {
                title: "Long line".to_string(),
                description: format!("Line {} is longer than {} characters", line_no, MAX_LINE_LEN),
                severity: "low".to_string(),
            });
        }
    }

    issues
}

/// What the backend sends back for one inbound frame
#[derive(Debug, Clone, PartialEq)]
pub struct BackendReply {
    /// Correlated response for the sender
    pub response: InboundMessage,
    /// Notification for every connected client
    pub broadcast: Option<InboundMessage>,
}

/// Simulated backend handling channel requests
#[derive(Debug, Clone)]
pub struct MockBackend {
    /// Probability (0.0 - 1.0) that a simulated test fails
    failure_rate: f64,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self { failure_rate: 0.1 }
    }

    pub fn with_failure_rate(mut self, failure_rate: f64) -> Self {
        self.failure_rate = failure_rate.clamp(0.0, 1.0);
        self
    }

    /// Handle one text frame from a client
    pub fn handle_frame(&self, text: &str) -> BackendReply {
        let request: OutboundMessage = match serde_json::from_str(text) {
            Ok(request) => request,
            Err(e) => {
                log::warn!("[Backend] Invalid message: {}", e);
                return BackendReply {
                    response: InboundMessage::error(None, format!("Invalid message: {}", e)),
                    broadcast: None,
                };
            }
        };

        let request_id = request.request_id.clone();
        log::debug!("[Backend] Handling '{}' ({:?})", request.kind, request_id);

        let result = match request.kind.as_str() {
            MSG_CURSOR_PROMPT => self.cursor_prompt(&request),
            MSG_UPDATE_CODE => self.update_code(&request),
            MSG_RUN_TEST => self.run_test(&request),
            other => {
                return BackendReply {
                    response: InboundMessage::error(
                        request_id,
                        format!("Unknown message type: {}", other),
                    ),
                    broadcast: None,
                }
            }
        };

        match result {
            Ok(reply) => reply,
            Err((kind, e)) => BackendReply {
                response: InboundMessage::failure(kind, request_id, e),
                broadcast: None,
            },
        }
    }

    fn cursor_prompt(&self, request: &OutboundMessage) -> Result<BackendReply, (&'static str, String)> {
        let fail = |e: ChannelError| (MSG_CURSOR_RESPONSE, e.to_string());
        let payload: CursorPromptPayload = request.payload_as().map_err(fail)?;

        if payload.prompt.trim().is_empty() {
            return Err((MSG_CURSOR_RESPONSE, "Prompt must not be empty".to_string()));
        }

        let content = payload.file_content.unwrap_or_default();
        let issues = analyze_code(&content);
        let snippet = format!("// {}\n", payload.prompt.trim());
        let file_changes = (!content.is_empty()).then(|| FileChanges {
            file_id: payload.file_id,
            new_content: format!("{}{}", snippet, content),
        });

        let response = InstructionResponse {
            response: format!(
                "Applied \"{}\" to file {}",
                payload.prompt.trim(),
                payload.file_id
            ),
            suggestions: issues
                .iter()
                .map(|i| format!("{}: {}", i.title, i.description))
                .collect(),
            code_snippet: snippet,
            detailed_analysis: format!("{} issue(s) found in the current file content", issues.len()),
            file_changes,
        };

        let broadcast = match &response.file_changes {
            Some(changes) => Some(
                InboundMessage::push(
                    MSG_FILE_UPDATE,
                    &FileUpdatePayload {
                        file_id: changes.file_id,
                        content: changes.new_content.clone(),
                    },
                )
                .map_err(fail)?,
            ),
            None => None,
        };

        Ok(BackendReply {
            response: InboundMessage::success(MSG_CURSOR_RESPONSE, request.request_id.clone(), &response)
                .map_err(fail)?,
            broadcast,
        })
    }

    fn update_code(&self, request: &OutboundMessage) -> Result<BackendReply, (&'static str, String)> {
        let fail = |e: ChannelError| (MSG_CODE_ANALYSIS, e.to_string());
        let payload: UpdateCodePayload = request.payload_as().map_err(fail)?;

        let analysis = CodeAnalysis {
            file_id: payload.file_id,
            issues: analyze_code(&payload.content),
        };

        Ok(BackendReply {
            response: InboundMessage::success(MSG_CODE_ANALYSIS, request.request_id.clone(), &analysis)
                .map_err(fail)?,
            broadcast: None,
        })
    }

    fn run_test(&self, request: &OutboundMessage) -> Result<BackendReply, (&'static str, String)> {
        let fail = |e: ChannelError| (MSG_TEST_RESULT, e.to_string());
        let payload: RunTestPayload = request.payload_as().map_err(fail)?;

        let outcome = match (payload.test_id, payload.file_ids) {
            (Some(test_id), _) => TestRunOutcome::Single(self.simulate_test(test_id)),
            (None, Some(file_ids)) => TestRunOutcome::Batch(
                file_ids
                    .iter()
                    .map(|file_id| self.simulate_test(file_id * 100 + 1))
                    .collect(),
            ),
            (None, None) => {
                return Err((MSG_TEST_RESULT, "runTest requires testId or fileIds".to_string()))
            }
        };

        Ok(BackendReply {
            response: InboundMessage::success(MSG_TEST_RESULT, request.request_id.clone(), &outcome)
                .map_err(fail)?,
            broadcast: None,
        })
    }

    fn simulate_test(&self, test_id: i64) -> TestResult {
        let mut rng = rand::thread_rng();
        let passed = !rng.gen_bool(self.failure_rate);
        let coverage = (rng.gen_range(70.0..=100.0_f64) * 10.0).round() / 10.0;
        let execution_time_ms = rng.gen_range(10..=500);

        let assertions = (1..=rng.gen_range(1..=3))
            .map(|n| TestAssertion {
                name: format!("assertion {}", n),
                status: if passed || n > 1 {
                    TestStatus::Passed
                } else {
                    TestStatus::Failed
                },
            })
            .collect();

        let status = if passed {
            TestStatus::Passed
        } else {
            TestStatus::Failed
        };
        TestResult {
            test_id,
            status,
            result: if passed {
                "All assertions passed".to_string()
            } else {
                "Assertion 1 failed".to_string()
            },
            details: TestDetails {
                coverage,
                execution_time_ms,
                assertions,
            },
        }
    }
}
