//! Typed operations over the message channel
//!
//! Each call sends one request and resolves with the first correlated
//! response, a backend-reported error, or a timeout.

use crate::channel::{ChannelError, InboundMessage, MessageChannel};
use crate::events::{
    CodeAnalysis, CursorPromptPayload, InstructionResponse, RunTestPayload, TestRunOutcome,
    UpdateCodePayload, MSG_CODE_ANALYSIS, MSG_CURSOR_PROMPT, MSG_CURSOR_RESPONSE, MSG_FILE_UPDATE,
    MSG_RUN_TEST, MSG_TEST_RESULT, MSG_UPDATE_CODE,
};
use crate::learning::{LearningStore, PromptResult};
use crate::utils::truncate_chars;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Length of the response excerpt kept in prompt history
const RESPONSE_SNIPPET_CHARS: usize = 200;

/// What a test run covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestTarget {
    /// One test by id
    Single(i64),
    /// Every test associated with these files
    Files(Vec<i64>),
}

impl TestTarget {
    fn payload(&self) -> RunTestPayload {
        match self {
            TestTarget::Single(test_id) => RunTestPayload {
                test_id: Some(*test_id),
                file_ids: None,
            },
            TestTarget::Files(file_ids) => RunTestPayload {
                test_id: None,
                file_ids: Some(file_ids.clone()),
            },
        }
    }
}

/// Client for instruction, code-update and test operations
#[derive(Clone)]
pub struct RemoteClient {
    channel: MessageChannel,
    learning: Arc<LearningStore>,
}

impl RemoteClient {
    pub fn new(channel: MessageChannel, learning: Arc<LearningStore>) -> Self {
        Self { channel, learning }
    }

    pub fn channel(&self) -> &MessageChannel {
        &self.channel
    }

    pub fn learning(&self) -> &Arc<LearningStore> {
        &self.learning
    }

    /// Send a request and decode the response data
    pub async fn call<P, R>(&self, kind: &str, expected: &str, payload: &P) -> Result<R, ChannelError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let data = self.channel.request(kind, expected, payload).await?;
        serde_json::from_value(data)
            .map_err(|e| ChannelError::Protocol(format!("Unexpected '{}' data: {}", expected, e)))
    }

    /// Submit a natural-language instruction against a file.
    ///
    /// The prompt is recorded before sending, so it stays in history even when
    /// the call fails. The outcome is recorded afterwards either way.
    pub async fn submit_instruction(
        &self,
        prompt: &str,
        file_id: i64,
        file_content: Option<&str>,
    ) -> Result<InstructionResponse, ChannelError> {
        let prompt_id = self
            .learning
            .record_prompt(prompt, Some(file_id), file_content, None);

        let payload = CursorPromptPayload {
            prompt: prompt.to_string(),
            file_id,
            file_content: file_content.map(|c| c.to_string()),
        };
        let outcome: Result<InstructionResponse, ChannelError> =
            self.call(MSG_CURSOR_PROMPT, MSG_CURSOR_RESPONSE, &payload).await;

        match &outcome {
            Ok(response) => {
                let generated = (!response.code_snippet.is_empty()).then(|| response.code_snippet.clone());
                self.learning.record_outcome(
                    &prompt_id,
                    prompt,
                    PromptResult::success(
                        truncate_chars(&response.response, RESPONSE_SNIPPET_CHARS),
                        generated,
                    ),
                );
                self.learning
                    .record_success(prompt, file_content.unwrap_or_default());
            }
            Err(e) => {
                log::warn!("[Remote] Instruction for file {} failed: {}", file_id, e);
                self.learning
                    .record_outcome(&prompt_id, prompt, PromptResult::failure(e.to_string()));
            }
        }

        outcome
    }

    /// Submit new file content for analysis
    pub async fn update_code(&self, file_id: i64, content: &str) -> Result<CodeAnalysis, ChannelError> {
        let payload = UpdateCodePayload {
            file_id,
            content: content.to_string(),
        };
        self.call(MSG_UPDATE_CODE, MSG_CODE_ANALYSIS, &payload).await
    }

    /// Run one test or every test for a set of files
    pub async fn run_test(&self, target: TestTarget) -> Result<TestRunOutcome, ChannelError> {
        self.call(MSG_RUN_TEST, MSG_TEST_RESULT, &target.payload()).await
    }

    /// Stream of `fileUpdate` push notifications
    pub fn file_updates(&self) -> mpsc::UnboundedReceiver<InboundMessage> {
        self.channel.subscribe(MSG_FILE_UPDATE)
    }
}
