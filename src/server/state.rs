//! Mock backend state shared across handlers

use super::backend::MockBackend;
use super::events::EventBroadcaster;
use crate::shutdown::ShutdownState;
use crate::utils::lock_mutex_recover;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct BackendState {
    /// Request handling for channel messages
    pub backend: Arc<MockBackend>,

    /// Push fan-out to WebSocket clients
    pub broadcaster: Arc<EventBroadcaster>,

    pub shutdown_state: ShutdownState,

    /// Prompts accepted by the mock editor endpoint
    pub editor_prompts: Arc<Mutex<Vec<String>>>,
}

impl BackendState {
    pub fn new(backend: MockBackend, shutdown_state: ShutdownState) -> Self {
        Self {
            backend: Arc::new(backend),
            broadcaster: Arc::new(EventBroadcaster::new()),
            shutdown_state,
            editor_prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn record_editor_prompt(&self, prompt: &str) {
        lock_mutex_recover(&self.editor_prompts).push(prompt.to_string());
    }

    pub fn editor_prompts(&self) -> Vec<String> {
        lock_mutex_recover(&self.editor_prompts).clone()
    }
}

impl Default for BackendState {
    fn default() -> Self {
        Self::new(MockBackend::default(), ShutdownState::default())
    }
}
