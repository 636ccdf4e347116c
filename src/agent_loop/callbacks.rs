// Observer callbacks for the improvement loop

use super::types::{AgentStatus, LogKind};
use crate::preview::PreviewAnalysisResponse;
use std::sync::Arc;

pub type StatusCallback = Arc<dyn Fn(AgentStatus) + Send + Sync>;
pub type LogCallback = Arc<dyn Fn(LogKind, &str) + Send + Sync>;
pub type FileUpdateCallback = Arc<dyn Fn(i64, &str) + Send + Sync>;
pub type TestsRunCallback = Arc<dyn Fn() + Send + Sync>;
pub type AnalysisCallback = Arc<dyn Fn(&PreviewAnalysisResponse) + Send + Sync>;

/// Set of observer callbacks. Registering a partial set replaces only the
/// callbacks it carries.
#[derive(Clone, Default)]
pub struct AgentCallbacks {
    pub on_status_change: Option<StatusCallback>,
    pub on_log: Option<LogCallback>,
    pub on_file_update: Option<FileUpdateCallback>,
    pub on_tests_run: Option<TestsRunCallback>,
    pub on_analysis_complete: Option<AnalysisCallback>,
}

impl AgentCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_status_change(mut self, f: impl Fn(AgentStatus) + Send + Sync + 'static) -> Self {
        self.on_status_change = Some(Arc::new(f));
        self
    }

    pub fn on_log(mut self, f: impl Fn(LogKind, &str) + Send + Sync + 'static) -> Self {
        self.on_log = Some(Arc::new(f));
        self
    }

    pub fn on_file_update(mut self, f: impl Fn(i64, &str) + Send + Sync + 'static) -> Self {
        self.on_file_update = Some(Arc::new(f));
        self
    }

    pub fn on_tests_run(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_tests_run = Some(Arc::new(f));
        self
    }

    pub fn on_analysis_complete(
        mut self,
        f: impl Fn(&PreviewAnalysisResponse) + Send + Sync + 'static,
    ) -> Self {
        self.on_analysis_complete = Some(Arc::new(f));
        self
    }

    /// Overwrite the callbacks present in `other`, keep the rest
    pub fn merge(&mut self, other: AgentCallbacks) {
        if other.on_status_change.is_some() {
            self.on_status_change = other.on_status_change;
        }
        if other.on_log.is_some() {
            self.on_log = other.on_log;
        }
        if other.on_file_update.is_some() {
            self.on_file_update = other.on_file_update;
        }
        if other.on_tests_run.is_some() {
            self.on_tests_run = other.on_tests_run;
        }
        if other.on_analysis_complete.is_some() {
            self.on_analysis_complete = other.on_analysis_complete;
        }
    }

    pub(crate) fn status(&self, status: AgentStatus) {
        log::info!("[AgentLoop] Status -> {}", status);
        if let Some(cb) = &self.on_status_change {
            cb(status);
        }
    }

    /// Write to the log facade and the `on_log` stream
    pub(crate) fn log(&self, kind: LogKind, message: &str) {
        match kind {
            LogKind::Info | LogKind::Success => log::info!("[AgentLoop] {}", message),
            LogKind::Warning => log::warn!("[AgentLoop] {}", message),
            LogKind::Error => log::error!("[AgentLoop] {}", message),
        }
        if let Some(cb) = &self.on_log {
            cb(kind, message);
        }
    }

    pub(crate) fn file_update(&self, file_id: i64, content: &str) {
        if let Some(cb) = &self.on_file_update {
            cb(file_id, content);
        }
    }

    pub(crate) fn tests_run(&self) {
        if let Some(cb) = &self.on_tests_run {
            cb();
        }
    }

    pub(crate) fn analysis_complete(&self, response: &PreviewAnalysisResponse) {
        if let Some(cb) = &self.on_analysis_complete {
            cb(response);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_merge_keeps_unset_callbacks() {
        let seen = Arc::new(Mutex::new(Vec::new()));

        let status_seen = seen.clone();
        let first_log = seen.clone();
        let mut callbacks = AgentCallbacks::new()
            .on_status_change(move |s| status_seen.lock().unwrap().push(format!("status:{}", s)))
            .on_log(move |_, m| first_log.lock().unwrap().push(format!("first:{}", m)));

        let second_log = seen.clone();
        callbacks.merge(
            AgentCallbacks::new().on_log(move |_, m| second_log.lock().unwrap().push(format!("second:{}", m))),
        );

        callbacks.status(AgentStatus::Running);
        callbacks.log(LogKind::Info, "hello");
        callbacks.tests_run();

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["status:running".to_string(), "second:hello".to_string()]
        );
    }
}
