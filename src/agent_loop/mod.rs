//! Autonomous improvement loop
//!
//! A timed loop that, once per tick, analyzes the rendered preview, runs the
//! test step and runs the code-analysis step, then reports through callbacks.
//!
//! Status transitions:
//! - `start()`: any state but `Running` -> `Running`. Resets counters, runs one
//!   tick inline and arms the interval timer.
//! - `pause()`: `Running`/`Error` -> `Paused`. Cancels the timer, keeps counters.
//! - `stop()`: any state -> `Idle`. Cancels the timer, keeps counters.
//! - A failing tick moves `Running` to `Error`. The timer keeps firing, and a
//!   one-shot recovery flips `Error` back to `Running` after the recovery delay
//!   unless another transition happened first.
//! - A tick that finds `current_iteration >= max_iterations` pauses the loop
//!   instead of working.
//!
//! The timer only spawns tick tasks, so `pause()`/`stop()` never cancel a tick
//! that is already in flight. A tick that fires while the previous one is still
//! running is skipped with a warning.
//!
//! Every `start()` begins a new run generation. A tick still draining from an
//! earlier run neither blocks the new run's first tick nor writes counters or
//! errors into it.

mod callbacks;
mod steps;
mod types;

pub use callbacks::*;
pub use steps::*;
pub use types::*;

use crate::channel::InboundMessage;
use crate::events::FileUpdatePayload;
use crate::preview::{EditorBridge, PreviewAnalyzer, PreviewSnapshot, RenderTarget, GOAL_GENERAL};
use crate::remote::RemoteClient;
use crate::utils::lock_mutex_recover;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// External collaborators used by a tick. Missing steps fall back to
/// [`PlaceholderStep`]; a missing analyzer or editor skips that work.
#[derive(Clone, Default)]
pub struct AgentServices {
    pub analyzer: Option<Arc<dyn PreviewAnalyzer>>,
    pub editor: Option<Arc<dyn EditorBridge>>,
    pub test_step: Option<Arc<dyn ImprovementStep>>,
    pub code_step: Option<Arc<dyn ImprovementStep>>,
}

impl AgentServices {
    pub fn with_analyzer(mut self, analyzer: Arc<dyn PreviewAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    pub fn with_editor(mut self, editor: Arc<dyn EditorBridge>) -> Self {
        self.editor = Some(editor);
        self
    }

    pub fn with_test_step(mut self, step: Arc<dyn ImprovementStep>) -> Self {
        self.test_step = Some(step);
        self
    }

    pub fn with_code_step(mut self, step: Arc<dyn ImprovementStep>) -> Self {
        self.code_step = Some(step);
        self
    }

    /// Back the test and code-analysis steps with the remote client
    pub fn with_remote_steps(
        self,
        client: RemoteClient,
        test_file_ids: Vec<i64>,
        analysis_files: Vec<(i64, PathBuf)>,
    ) -> Self {
        self.with_test_step(Arc::new(RemoteTestStep::new(client.clone(), test_file_ids)))
            .with_code_step(Arc::new(RemoteCodeAnalysisStep::new(client, analysis_files)))
    }
}

struct LoopInner {
    state: AgentState,
    config: AgentLoopConfig,
    callbacks: AgentCallbacks,
    preview: Option<Arc<dyn RenderTarget>>,
    timer: Option<JoinHandle<()>>,
    recovery: Option<JoinHandle<()>>,
    /// Bumped on every status transition; a scheduled recovery only applies
    /// if nothing changed since it was armed.
    epoch: u64,
    /// Bumped by `start()`; writes from ticks of an older run are dropped
    generation: u64,
    /// Generation of the tick currently running, if any
    in_flight: Option<u64>,
}

impl LoopInner {
    fn transition(&mut self, status: AgentStatus) {
        self.state.status = status;
        self.epoch += 1;
    }

    fn cancel_timers(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        if let Some(recovery) = self.recovery.take() {
            recovery.abort();
        }
    }
}

struct LoopShared {
    inner: Mutex<LoopInner>,
    services: AgentServices,
}

/// Releases the in-flight slot when a tick ends, however it ends. A newer
/// run's tick may have taken the slot meanwhile; it is left alone.
struct TickGuard<'a> {
    shared: &'a LoopShared,
    generation: u64,
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        let mut inner = lock_mutex_recover(&self.shared.inner);
        if inner.in_flight == Some(self.generation) {
            inner.in_flight = None;
        }
    }
}

/// Handle to the improvement loop. Clones share the same loop.
#[derive(Clone)]
pub struct AgentLoop {
    shared: Arc<LoopShared>,
}

impl AgentLoop {
    pub fn new(config: AgentLoopConfig, services: AgentServices) -> Self {
        Self {
            shared: Arc::new(LoopShared {
                inner: Mutex::new(LoopInner {
                    state: AgentState::default(),
                    config,
                    callbacks: AgentCallbacks::default(),
                    preview: None,
                    timer: None,
                    recovery: None,
                    epoch: 0,
                    generation: 0,
                    in_flight: None,
                }),
                services,
            }),
        }
    }

    pub fn state(&self) -> AgentState {
        lock_mutex_recover(&self.shared.inner).state.clone()
    }

    pub fn status(&self) -> AgentStatus {
        lock_mutex_recover(&self.shared.inner).state.status
    }

    pub fn config(&self) -> AgentLoopConfig {
        lock_mutex_recover(&self.shared.inner).config.clone()
    }

    /// Register observers; only the callbacks present are replaced
    pub fn register_callbacks(&self, callbacks: AgentCallbacks) {
        lock_mutex_recover(&self.shared.inner).callbacks.merge(callbacks);
    }

    /// Set the render target captured by preview analysis
    pub fn set_preview_frame(&self, target: Arc<dyn RenderTarget>) {
        log::debug!("[AgentLoop] Preview frame set to {}", target.name());
        lock_mutex_recover(&self.shared.inner).preview = Some(target);
    }

    /// Replace the configuration. A running loop re-arms its timer when the
    /// interval changes.
    pub fn update_config(&self, config: AgentLoopConfig) {
        let mut inner = lock_mutex_recover(&self.shared.inner);
        let interval_changed = inner.config.interval != config.interval;
        inner.config = config;

        if interval_changed && inner.timer.is_some() {
            if let Some(timer) = inner.timer.take() {
                timer.abort();
            }
            let interval = inner.config.interval;
            inner.timer = Some(self.spawn_timer(interval));
            log::debug!("[AgentLoop] Interval changed to {:?}", interval);
        }
    }

    /// Forward file content pushed by the backend to the `on_file_update` observer
    pub fn notify_file_update(&self, file_id: i64, content: &str) {
        let callbacks = lock_mutex_recover(&self.shared.inner).callbacks.clone();
        log::debug!("[AgentLoop] File {} updated ({} bytes)", file_id, content.len());
        callbacks.file_update(file_id, content);
    }

    /// Forward every `fileUpdate` push from a channel subscription
    pub fn watch_file_updates(&self, mut updates: mpsc::UnboundedReceiver<InboundMessage>) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            while let Some(message) = updates.recv().await {
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                match message.push_payload::<FileUpdatePayload>() {
                    Ok(update) => AgentLoop { shared }.notify_file_update(update.file_id, &update.content),
                    Err(e) => log::warn!("[AgentLoop] Ignoring file update: {}", e),
                }
            }
        })
    }

    /// Start the loop: reset counters, arm the timer and run the first tick
    pub async fn start(&self) {
        let callbacks = {
            let mut inner = lock_mutex_recover(&self.shared.inner);
            if inner.state.status == AgentStatus::Running {
                let callbacks = inner.callbacks.clone();
                drop(inner);
                callbacks.log(LogKind::Warning, "Agent is already running");
                return;
            }

            inner.cancel_timers();
            inner.generation += 1;
            inner.state.current_iteration = 0;
            inner.state.improvements = Improvements::default();
            inner.state.last_error = None;
            inner.transition(AgentStatus::Running);

            let interval = inner.config.interval;
            inner.timer = Some(self.spawn_timer(interval));
            inner.callbacks.clone()
        };

        callbacks.status(AgentStatus::Running);
        callbacks.log(LogKind::Info, "Agent started");

        self.tick().await;
    }

    /// Pause a running (or errored) loop. Counters are kept.
    pub fn pause(&self) {
        let callbacks = {
            let mut inner = lock_mutex_recover(&self.shared.inner);
            if !matches!(inner.state.status, AgentStatus::Running | AgentStatus::Error) {
                return;
            }
            inner.cancel_timers();
            inner.transition(AgentStatus::Paused);
            inner.callbacks.clone()
        };

        callbacks.status(AgentStatus::Paused);
        callbacks.log(LogKind::Info, "Agent paused");
    }

    /// Stop the loop. Counters are kept until the next `start()`.
    pub fn stop(&self) {
        let callbacks = {
            let mut inner = lock_mutex_recover(&self.shared.inner);
            if inner.state.status == AgentStatus::Idle {
                return;
            }
            inner.cancel_timers();
            inner.transition(AgentStatus::Idle);
            inner.callbacks.clone()
        };

        callbacks.status(AgentStatus::Idle);
        callbacks.log(LogKind::Info, "Agent stopped");
    }

    fn spawn_timer(&self, period: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                let agent = AgentLoop { shared };
                tokio::spawn(async move { agent.tick().await });
            }
        })
    }

    fn spawn_recovery(&self, delay: Duration, epoch: u64) -> JoinHandle<()> {
        let weak: Weak<LoopShared> = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = weak.upgrade() {
                AgentLoop { shared }.recover(epoch);
            }
        })
    }

    fn recover(&self, epoch: u64) {
        let callbacks = {
            let mut inner = lock_mutex_recover(&self.shared.inner);
            if inner.epoch != epoch || inner.state.status != AgentStatus::Error {
                return;
            }
            inner.recovery = None;
            inner.state.last_error = None;
            inner.state.improvements.errors_fixed += 1;
            inner.transition(AgentStatus::Running);
            if inner.timer.is_none() {
                let interval = inner.config.interval;
                inner.timer = Some(self.spawn_timer(interval));
            }
            inner.callbacks.clone()
        };

        callbacks.status(AgentStatus::Running);
        callbacks.log(LogKind::Info, "Recovered from error, resuming");
    }

    fn enter_error(&self, generation: u64, message: String) {
        let (callbacks, entered) = {
            let mut inner = lock_mutex_recover(&self.shared.inner);
            if inner.generation != generation {
                log::debug!("[AgentLoop] Dropping failure from a previous run: {}", message);
                return;
            }
            inner.state.last_error = Some(message.clone());

            let entered = match inner.state.status {
                AgentStatus::Running => {
                    inner.transition(AgentStatus::Error);
                    let (delay, epoch) = (inner.config.error_recovery_delay, inner.epoch);
                    inner.recovery = Some(self.spawn_recovery(delay, epoch));
                    true
                }
                // Already errored: the pending recovery stays in charge.
                // Paused or stopped while the tick was in flight: keep that status.
                AgentStatus::Error | AgentStatus::Paused | AgentStatus::Idle => false,
            };
            (inner.callbacks.clone(), entered)
        };

        callbacks.log(LogKind::Error, &format!("Iteration failed: {}", message));
        if entered {
            callbacks.status(AgentStatus::Error);
        }
    }

    /// One iteration of work
    async fn tick(&self) {
        let generation = {
            let mut inner = lock_mutex_recover(&self.shared.inner);
            let generation = inner.generation;
            if inner.in_flight == Some(generation) {
                let callbacks = inner.callbacks.clone();
                drop(inner);
                callbacks.log(
                    LogKind::Warning,
                    "Previous iteration still running, skipping this tick",
                );
                return;
            }
            inner.in_flight = Some(generation);
            generation
        };
        let _guard = TickGuard {
            shared: &self.shared,
            generation,
        };

        let (callbacks, config, preview, iteration, at_ceiling) = {
            let mut inner = lock_mutex_recover(&self.shared.inner);
            if inner.generation != generation
                || matches!(inner.state.status, AgentStatus::Idle | AgentStatus::Paused)
            {
                return;
            }

            let at_ceiling = inner.state.current_iteration >= inner.config.max_iterations;
            if !at_ceiling {
                inner.state.current_iteration += 1;
                inner.state.last_run = Some(Utc::now());
            }
            (
                inner.callbacks.clone(),
                inner.config.clone(),
                inner.preview.clone(),
                inner.state.current_iteration,
                at_ceiling,
            )
        };

        if at_ceiling {
            callbacks.log(
                LogKind::Info,
                &format!("Reached maximum of {} iterations", config.max_iterations),
            );
            self.pause();
            return;
        }

        callbacks.log(
            LogKind::Info,
            &format!("Starting iteration {}/{}", iteration, config.max_iterations),
        );

        match self.run_steps(generation, &callbacks, &config, preview).await {
            Ok(()) => callbacks.log(LogKind::Success, &format!("Iteration {} complete", iteration)),
            Err(e) => self.enter_error(generation, e),
        }
    }

    async fn run_steps(
        &self,
        generation: u64,
        callbacks: &AgentCallbacks,
        config: &AgentLoopConfig,
        preview: Option<Arc<dyn RenderTarget>>,
    ) -> Result<(), String> {
        let services = &self.shared.services;

        if config.preview_analysis {
            self.analyze_preview(generation, callbacks, preview).await?;
        }

        if config.test_execution {
            callbacks.log(LogKind::Info, "Running tests");
            callbacks.tests_run();
            let step: Arc<dyn ImprovementStep> = match services.test_step.clone() {
                Some(step) => step,
                None => Arc::new(PlaceholderStep::new("tests", config.step_delay)),
            };
            let outcome = step.run().await?;
            self.bump(generation, |i| i.tests_fixed += outcome.improvements);
            callbacks.log(LogKind::Info, &outcome.summary);
        }

        if config.code_analysis {
            callbacks.log(LogKind::Info, "Analyzing code");
            let step: Arc<dyn ImprovementStep> = match services.code_step.clone() {
                Some(step) => step,
                None => Arc::new(PlaceholderStep::new("code analysis", config.step_delay)),
            };
            let outcome = step.run().await?;
            self.bump(generation, |i| i.code_improvements += outcome.improvements);
            callbacks.log(LogKind::Info, &outcome.summary);
        }

        Ok(())
    }

    async fn analyze_preview(
        &self,
        generation: u64,
        callbacks: &AgentCallbacks,
        preview: Option<Arc<dyn RenderTarget>>,
    ) -> Result<(), String> {
        let services = &self.shared.services;

        let Some(target) = preview else {
            callbacks.log(LogKind::Warning, "No preview frame set, skipping preview analysis");
            return Ok(());
        };
        let Some(analyzer) = services.analyzer.clone() else {
            callbacks.log(LogKind::Warning, "No preview analyzer configured, skipping preview analysis");
            return Ok(());
        };

        let snapshot = PreviewSnapshot::capture(target.as_ref());
        if snapshot.is_empty() {
            callbacks.log(LogKind::Warning, "Preview capture failed, skipping preview analysis");
            return Ok(());
        }

        callbacks.log(LogKind::Info, "Analyzing preview");
        let response = analyzer
            .analyze_preview(snapshot.to_request(GOAL_GENERAL))
            .await
            .map_err(|e| format!("Preview analysis failed: {}", e))?;
        callbacks.analysis_complete(&response);
        callbacks.log(LogKind::Info, &response.analysis.summary);

        let Some(prompt) = response.cursor_prompt.as_deref().filter(|p| !p.is_empty()) else {
            return Ok(());
        };
        let Some(dom) = snapshot.dom.as_deref().filter(|_| snapshot.has_dom()) else {
            return Ok(());
        };
        let Some(editor) = services.editor.clone() else {
            log::debug!("[AgentLoop] No editor bridge configured, not forwarding prompt");
            return Ok(());
        };

        match editor.forward_prompt(prompt, dom).await {
            Ok(()) => {
                self.bump(generation, |i| i.ui_improvements += 1);
                callbacks.log(LogKind::Success, "Forwarded UI fix to the editor");
            }
            Err(e) => callbacks.log(LogKind::Warning, &format!("Failed to forward UI fix: {}", e)),
        }
        Ok(())
    }

    fn bump(&self, generation: u64, f: impl FnOnce(&mut Improvements)) {
        let mut inner = lock_mutex_recover(&self.shared.inner);
        if inner.generation == generation {
            f(&mut inner.state.improvements);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preview::{HeuristicAnalyzer, PreviewAnalysisResponse};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::sleep;

    fn fast_config(interval_ms: u64, max_iterations: u32) -> AgentLoopConfig {
        AgentLoopConfig {
            interval: Duration::from_millis(interval_ms),
            max_iterations,
            step_delay: Duration::from_millis(10),
            preview_analysis: false,
            ..AgentLoopConfig::default()
        }
    }

    /// Fails the first `failures` runs, then reports one improvement
    struct FlakyStep {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyStep {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl ImprovementStep for FlakyStep {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn run(&self) -> Result<StepOutcome, String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err("tests exploded".to_string());
            }
            Ok(StepOutcome {
                improvements: 1,
                summary: "ok".to_string(),
            })
        }
    }

    struct StaticPage(&'static str);

    impl RenderTarget for StaticPage {
        fn name(&self) -> String {
            "page.html".to_string()
        }

        fn serialize_dom(&self) -> Result<String, String> {
            Ok(self.0.to_string())
        }

        fn rasterize(&self) -> Result<Vec<u8>, String> {
            Err("no renderer".to_string())
        }
    }

    #[derive(Default)]
    struct RecordingEditor {
        prompts: Mutex<Vec<String>>,
        reject: bool,
    }

    #[async_trait]
    impl EditorBridge for RecordingEditor {
        async fn forward_prompt(&self, prompt: &str, _context: &str) -> Result<(), String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if self.reject {
                Err("editor offline".to_string())
            } else {
                Ok(())
            }
        }
    }

    fn collect_logs(agent: &AgentLoop) -> Arc<Mutex<Vec<(LogKind, String)>>> {
        let logs = Arc::new(Mutex::new(Vec::new()));
        let sink = logs.clone();
        agent.register_callbacks(
            AgentCallbacks::new().on_log(move |kind, message| sink.lock().unwrap().push((kind, message.to_string()))),
        );
        logs
    }

    #[tokio::test(start_paused = true)]
    async fn test_pauses_at_ceiling_within_interval_budget() {
        let agent = AgentLoop::new(fast_config(100, 2), AgentServices::default());
        let begin = Instant::now();

        agent.start().await;
        tokio::time::sleep_until(begin + Duration::from_millis(250)).await;

        let state = agent.state();
        assert_eq!(state.status, AgentStatus::Paused);
        assert_eq!(state.current_iteration, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_exactly_max_iterations_unattended() {
        let agent = AgentLoop::new(fast_config(50, 3), AgentServices::default());
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let sink = statuses.clone();
        agent.register_callbacks(AgentCallbacks::new().on_status_change(move |s| sink.lock().unwrap().push(s)));

        agent.start().await;
        sleep(Duration::from_secs(2)).await;

        let state = agent.state();
        assert_eq!(state.status, AgentStatus::Paused);
        assert_eq!(state.current_iteration, 3);
        assert_eq!(state.improvements.tests_fixed, 3);
        assert_eq!(state.improvements.code_improvements, 3);
        assert!(state.last_run.is_some());
        assert_eq!(
            *statuses.lock().unwrap(),
            vec![AgentStatus::Running, AgentStatus::Paused]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_auto_recovers() {
        let services = AgentServices::default().with_test_step(FlakyStep::new(1));
        let agent = AgentLoop::new(fast_config(10_000, 100), services);

        agent.start().await;
        let state = agent.state();
        assert_eq!(state.status, AgentStatus::Error);
        assert_eq!(state.last_error.as_deref(), Some("tests exploded"));

        sleep(Duration::from_secs(29)).await;
        assert_eq!(agent.status(), AgentStatus::Error);

        sleep(Duration::from_secs(2)).await;
        let state = agent.state();
        assert_eq!(state.status, AgentStatus::Running);
        assert!(state.last_error.is_none());
        assert_eq!(state.improvements.errors_fixed, 1);
        // Ticks kept firing while errored
        assert!(state.current_iteration >= 3);
        agent.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_errors_do_not_reschedule_recovery() {
        let services = AgentServices::default().with_test_step(FlakyStep::new(2));
        let agent = AgentLoop::new(fast_config(20_000, 100), services);

        agent.start().await;
        assert_eq!(agent.status(), AgentStatus::Error);

        // Second failure at t=20s must not push recovery past t=30s
        sleep(Duration::from_secs(31)).await;
        let state = agent.state();
        assert_eq!(state.status, AgentStatus::Running);
        assert_eq!(state.improvements.errors_fixed, 1);
        agent.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_cancels_pending_recovery() {
        let services = AgentServices::default().with_test_step(FlakyStep::new(1));
        let agent = AgentLoop::new(fast_config(10_000, 100), services);

        agent.start().await;
        assert_eq!(agent.status(), AgentStatus::Error);

        sleep(Duration::from_secs(5)).await;
        agent.pause();
        sleep(Duration::from_secs(60)).await;

        let state = agent.state();
        assert_eq!(state.status, AgentStatus::Paused);
        assert_eq!(state.improvements.errors_fixed, 0);
        assert_eq!(state.current_iteration, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_resets_counters() {
        let agent = AgentLoop::new(fast_config(50, 2), AgentServices::default());

        agent.start().await;
        sleep(Duration::from_secs(1)).await;
        assert_eq!(agent.status(), AgentStatus::Paused);
        assert_eq!(agent.state().improvements.tests_fixed, 2);

        agent.start().await;
        let state = agent.state();
        assert_eq!(state.status, AgentStatus::Running);
        assert_eq!(state.current_iteration, 1);
        assert_eq!(state.improvements.tests_fixed, 1);
        assert_eq!(state.improvements.code_improvements, 1);
        agent.stop();
    }

    /// Fails its first run after the delay, then succeeds after the delay
    struct SlowFirstFailureStep {
        delay: Duration,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ImprovementStep for SlowFirstFailureStep {
        fn name(&self) -> &str {
            "slow"
        }

        async fn run(&self) -> Result<StepOutcome, String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            sleep(self.delay).await;
            if call == 0 {
                return Err("stale run failed".to_string());
            }
            Ok(StepOutcome {
                improvements: 1,
                summary: "ok".to_string(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_during_in_flight_tick_isolates_runs() {
        let step = Arc::new(SlowFirstFailureStep {
            delay: Duration::from_secs(1),
            calls: AtomicU32::new(0),
        });
        let services = AgentServices::default().with_test_step(step.clone());
        let agent = AgentLoop::new(fast_config(60_000, 10), services);
        let logs = collect_logs(&agent);

        let first_run = {
            let agent = agent.clone();
            tokio::spawn(async move { agent.start().await })
        };
        sleep(Duration::from_millis(500)).await;
        agent.pause();

        // The new run ticks immediately even though the old tick is still in flight
        agent.start().await;
        first_run.await.unwrap();

        let state = agent.state();
        assert_eq!(step.calls.load(Ordering::SeqCst), 2);
        assert_eq!(state.status, AgentStatus::Running);
        assert_eq!(state.current_iteration, 1);
        assert_eq!(state.improvements.tests_fixed, 1);
        assert_eq!(state.improvements.code_improvements, 1);
        assert!(state.last_error.is_none());
        assert!(!logs
            .lock()
            .unwrap()
            .iter()
            .any(|(_, m)| m.contains("still running") || m.contains("stale run failed")));

        // Counters stay put once the old tick has drained
        sleep(Duration::from_secs(5)).await;
        let later = agent.state();
        assert_eq!(later.current_iteration, 1);
        assert_eq!(later.improvements, state.improvements);
        agent.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_keeps_counters_and_halts_ticks() {
        let agent = AgentLoop::new(fast_config(50, 10), AgentServices::default());

        agent.start().await;
        sleep(Duration::from_millis(120)).await;
        agent.stop();
        let stopped = agent.state();
        assert_eq!(stopped.status, AgentStatus::Idle);
        assert!(stopped.current_iteration >= 2);

        sleep(Duration::from_secs(1)).await;
        let later = agent.state();
        assert_eq!(later.current_iteration, stopped.current_iteration);
        assert_eq!(later.improvements, stopped.improvements);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_while_running_is_ignored() {
        let agent = AgentLoop::new(fast_config(50, 10), AgentServices::default());
        let logs = collect_logs(&agent);

        agent.start().await;
        sleep(Duration::from_millis(60)).await;
        let before = agent.state().current_iteration;
        agent.start().await;

        assert_eq!(agent.state().current_iteration, before);
        assert!(logs
            .lock()
            .unwrap()
            .iter()
            .any(|(kind, m)| *kind == LogKind::Warning && m.contains("already running")));
        agent.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_tick_is_skipped() {
        let config = AgentLoopConfig {
            step_delay: Duration::from_millis(500),
            ..fast_config(300, 10)
        };
        let agent = AgentLoop::new(config, AgentServices::default());
        let logs = collect_logs(&agent);

        // The first tick takes 1s; every timer tick during it is skipped
        agent.start().await;
        assert_eq!(agent.state().current_iteration, 1);
        assert!(logs
            .lock()
            .unwrap()
            .iter()
            .any(|(kind, m)| *kind == LogKind::Warning && m.contains("still running")));
        agent.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_preview_fix_forwarded_to_editor() {
        let editor = Arc::new(RecordingEditor::default());
        let services = AgentServices::default()
            .with_analyzer(Arc::new(HeuristicAnalyzer))
            .with_editor(editor.clone());
        let config = AgentLoopConfig {
            preview_analysis: true,
            test_execution: false,
            code_analysis: false,
            ..fast_config(1000, 1)
        };
        let agent = AgentLoop::new(config, services);
        agent.set_preview_frame(Arc::new(StaticPage("<html><body><img src=\"x.png\"></body></html>")));

        let analyses = Arc::new(Mutex::new(Vec::<PreviewAnalysisResponse>::new()));
        let sink = analyses.clone();
        agent.register_callbacks(
            AgentCallbacks::new().on_analysis_complete(move |r| sink.lock().unwrap().push(r.clone())),
        );

        agent.start().await;

        let state = agent.state();
        assert_eq!(state.improvements.ui_improvements, 1);
        assert_eq!(state.status, AgentStatus::Running);
        assert_eq!(analyses.lock().unwrap().len(), 1);
        let prompts = editor.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("page.html"));
        drop(prompts);
        agent.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_editor_failure_is_not_fatal() {
        let editor = Arc::new(RecordingEditor {
            reject: true,
            ..Default::default()
        });
        let services = AgentServices::default()
            .with_analyzer(Arc::new(HeuristicAnalyzer))
            .with_editor(editor);
        let config = AgentLoopConfig {
            preview_analysis: true,
            ..fast_config(1000, 1)
        };
        let agent = AgentLoop::new(config, services);
        agent.set_preview_frame(Arc::new(StaticPage("<body><img src=\"x.png\"></body>")));
        let logs = collect_logs(&agent);

        agent.start().await;

        let state = agent.state();
        assert_eq!(state.status, AgentStatus::Running);
        assert_eq!(state.improvements.ui_improvements, 0);
        assert_eq!(state.improvements.tests_fixed, 1);
        assert!(logs
            .lock()
            .unwrap()
            .iter()
            .any(|(kind, m)| *kind == LogKind::Warning && m.contains("editor offline")));
        agent.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_preview_is_skipped() {
        let services = AgentServices::default().with_analyzer(Arc::new(HeuristicAnalyzer));
        let config = AgentLoopConfig {
            preview_analysis: true,
            ..fast_config(1000, 1)
        };
        let agent = AgentLoop::new(config, services);

        agent.start().await;

        let state = agent.state();
        assert_eq!(state.status, AgentStatus::Running);
        assert_eq!(state.improvements.ui_improvements, 0);
        assert_eq!(state.improvements.code_improvements, 1);
        agent.stop();
    }

    #[tokio::test]
    async fn test_file_updates_are_forwarded() {
        let agent = AgentLoop::new(fast_config(1000, 1), AgentServices::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        agent.register_callbacks(AgentCallbacks::new().on_file_update(move |id, content| {
            let _ = tx.send((id, content.to_string()));
        }));

        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let watcher = agent.watch_file_updates(push_rx);
        push_tx
            .send(
                InboundMessage::push(
                    crate::events::MSG_FILE_UPDATE,
                    &FileUpdatePayload {
                        file_id: 5,
                        content: "new body".to_string(),
                    },
                )
                .unwrap(),
            )
            .unwrap();

        assert_eq!(rx.recv().await, Some((5, "new body".to_string())));
        drop(push_tx);
        watcher.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_config_changes_interval() {
        let agent = AgentLoop::new(fast_config(10_000, 100), AgentServices::default());
        agent.start().await;
        assert_eq!(agent.state().current_iteration, 1);

        agent.update_config(fast_config(100, 100));
        sleep(Duration::from_millis(350)).await;

        assert!(agent.state().current_iteration >= 3);
        agent.stop();
    }
}
