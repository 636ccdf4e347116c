// Graceful shutdown handling for signal trapping

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Shared shutdown state across the application
#[derive(Clone)]
pub struct ShutdownState {
    /// Flag indicating shutdown has been requested
    shutdown_requested: Arc<AtomicBool>,
    /// Flag indicating cleanup has completed
    cleanup_complete: Arc<AtomicBool>,
}

impl ShutdownState {
    pub fn new() -> Self {
        Self {
            shutdown_requested: Arc::new(AtomicBool::new(false)),
            cleanup_complete: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn request_shutdown(&self) {
        // Only log the first request; signals can arrive more than once
        if !self.shutdown_requested.swap(true, Ordering::SeqCst) {
            log::info!("[Shutdown] Shutdown requested");
        }
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    pub fn mark_cleanup_complete(&self) {
        self.cleanup_complete.store(true, Ordering::SeqCst);
        log::info!("[Shutdown] Cleanup complete");
    }

    pub fn is_cleanup_complete(&self) -> bool {
        self.cleanup_complete.load(Ordering::SeqCst)
    }

    /// Resolve once shutdown has been requested, checking every `poll`
    pub async fn wait_for_shutdown(&self, poll: Duration) {
        while !self.is_shutdown_requested() {
            tokio::time::sleep(poll).await;
        }
    }
}

impl Default for ShutdownState {
    fn default() -> Self {
        Self::new()
    }
}

/// What was torn down when the process stopped
#[derive(Debug, Clone, Default)]
pub struct ShutdownResult {
    /// Improvement iterations the loop finished before stopping
    pub iterations_completed: u32,
    /// Requests still awaiting a response when the channel closed
    pub requests_abandoned: usize,
    /// Outbound messages that were queued but never sent
    pub messages_dropped: usize,
    pub errors: Vec<String>,
}

impl ShutdownResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if shutdown was clean (no errors)
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Graceful shutdown handler
pub struct ShutdownHandler {
    state: ShutdownState,
}

impl ShutdownHandler {
    pub fn new() -> Self {
        Self {
            state: ShutdownState::new(),
        }
    }

    pub fn with_state(state: ShutdownState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &ShutdownState {
        &self.state
    }

    /// Run `cleanup_fn` once and log what it tore down
    pub async fn handle_shutdown<F, Fut>(&self, cleanup_fn: F) -> Result<ShutdownResult>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<ShutdownResult>>,
    {
        self.state.request_shutdown();
        log::info!("[Shutdown] Starting graceful shutdown...");

        let result = cleanup_fn().await?;

        log::info!(
            "[Shutdown] Complete: {} iteration(s) finished, {} request(s) abandoned, {} queued message(s) dropped",
            result.iterations_completed,
            result.requests_abandoned,
            result.messages_dropped
        );
        for error in &result.errors {
            log::warn!("[Shutdown] Cleanup error: {}", error);
        }

        self.state.mark_cleanup_complete();
        Ok(result)
    }
}

impl Default for ShutdownHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Register signal handlers for graceful shutdown
/// This sets up handlers for SIGINT (Ctrl+C), SIGTERM, and SIGHUP
#[cfg(unix)]
pub fn register_signal_handlers(state: ShutdownState) -> Result<()> {
    use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;
    use std::thread;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])
        .map_err(|e| anyhow::anyhow!("Failed to register signal handlers: {}", e))?;

    thread::spawn(move || {
        for signal in signals.forever() {
            let name = match signal {
                SIGINT => "SIGINT (Ctrl+C)",
                SIGTERM => "SIGTERM",
                SIGHUP => "SIGHUP",
                _ => continue,
            };
            log::info!("[Shutdown] Received {}", name);
            state.request_shutdown();
        }
    });

    log::debug!("[Shutdown] Signal handlers registered (SIGINT, SIGTERM, SIGHUP)");
    Ok(())
}

/// Register signal handlers for Windows
#[cfg(windows)]
pub fn register_signal_handlers(state: ShutdownState) -> Result<()> {
    ctrlc::set_handler(move || {
        log::info!("[Shutdown] Received Ctrl+C");
        state.request_shutdown();
    })
    .map_err(|e| anyhow::anyhow!("Failed to register Ctrl+C handler: {}", e))?;

    log::debug!("[Shutdown] Signal handler registered (Ctrl+C)");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shutdown_is_shared_between_clones() {
        let state = ShutdownState::new();
        let other = state.clone();
        assert!(!other.is_shutdown_requested());

        state.request_shutdown();
        state.request_shutdown();
        assert!(other.is_shutdown_requested());
        assert!(!other.is_cleanup_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_shutdown_resolves_after_request() {
        let state = ShutdownState::new();
        let waiter = {
            let state = state.clone();
            tokio::spawn(async move { state.wait_for_shutdown(Duration::from_millis(10)).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        state.request_shutdown();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_shutdown_result_is_clean() {
        let mut result = ShutdownResult::new();
        assert!(result.is_clean());

        result.errors.push("Failed to persist history".to_string());
        assert!(!result.is_clean());
    }

    #[tokio::test]
    async fn test_handle_shutdown_marks_cleanup_complete() {
        let handler = ShutdownHandler::new();

        let result = handler
            .handle_shutdown(|| async {
                Ok(ShutdownResult {
                    iterations_completed: 4,
                    requests_abandoned: 1,
                    messages_dropped: 2,
                    errors: vec![],
                })
            })
            .await
            .unwrap();

        assert_eq!(result.iterations_completed, 4);
        assert!(result.is_clean());
        assert!(handler.state().is_shutdown_requested());
        assert!(handler.state().is_cleanup_complete());
    }

    #[tokio::test]
    async fn test_handle_shutdown_propagates_cleanup_failure() {
        let handler = ShutdownHandler::with_state(ShutdownState::default());

        let result = handler
            .handle_shutdown(|| async { Err(anyhow::anyhow!("channel stuck")) })
            .await;

        assert!(result.is_err());
        assert!(!handler.state().is_cleanup_complete());
    }
}
