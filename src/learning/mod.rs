//! Learning and prompt history store
//!
//! Records every submitted instruction and its outcome, counts keywords of
//! successful prompts, and keeps explicit user feedback. Everything is a
//! heuristic cache: public methods never fail, persistence errors are logged
//! and the in-memory state keeps working.
//!
//! Files (under the store's data directory):
//! - `prompt_history.json` - last N history entries, oldest first
//! - `prompt_patterns.json` - keyword -> success count
//! - `contextual_success.json` - normalized context prefix -> success count
//! - `user_feedback.json` - prompt id -> {positive, negative}

mod keywords;
mod types;

pub use keywords::{context_key, extract_keywords, Intent, MAX_KEYWORDS};
pub use types::{FeedbackCounts, PromptHistoryItem, PromptResult};

use crate::config::LearningSettings;
use crate::file_storage::{read_json_opt, write_json};
use crate::utils::{generate_id, lock_mutex_recover};
use chrono::Utc;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const HISTORY_FILE: &str = "prompt_history.json";
const PATTERNS_FILE: &str = "prompt_patterns.json";
const CONTEXT_FILE: &str = "contextual_success.json";
const FEEDBACK_FILE: &str = "user_feedback.json";

/// How many similar prompts are returned
const SIMILAR_LIMIT: usize = 3;

#[derive(Default)]
struct LearningState {
    history: VecDeque<PromptHistoryItem>,
    prompt_patterns: BTreeMap<String, u64>,
    contextual_success: BTreeMap<String, u64>,
    user_feedback: BTreeMap<String, FeedbackCounts>,
}

/// Which blobs a mutation touched
#[derive(Clone, Copy)]
enum Blob {
    History,
    Patterns,
    Feedback,
    All,
}

pub struct LearningStore {
    data_dir: Option<PathBuf>,
    history_limit: usize,
    append_on_update: bool,
    state: Mutex<LearningState>,
}

impl LearningStore {
    /// Open the store described by the settings, loading any saved state
    pub fn open(settings: &LearningSettings) -> Self {
        Self::with_dir(
            settings.resolved_data_dir(),
            settings.history_limit,
            settings.append_on_update,
        )
    }

    /// Open a store persisted under `data_dir`
    pub fn with_dir(data_dir: impl Into<PathBuf>, history_limit: usize, append_on_update: bool) -> Self {
        let data_dir = data_dir.into();
        let state = load_state(&data_dir, history_limit);
        log::debug!(
            "[Learning] Loaded {} history entries and {} keywords from {:?}",
            state.history.len(),
            state.prompt_patterns.len(),
            data_dir
        );

        Self {
            data_dir: Some(data_dir),
            history_limit: history_limit.max(1),
            append_on_update,
            state: Mutex::new(state),
        }
    }

    /// A store that never touches disk
    pub fn in_memory(history_limit: usize, append_on_update: bool) -> Self {
        Self {
            data_dir: None,
            history_limit: history_limit.max(1),
            append_on_update,
            state: Mutex::new(LearningState::default()),
        }
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    pub fn append_on_update(&self) -> bool {
        self.append_on_update
    }

    /// Append a history entry and return its id
    pub fn record_prompt(
        &self,
        prompt: &str,
        file_id: Option<i64>,
        file_context: Option<&str>,
        result: Option<PromptResult>,
    ) -> String {
        let item = PromptHistoryItem {
            id: generate_id(),
            prompt: prompt.to_string(),
            timestamp: Utc::now(),
            file_id,
            file_context: file_context.map(|c| c.to_string()),
            result,
        };
        let id = item.id.clone();

        let mut state = lock_mutex_recover(&self.state);
        self.push_history(&mut state, item);
        self.persist(&state, Blob::History);
        id
    }

    /// Record how an earlier prompt resolved.
    ///
    /// Appends a second entry by default. With `append_on_update` off the
    /// original entry is updated in place, falling back to an append when it
    /// has already been evicted.
    pub fn record_outcome(&self, prompt_id: &str, prompt: &str, result: PromptResult) {
        let mut state = lock_mutex_recover(&self.state);

        let original = state.history.iter().position(|item| item.id == prompt_id);
        let (file_id, file_context) = original
            .and_then(|i| state.history.get(i))
            .map(|item| (item.file_id, item.file_context.clone()))
            .unwrap_or((None, None));

        match original {
            Some(index) if !self.append_on_update => {
                if let Some(item) = state.history.get_mut(index) {
                    item.result = Some(result);
                    item.timestamp = Utc::now();
                }
            }
            _ => {
                let item = PromptHistoryItem {
                    id: generate_id(),
                    prompt: prompt.to_string(),
                    timestamp: Utc::now(),
                    file_id,
                    file_context,
                    result: Some(result),
                };
                self.push_history(&mut state, item);
            }
        }

        self.persist(&state, Blob::History);
    }

    /// Count the keywords of a successful prompt and its context prefix
    pub fn record_success(&self, prompt: &str, file_context: &str) {
        let keywords = extract_keywords(prompt);
        let mut state = lock_mutex_recover(&self.state);

        for keyword in keywords {
            *state.prompt_patterns.entry(keyword).or_insert(0) += 1;
        }
        *state
            .contextual_success
            .entry(context_key(file_context))
            .or_insert(0) += 1;

        self.persist(&state, Blob::Patterns);
    }

    pub fn record_feedback(&self, prompt_id: &str, is_positive: bool) {
        let mut state = lock_mutex_recover(&self.state);
        let counts = state.user_feedback.entry(prompt_id.to_string()).or_default();
        if is_positive {
            counts.positive += 1;
        } else {
            counts.negative += 1;
        }
        self.persist(&state, Blob::Feedback);
    }

    /// Two suggestion strings picked by intent, filled with the most common
    /// success keywords
    pub fn get_suggestions(&self, context: &str, intent: &str) -> Vec<String> {
        let keywords = self.top_keywords(MAX_KEYWORDS);
        keywords::render_suggestions(Intent::detect(intent), context, &keywords)
    }

    /// The most recent successful prompts sharing a keyword with `prompt`,
    /// oldest first
    pub fn get_similar_successful_prompts(&self, prompt: &str) -> Vec<PromptHistoryItem> {
        let keywords = extract_keywords(prompt);
        if keywords.is_empty() {
            return Vec::new();
        }

        let state = lock_mutex_recover(&self.state);
        let mut matches: Vec<PromptHistoryItem> = state
            .history
            .iter()
            .rev()
            .filter(|item| item.succeeded())
            .filter(|item| {
                let text = item.prompt.to_lowercase();
                keywords.iter().any(|k| text.contains(k.as_str()))
            })
            .take(SIMILAR_LIMIT)
            .cloned()
            .collect();
        matches.reverse();
        matches
    }

    /// History entries, oldest first
    pub fn history(&self) -> Vec<PromptHistoryItem> {
        lock_mutex_recover(&self.state).history.iter().cloned().collect()
    }

    pub fn keyword_counts(&self) -> BTreeMap<String, u64> {
        lock_mutex_recover(&self.state).prompt_patterns.clone()
    }

    pub fn context_counts(&self) -> BTreeMap<String, u64> {
        lock_mutex_recover(&self.state).contextual_success.clone()
    }

    pub fn feedback_for(&self, prompt_id: &str) -> Option<FeedbackCounts> {
        lock_mutex_recover(&self.state)
            .user_feedback
            .get(prompt_id)
            .copied()
    }

    /// Most frequent success keywords, ties broken alphabetically
    pub fn top_keywords(&self, n: usize) -> Vec<String> {
        let state = lock_mutex_recover(&self.state);
        let mut counts: Vec<(&String, &u64)> = state.prompt_patterns.iter().collect();
        counts.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        counts.into_iter().take(n).map(|(k, _)| k.clone()).collect()
    }

    /// Forget everything and persist the empty state
    pub fn clear(&self) {
        let mut state = lock_mutex_recover(&self.state);
        *state = LearningState::default();
        self.persist(&state, Blob::All);
        log::info!("[Learning] Cleared learning data");
    }

    fn push_history(&self, state: &mut LearningState, item: PromptHistoryItem) {
        state.history.push_back(item);
        while state.history.len() > self.history_limit {
            state.history.pop_front();
        }
    }

    fn persist(&self, state: &LearningState, blob: Blob) {
        let Some(dir) = &self.data_dir else {
            return;
        };

        let mut results = Vec::new();
        if matches!(blob, Blob::History | Blob::All) {
            results.push(write_json(&dir.join(HISTORY_FILE), &state.history));
        }
        if matches!(blob, Blob::Patterns | Blob::All) {
            results.push(write_json(&dir.join(PATTERNS_FILE), &state.prompt_patterns));
            results.push(write_json(&dir.join(CONTEXT_FILE), &state.contextual_success));
        }
        if matches!(blob, Blob::Feedback | Blob::All) {
            results.push(write_json(&dir.join(FEEDBACK_FILE), &state.user_feedback));
        }

        for result in results {
            if let Err(e) = result {
                log::error!("[Learning] Failed to persist learning data: {}", e);
            }
        }
    }
}

fn load_blob<T: DeserializeOwned + Default>(dir: &Path, name: &str) -> T {
    match read_json_opt(&dir.join(name)) {
        Ok(Some(value)) => value,
        Ok(None) => T::default(),
        Err(e) => {
            log::warn!("[Learning] Ignoring unreadable {}: {}", name, e);
            T::default()
        }
    }
}

fn load_state(dir: &Path, history_limit: usize) -> LearningState {
    let mut history: VecDeque<PromptHistoryItem> = load_blob(dir, HISTORY_FILE);
    while history.len() > history_limit.max(1) {
        history.pop_front();
    }

    LearningState {
        history,
        prompt_patterns: load_blob(dir, PATTERNS_FILE),
        contextual_success: load_blob(dir, CONTEXT_FILE),
        user_feedback: load_blob(dir, FEEDBACK_FILE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_history_ring_buffer_keeps_most_recent() {
        let store = LearningStore::in_memory(50, true);
        for i in 0..120 {
            store.record_prompt(&format!("prompt {}", i), None, None, None);
            assert!(store.history().len() <= 50);
        }

        let history = store.history();
        assert_eq!(history.len(), 50);
        assert_eq!(history.first().unwrap().prompt, "prompt 70");
        assert_eq!(history.last().unwrap().prompt, "prompt 119");
    }

    #[test]
    fn test_record_success_counts_keywords() {
        let store = LearningStore::in_memory(50, true);
        store.record_success("Please fix the login bug quickly", "some context");

        let counts = store.keyword_counts();
        let keys: Vec<&str> = counts.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["login", "please", "quickly"]);
        assert!(counts.values().all(|&c| c == 1));
        assert_eq!(store.context_counts().get("some context"), Some(&1));
    }

    #[test]
    fn test_repeated_keyword_counts_each_occurrence() {
        let store = LearningStore::in_memory(50, true);
        store.record_success("render render layout", "");

        let counts = store.keyword_counts();
        assert_eq!(counts.get("render"), Some(&2));
        assert_eq!(counts.get("layout"), Some(&1));
    }

    #[test]
    fn test_record_outcome_append_mode() {
        let store = LearningStore::in_memory(50, true);
        let id = store.record_prompt("Add tests", Some(3), Some("fn main() {}"), None);
        store.record_outcome(&id, "Add tests", PromptResult::success("done", None));

        let history = store.history();
        assert_eq!(history.len(), 2);
        assert!(history[0].result.is_none());
        assert_eq!(history[1].prompt, "Add tests");
        assert_eq!(history[1].file_id, Some(3));
        assert!(history[1].succeeded());
        assert_ne!(history[0].id, history[1].id);
    }

    #[test]
    fn test_record_outcome_update_in_place() {
        let store = LearningStore::in_memory(50, false);
        let id = store.record_prompt("Add tests", Some(3), None, None);
        store.record_outcome(&id, "Add tests", PromptResult::failure("timed out"));

        let history = store.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, id);
        assert_eq!(history[0].result.as_ref().unwrap().response_snippet, "timed out");
    }

    #[test]
    fn test_record_outcome_update_after_eviction_appends() {
        let store = LearningStore::in_memory(2, false);
        let id = store.record_prompt("first", None, None, None);
        store.record_prompt("second", None, None, None);
        store.record_prompt("third", None, None, None);
        store.record_outcome(&id, "first", PromptResult::success("ok", None));

        let history = store.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].prompt, "first");
        assert!(history[1].succeeded());
    }

    #[test]
    fn test_feedback_counts() {
        let store = LearningStore::in_memory(50, true);
        store.record_feedback("p1", true);
        store.record_feedback("p1", true);
        store.record_feedback("p1", false);

        assert_eq!(
            store.feedback_for("p1"),
            Some(FeedbackCounts {
                positive: 2,
                negative: 1
            })
        );
        assert!(store.feedback_for("p2").is_none());
    }

    #[test]
    fn test_similar_successful_prompts() {
        let store = LearningStore::in_memory(50, true);
        store.record_prompt("style the header", None, None, Some(PromptResult::success("ok", None)));
        store.record_prompt("header spacing", None, None, Some(PromptResult::failure("no")));
        for i in 0..4 {
            store.record_prompt(
                &format!("header variant {}", i),
                None,
                None,
                Some(PromptResult::success("ok", None)),
            );
        }

        let similar = store.get_similar_successful_prompts("Fix the HEADER layout");
        let prompts: Vec<&str> = similar.iter().map(|i| i.prompt.as_str()).collect();
        assert_eq!(prompts, vec!["header variant 1", "header variant 2", "header variant 3"]);

        assert!(store.get_similar_successful_prompts("a b c").is_empty());
    }

    #[test]
    fn test_suggestions_use_top_keywords() {
        let store = LearningStore::in_memory(50, true);
        store.record_success("refactor navigation", "");
        store.record_success("refactor sidebar", "");

        let suggestions = store.get_suggestions("main.js", "please debug this");
        assert_eq!(suggestions.len(), 2);
        assert!(suggestions[0].contains("main.js"));
        assert!(suggestions[0].contains("refactor, navigation, sidebar"));
    }

    #[test]
    fn test_persistence_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("learning");

        let id = {
            let store = LearningStore::with_dir(&dir, 50, true);
            let id = store.record_prompt("Refactor login form", Some(1), Some("<form>"), None);
            store.record_success("Refactor login form", "<form>");
            store.record_feedback(&id, true);
            id
        };

        assert!(dir.join(HISTORY_FILE).exists());
        assert!(dir.join(PATTERNS_FILE).exists());
        assert!(dir.join(CONTEXT_FILE).exists());
        assert!(dir.join(FEEDBACK_FILE).exists());

        let reopened = LearningStore::with_dir(&dir, 50, true);
        let history = reopened.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, id);
        assert_eq!(history[0].file_context.as_deref(), Some("<form>"));
        assert_eq!(reopened.keyword_counts().get("login"), Some(&1));
        assert_eq!(reopened.feedback_for(&id).unwrap().positive, 1);
    }

    #[test]
    fn test_corrupt_file_is_ignored() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join(HISTORY_FILE), "{oops").unwrap();

        let store = LearningStore::with_dir(temp_dir.path(), 50, true);
        assert!(store.history().is_empty());
        store.record_prompt("still works", None, None, None);
        assert_eq!(store.history().len(), 1);
    }

    #[test]
    fn test_unwritable_dir_keeps_memory_state() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        std::fs::write(&blocker, "file, not a dir").unwrap();

        let store = LearningStore::with_dir(blocker.join("learning"), 50, true);
        store.record_prompt("kept in memory", None, None, None);
        assert_eq!(store.history().len(), 1);
    }

    #[test]
    fn test_clear() {
        let temp_dir = TempDir::new().unwrap();
        let store = LearningStore::with_dir(temp_dir.path(), 50, true);
        store.record_prompt("one", None, None, None);
        store.record_success("something useful", "ctx");
        store.clear();

        assert!(store.history().is_empty());
        assert!(store.keyword_counts().is_empty());
        let reopened = LearningStore::with_dir(temp_dir.path(), 50, true);
        assert!(reopened.history().is_empty());
    }
}
