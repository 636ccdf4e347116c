// Keyword extraction and suggestion templates

use crate::utils::truncate_chars;

/// Maximum keywords taken from a single prompt
pub const MAX_KEYWORDS: usize = 5;

/// Length of the normalized context key
pub const CONTEXT_KEY_CHARS: usize = 100;

/// Tokens of this length or shorter are never keywords
const MIN_KEYWORD_LEN: usize = 3;

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "if", "then", "else", "in", "on", "at", "to", "for",
    "of", "with", "by", "from", "into", "onto", "about", "this", "that", "these", "those", "is",
    "are", "was", "were", "be", "been", "being", "it", "its", "as", "so", "can", "could",
    "should", "would", "will", "shall", "may", "might", "must", "there", "their", "them", "they",
    "what", "which", "when", "where", "while", "have", "has", "had", "does", "did", "some",
    "also", "just", "very", "than", "your", "you",
];

fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.contains(&token)
}

/// Extract up to five keywords: lowercase, whitespace split, stop words and
/// short tokens removed. Repeated tokens are kept and count once each.
pub fn extract_keywords(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split_whitespace()
        .filter(|token| token.chars().count() > MIN_KEYWORD_LEN && !is_stop_word(token))
        .take(MAX_KEYWORDS)
        .map(str::to_string)
        .collect()
}

/// Normalize a file context into a bounded map key
pub fn context_key(context: &str) -> String {
    let collapsed = context.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&collapsed.to_lowercase(), CONTEXT_KEY_CHARS)
}

/// What the user is trying to do, guessed from free text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Fix,
    Implement,
    Optimize,
    Explain,
    General,
}

impl Intent {
    pub fn detect(intent: &str) -> Self {
        let intent = intent.to_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| intent.contains(w));

        if has(&["fix", "debug"]) {
            Intent::Fix
        } else if has(&["implement", "create"]) {
            Intent::Implement
        } else if has(&["optimize", "improve"]) {
            Intent::Optimize
        } else if has(&["explain"]) {
            Intent::Explain
        } else {
            Intent::General
        }
    }
}

/// Fill the two suggestion templates for an intent
pub fn render_suggestions(intent: Intent, context: &str, keywords: &[String]) -> Vec<String> {
    let ctx = {
        let trimmed = truncate_chars(context.trim(), 50);
        if trimmed.is_empty() {
            "this code".to_string()
        } else {
            trimmed
        }
    };
    let kw = if keywords.is_empty() {
        "the most relevant parts".to_string()
    } else {
        keywords.join(", ")
    };

    match intent {
        Intent::Fix => vec![
            format!("Find the root cause of the problem in {} and fix it, focusing on {}", ctx, kw),
            format!("Add error handling around {} and explain what was wrong", kw),
        ],
        Intent::Implement => vec![
            format!("Implement {} step by step, reusing what worked before: {}", ctx, kw),
            format!("Create a minimal working version first, then extend it with {}", kw),
        ],
        Intent::Optimize => vec![
            format!("Optimize {} for readability and performance, paying attention to {}", ctx, kw),
            format!("Remove duplicated logic and measure the effect on {}", kw),
        ],
        Intent::Explain => vec![
            format!("Explain how {} works, section by section", ctx),
            format!("Summarize the purpose of {} and how it relates to {}", ctx, kw),
        ],
        Intent::General => vec![
            format!("Describe the change you want in {} precisely, mentioning {}", ctx, kw),
            format!("Split the task into smaller prompts, starting with {}", kw),
        ],
    }
}
