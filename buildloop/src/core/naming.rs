//! Deterministic names for branches and workspace directories.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

static BRANCH_UNSAFE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_-]+").expect("branch regex is valid"));
static NON_ALNUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9]+").expect("alnum regex is valid"));

/// Timestamp format used in branch names (`2006-01-02T15-04-05Z` style).
pub const BRANCH_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%SZ";

/// Branch for one model's run, e.g. `openrouter-openai-gpt-5-mini-2026-10-14T09-30-00Z`.
pub fn branch_name(model: &str, now: DateTime<Utc>) -> String {
    let model = sanitize_model(model);
    format!("{model}-{}", now.format(BRANCH_TIMESTAMP_FORMAT))
}

/// Model identifier with every run of characters git dislikes collapsed to `-`.
pub fn sanitize_model(model: &str) -> String {
    let collapsed = BRANCH_UNSAFE.replace_all(model, "-");
    let trimmed = collapsed.trim_matches('-');
    if trimmed.is_empty() {
        "model".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Temp-directory prefix derived from the repository URL.
pub fn workspace_prefix(repo_url: &str) -> String {
    let collapsed = NON_ALNUM.replace_all(repo_url, "-");
    format!("{}-", collapsed.trim_matches('-'))
}
