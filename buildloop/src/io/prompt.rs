//! Natural-language instruction handed to the assistant for one patch attempt.

use anyhow::Result;
use minijinja::{Environment, context};
use tracing::debug;

const PATCH_TEMPLATE: &str = include_str!("prompts/patch.md");

/// Everything the patch prompt mentions.
#[derive(Debug, Clone)]
pub struct PromptInputs<'a> {
    pub build_tool: &'a str,
    /// Subcommand that produced `diagnostics`.
    pub subcommand: &'a str,
    pub target: &'a str,
    pub descriptor: &'a str,
    pub context_file: &'a str,
    pub diagnostics: &'a str,
    pub attempt: u32,
    pub max_attempts: u32,
}

/// Renders the patch prompt, keeping diagnostics within a byte budget.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn render(&self, input: &PromptInputs<'_>) -> Result<String> {
        let mut env = Environment::new();
        env.add_template("patch", PATCH_TEMPLATE)?;
        let diagnostics = keep_tail(input.diagnostics.trim(), self.budget_bytes);
        let rendered = env.get_template("patch")?.render(context! {
            build_tool => input.build_tool,
            subcommand => input.subcommand,
            target => input.target,
            descriptor => input.descriptor,
            context_file => input.context_file,
            diagnostics => diagnostics,
            attempt => input.attempt,
            max_attempts => input.max_attempts,
        })?;
        Ok(rendered)
    }
}

/// Keep the last `budget` bytes of `text`; build tools print the actionable
/// error at the end.
fn keep_tail(text: &str, budget: usize) -> String {
    if text.len() <= budget {
        return text.to_string();
    }
    let mut start = text.len() - budget;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    debug!(
        bytes_dropped = start,
        budget, "truncated diagnostics for prompt budget"
    );
    format!("[... {start} bytes of earlier output omitted]\n{}", &text[start..])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs<'a>(diagnostics: &'a str, attempt: u32) -> PromptInputs<'a> {
        PromptInputs {
            build_tool: "bazel",
            subcommand: "build",
            target: "//crates/cli:grep_cli",
            descriptor: "crates/cli/BUILD.bazel",
            context_file: "MODULE.bazel",
            diagnostics,
            attempt,
            max_attempts: 3,
        }
    }

    #[test]
    fn prompt_names_target_descriptor_and_diagnostics() {
        let prompt = PromptBuilder::new(10_000)
            .render(&inputs("ERROR: no such package 'crates/cli'", 1))
            .expect("render");
        assert!(prompt.contains("migrate this repo to build with bazel"));
        assert!(prompt.contains("`//crates/cli:grep_cli` target"));
        assert!(prompt.contains("minimal changes to `crates/cli/BUILD.bazel`"));
        assert!(prompt.contains("You may read `MODULE.bazel`"));
        assert!(prompt.contains("latest `bazel build //crates/cli:grep_cli`"));
        assert!(prompt.ends_with("ERROR: no such package 'crates/cli'"));
        assert!(!prompt.contains("This is attempt"));
    }

    #[test]
    fn query_diagnostics_name_the_query_command() {
        let prompt = PromptBuilder::new(10_000)
            .render(&PromptInputs {
                subcommand: "query",
                ..inputs("ERROR: no such target", 1)
            })
            .expect("render");
        assert!(prompt.contains("latest `bazel query //crates/cli:grep_cli`"));
        assert!(!prompt.contains("bazel build"));
    }

    #[test]
    fn later_attempts_mention_progress() {
        let prompt = PromptBuilder::new(10_000)
            .render(&inputs("still broken", 2))
            .expect("render");
        assert!(prompt.contains("This is attempt 2 of 3"));
    }

    #[test]
    fn diagnostics_are_not_html_escaped() {
        let prompt = PromptBuilder::new(10_000)
            .render(&inputs("expected `<T as Foo>` & \"bar\"", 1))
            .expect("render");
        assert!(prompt.contains("expected `<T as Foo>` & \"bar\""));
    }

    #[test]
    fn long_diagnostics_keep_the_tail() {
        let long = format!("{}FINAL ERROR", "x".repeat(500));
        let prompt = PromptBuilder::new(50).render(&inputs(&long, 1)).expect("render");
        assert!(prompt.contains("bytes of earlier output omitted"));
        assert!(prompt.ends_with("FINAL ERROR"));
        assert!(!prompt.contains(&"x".repeat(100)));
    }

    #[test]
    fn keep_tail_respects_char_boundaries() {
        let text = "ééééé";
        let kept = keep_tail(text, 3);
        assert!(kept.ends_with('é'));
    }
}
