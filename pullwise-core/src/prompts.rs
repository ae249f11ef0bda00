//! Prompt templates for language model tasks
//!
//! Templates use `{{VARIABLE}}` placeholders. Every [`Task`] has an embedded
//! default template, which configuration may override.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Embedded prompt templates for each task
const CODE_REVIEW_PROMPT: &str = include_str!("prompts/code_review.md");
const CODE_COMPLETION_PROMPT: &str = include_str!("prompts/code_completion.md");
const CODE_GENERATION_PROMPT: &str = include_str!("prompts/code_generation.md");

/// Placeholder for the query text (diff, partial code, request)
pub const TEXT: &str = "TEXT";
/// Placeholder for retrieved project context
pub const CONTEXT: &str = "CONTEXT";
/// Placeholder for the target language
pub const LANGUAGE: &str = "LANGUAGE";

/// Rendered in place of an empty context block
const EMPTY_CONTEXT: &str = "(no relevant context found)";

/// Kind of work requested from the language model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Task {
    CodeReview,
    CodeCompletion,
    CodeGeneration,
}

impl Task {
    /// All tasks
    pub const ALL: [Task; 3] = [Task::CodeReview, Task::CodeCompletion, Task::CodeGeneration];

    pub fn as_str(&self) -> &'static str {
        match self {
            Task::CodeReview => "code-review",
            Task::CodeCompletion => "code-completion",
            Task::CodeGeneration => "code-generation",
        }
    }

    /// The embedded template for this task
    pub fn default_template(&self) -> &'static str {
        match self {
            Task::CodeReview => CODE_REVIEW_PROMPT,
            Task::CodeCompletion => CODE_COMPLETION_PROMPT,
            Task::CodeGeneration => CODE_GENERATION_PROMPT,
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Task {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "code-review" | "review" => Ok(Task::CodeReview),
            "code-completion" | "completion" => Ok(Task::CodeCompletion),
            "code-generation" | "generation" => Ok(Task::CodeGeneration),
            _ => Err(Error::UnknownTask(s.to_string())),
        }
    }
}

/// Template set with optional per-task overrides
#[derive(Debug, Clone, Default)]
pub struct PromptTemplates {
    overrides: HashMap<Task, String>,
}

impl PromptTemplates {
    /// Templates using the embedded defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the template for a task
    pub fn set(&mut self, task: Task, template: impl Into<String>) -> &mut Self {
        self.overrides.insert(task, template.into());
        self
    }

    /// Override the template for a task (builder pattern)
    pub fn with(mut self, task: Task, template: impl Into<String>) -> Self {
        self.set(task, template);
        self
    }

    /// Template for a task
    pub fn get(&self, task: Task) -> &str {
        self.overrides
            .get(&task)
            .map(String::as_str)
            .unwrap_or_else(|| task.default_template())
    }

    /// Render the template for `task`
    pub fn render(&self, task: Task, context: &PromptContext) -> String {
        render_template(self.get(task), context)
    }
}

/// Context for rendering a prompt template
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    variables: HashMap<String, String>,
}

impl PromptContext {
    /// Create a new empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a variable value
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    /// Set a variable value (builder pattern)
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Set the query text
    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.with(TEXT, text)
    }

    /// Set the retrieved context, substituting a marker when it is empty
    pub fn with_context(self, context: impl Into<String>) -> Self {
        let context = context.into();
        if context.trim().is_empty() {
            self.with(CONTEXT, EMPTY_CONTEXT)
        } else {
            self.with(CONTEXT, context)
        }
    }

    /// Set the target language
    pub fn with_language(self, language: impl Into<String>) -> Self {
        self.with(LANGUAGE, language)
    }
}

/// Render a template string with variable substitution
///
/// Substitution is single-pass, so placeholders inside substituted values
/// (a diff that happens to contain `{{TEXT}}`) are left alone. Unset
/// uppercase placeholders render as "(not specified)".
pub fn render_template(template: &str, context: &PromptContext) -> String {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start + 2..].find("}}") else {
            break;
        };
        let name = &rest[start + 2..start + 2 + len];
        result.push_str(&rest[..start]);

        match context.variables.get(name) {
            Some(value) => result.push_str(value),
            None if is_placeholder_name(name) => result.push_str("(not specified)"),
            None => result.push_str(&rest[start..start + 2 + len + 2]),
        }

        rest = &rest[start + 2 + len + 2..];
    }

    result.push_str(rest);
    result
}

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_uppercase() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_task_has_template_with_placeholders() {
        for task in Task::ALL {
            let template = task.default_template();
            assert!(template.contains("{{TEXT}}"), "{task}");
            assert!(template.contains("{{CONTEXT}}"), "{task}");
            assert!(template.contains("{{LANGUAGE}}"), "{task}");
        }
    }

    #[test]
    fn test_task_parsing() {
        assert_eq!("code-review".parse::<Task>().unwrap(), Task::CodeReview);
        assert_eq!("CODE_COMPLETION".parse::<Task>().unwrap(), Task::CodeCompletion);
        assert_eq!("generation".parse::<Task>().unwrap(), Task::CodeGeneration);
        assert!(matches!(
            "translate".parse::<Task>(),
            Err(Error::UnknownTask(name)) if name == "translate"
        ));
    }

    #[test]
    fn test_render_review_prompt() {
        let context = PromptContext::new()
            .with_text("- old\n+ new")
            .with_context("--- Context Snippet 0 from file main.go ---\nfunc main() {}\n\n")
            .with_language("go");

        let rendered = PromptTemplates::new().render(Task::CodeReview, &context);
        assert!(rendered.contains("# Code Review"));
        assert!(rendered.contains("- old\n+ new"));
        assert!(rendered.contains("func main() {}"));
        assert!(rendered.contains("senior go engineer"));
    }

    #[test]
    fn test_empty_context_marker() {
        let context = PromptContext::new().with_text("diff").with_context("");
        let rendered = PromptTemplates::new().render(Task::CodeReview, &context);
        assert!(rendered.contains("(no relevant context found)"));
    }

    #[test]
    fn test_unset_placeholder() {
        let rendered = render_template("lang={{LANGUAGE}}", &PromptContext::new());
        assert_eq!(rendered, "lang=(not specified)");
    }

    #[test]
    fn test_values_are_not_rescanned() {
        let context = PromptContext::new().with_text("{{CONTEXT}}").with_context("ctx");
        let rendered = render_template("{{TEXT}} / {{CONTEXT}}", &context);
        assert_eq!(rendered, "{{CONTEXT}} / ctx");
    }

    #[test]
    fn test_non_placeholder_braces_survive() {
        let rendered = render_template("map{{k}} and {{", &PromptContext::new());
        assert_eq!(rendered, "map{{k}} and {{");
    }

    #[test]
    fn test_override_template() {
        let templates = PromptTemplates::new().with(Task::CodeReview, "R: {{TEXT}}");
        let rendered = templates.render(Task::CodeReview, &PromptContext::new().with_text("x"));
        assert_eq!(rendered, "R: x");
        // Other tasks keep the default
        assert!(templates.get(Task::CodeGeneration).contains("# Code Generation"));
    }
}
