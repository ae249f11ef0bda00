//! Prompt rendering and language model invocation

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::prompts::{PromptContext, PromptTemplates, Task};
use crate::providers::{GenerationOptions, LanguageModel};
use crate::retry::{Retrier, RetryPolicy};
use crate::{Error, Result};

/// Renders a task prompt and asks the language model for a completion
#[derive(Clone)]
pub struct ReviewGenerator {
    llm: Arc<dyn LanguageModel>,
    templates: PromptTemplates,
    options: GenerationOptions,
    retrier: Retrier<Error>,
}

impl ReviewGenerator {
    pub fn new(llm: Arc<dyn LanguageModel>, options: GenerationOptions) -> Self {
        Self {
            llm,
            templates: PromptTemplates::default(),
            options,
            retrier: Retrier::default(),
        }
    }

    /// Replace the prompt templates
    pub fn with_templates(mut self, templates: PromptTemplates) -> Self {
        self.templates = templates;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy<Error>) -> Self {
        self.retrier = Retrier::new(policy);
        self
    }

    /// Render the prompt for `task` without calling the model
    pub fn render(&self, task: Task, query: &str, context: &str, language: &str) -> String {
        let prompt = PromptContext::new()
            .with_text(query)
            .with_context(context)
            .with_language(language);
        self.templates.render(task, &prompt)
    }

    /// Generate text for `task`, returning the first completion choice
    pub async fn generate(
        &self,
        cancel: &CancellationToken,
        task: Task,
        query: &str,
        context: &str,
        language: &str,
    ) -> Result<String> {
        let prompt = self.render(task, query, context, language);
        debug!(%task, prompt_len = prompt.len(), model = %self.options.model, "Calling language model");

        let prompt = prompt.as_str();
        let text = self
            .retrier
            .run(cancel, || async move {
                let choices = self.llm.generate(prompt, &self.options).await?;
                choices.into_iter().next().ok_or(Error::NoResponse)
            })
            .await?;

        info!(%task, response_len = text.len(), "Generated response");
        Ok(text)
    }
}

impl std::fmt::Debug for ReviewGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReviewGenerator")
            .field("options", &self.options)
            .field("retrier", &self.retrier)
            .finish_non_exhaustive()
    }
}
