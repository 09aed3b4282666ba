//! Prompt assembly.
//!
//! [`PromptBuilder::build`] is a pure function of its inputs: the same
//! question, context, memory and time always produce the same prompt. Every
//! section is always present, with the template's placeholder standing in
//! for empty context or memory.

use chrono::NaiveDateTime;
use chrono::format::{Item, StrftimeItems};

use crate::template::PromptTemplate;

/// Renders prompts from a [`PromptTemplate`].
#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    template: PromptTemplate,
}

impl PromptBuilder {
    pub fn new(template: PromptTemplate) -> Self {
        Self { template }
    }

    pub fn template(&self) -> &PromptTemplate {
        &self.template
    }

    /// Assemble the full prompt.
    ///
    /// Sections, in order: identity, modes, guidelines, examples, current time,
    /// retrieved context (blank-line separated), recent memory (one per
    /// line), the question verbatim, then the response cue.
    pub fn build(
        &self,
        question: &str,
        retrieved_context: &[String],
        recent_memory: &[String],
        current_time: NaiveDateTime,
    ) -> String {
        let template = &self.template;

        let context = if retrieved_context.is_empty() {
            template.no_context_placeholder.clone()
        } else {
            retrieved_context.join("\n\n")
        };
        let memory = if recent_memory.is_empty() {
            template.no_memory_placeholder.clone()
        } else {
            recent_memory.join("\n")
        };
        let time = render_time(current_time, &template.time_format);

        format!(
            "### IDENTITY\n\n{identity}\n\n\
             ### MODES\n\n{modes}\n\n\
             ### GUIDELINES\n\n{guidelines}\n\n\
             ### EXAMPLES\n\n{examples}\n\n\
             ### CURRENT TIME\n\n{time}\n\n\
             ### CONTEXT FROM JOURNAL ENTRIES\n\n{context}\n\n\
             ### CONVERSATION MEMORY\n\n{memory}\n\n\
             ### USER QUESTION\n\n{question}\n\n\
             ### YOUR RESPONSE (pick the Mirror or Copilot mode from the context):",
            identity = template.identity.trim(),
            modes = template.modes.trim(),
            guidelines = template.guidelines.trim(),
            examples = template.examples.trim(),
        )
    }
}

const FALLBACK_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format `time`, falling back to ISO-like output for an invalid format string.
fn render_time(time: NaiveDateTime, format: &str) -> String {
    let items = StrftimeItems::new(format);
    if items.clone().any(|item| matches!(item, Item::Error)) {
        return time.format(FALLBACK_TIME_FORMAT).to_string();
    }
    time.format_with_items(items).to_string()
}
