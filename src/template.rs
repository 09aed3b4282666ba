//! # Prompt templates
//!
//! A [`PromptTemplate`] holds the fixed text of the assistant's persona: who
//! it is, how it switches between its two behavioral modes, and what it says
//! when there is nothing to recall. [`PromptBuilder`](crate::prompt::PromptBuilder)
//! stitches it together with per-query content.
//!
//! Templates are YAML files stored under the configuration directory:
//!
//! ```text
//! <config_dir>/templates/<name>.yaml
//! ```
//!
//! Every field is optional; missing ones fall back to the built-in persona.
//!
//! ## Minimal YAML example
//!
//! ```yaml
//! identity: |
//!   You are Echo, the user's journaling companion.
//! no_context_placeholder: "Nothing in the journal about that."
//! ```
//!
//! ## Loading a template
//!
//! ```no_run
//! use journal_recall::template::load_template;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let template = load_template("journal").await?;
//! println!("{}", template.identity);
//! # Ok(()) }
//! ```

use serde::{Deserialize, Serialize};
use std::{error::Error, fs, path::Path};

const DEFAULT_IDENTITY: &str = "\
You are the user's journaling companion: a second self that has read every \
journal entry they wrote and remembers your recent conversations. Speak to the \
user as a close friend would. Refer to shared memories as \"we\" when you recall \
them.";

const DEFAULT_MODES: &str = "\
Decide from the question which mode to use. Do not announce the mode.

MODE A: THE MIRROR (empathetic recall)
Use when the user shares feelings, tells a story, or asks about their past \
(\"What did I do yesterday?\").
- Be warm and personal, look at events through shared eyes.
- Bring the retrieved journal entries back to life in your own words.

MODE B: THE COPILOT (technical assistant)
Use when the user asks for help debugging, planning, brainstorming or \
choosing tools.
- Be concise and solution-oriented, use bullet points.
- Think like a mentor: give the best option and flag the risks.";

const DEFAULT_GUIDELINES: &str = "\
- The journal is the source of truth. Answer from the retrieved entries first.
- If the journal has nothing on the topic, say plainly that you do not \
remember it and ask the user to tell you. Never invent memories.
- Get straight to the point; skip chatbot greetings unless the user greets you.
- Combine what the journal says about the past with general knowledge.
- If asked for something harmful or unethical, decline gently and briefly.
- If the input is garbled or ambiguous, ask the user what they meant instead \
of guessing.";

const DEFAULT_EXAMPLES: &str = "\
Example 1 (Mirror):
User: \"Ugh, I taught the kids today and they just didn't get it.\"
Assistant: \"I know that feeling. Remember the robotics lesson last month? They \
were lost then too and we nearly gave up. Want to try turning the next lesson \
into a game?\"

Example 2 (Copilot):
User: \"Write a script that backs up my Postgres database to MinIO.\"
Assistant: \"Easy one. Piping pg_dump into the MinIO client is the cleanest \
way. Here is the bash script; remember to chmod +x it first:\"";

const DEFAULT_NO_CONTEXT: &str =
    "No related journal entries. Answer from general knowledge and say so.";

const DEFAULT_NO_MEMORY: &str = "No recent conversation.";

/// The fixed text of the assistant persona.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PromptTemplate {
    /// Who the assistant is and how it addresses the user.
    pub identity: String,

    /// Rules for choosing between empathetic recall and technical help.
    pub modes: String,

    /// Response rules that apply in every mode, including how to handle
    /// unsafe or garbled requests.
    pub guidelines: String,

    /// Few-shot exchanges showing each mode.
    pub examples: String,

    /// Shown in place of retrieved context when nothing was retrieved.
    pub no_context_placeholder: String,

    /// Shown in place of recent memory when there is none.
    pub no_memory_placeholder: String,

    /// `chrono` format string for the current-time section.
    pub time_format: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            identity: DEFAULT_IDENTITY.to_string(),
            modes: DEFAULT_MODES.to_string(),
            guidelines: DEFAULT_GUIDELINES.to_string(),
            examples: DEFAULT_EXAMPLES.to_string(),
            no_context_placeholder: DEFAULT_NO_CONTEXT.to_string(),
            no_memory_placeholder: DEFAULT_NO_MEMORY.to_string(),
            time_format: "%Y-%m-%d %H:%M:%S".to_string(),
        }
    }
}

/// Load a template by name from `<config_dir>/templates/<name>.yaml`.
///
/// ### Errors
/// Returns an error if the config directory cannot be determined, the file
/// cannot be read, or its YAML does not describe a [`PromptTemplate`].
pub async fn load_template(name: &str) -> Result<PromptTemplate, Box<dyn Error>> {
    let path = crate::config_dir()?
        .join("templates")
        .join(format!("{name}.yaml"));
    load_template_from(&path)
}

/// Load a template from an explicit path.
pub fn load_template_from(path: &Path) -> Result<PromptTemplate, Box<dyn Error>> {
    tracing::info!("Loading template: {}", path.display());

    let content = fs::read_to_string(path)?;
    let template: PromptTemplate = serde_yaml::from_str(&content)?;
    Ok(template)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_partial_template_keeps_defaults() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
identity: "You are Echo."
no_memory_placeholder: "Fresh start."
"#
        )
        .unwrap();

        let template = load_template_from(temp_file.path()).unwrap();
        assert_eq!(template.identity, "You are Echo.");
        assert_eq!(template.no_memory_placeholder, "Fresh start.");
        assert_eq!(template.modes, PromptTemplate::default().modes);
    }

    #[tokio::test]
    async fn test_load_template_missing_file() {
        let template = load_template("definitely_not_a_template_name").await;
        assert!(template.is_err(), "Expected error for missing template");
    }

    #[test]
    fn test_load_template_invalid_format() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, r#"invalid: template: format"#).unwrap();
        assert!(load_template_from(temp_file.path()).is_err());
    }

    #[test]
    fn default_persona_names_both_modes() {
        let template = PromptTemplate::default();
        assert!(template.modes.contains("MIRROR"));
        assert!(template.modes.contains("COPILOT"));
    }

    #[test]
    fn default_persona_has_examples_and_error_rules() {
        let template = PromptTemplate::default();
        assert!(template.examples.contains("Example 1 (Mirror)"));
        assert!(template.examples.contains("Example 2 (Copilot)"));
        assert!(template.guidelines.contains("decline gently"));
        assert!(template.guidelines.contains("ask the user what they meant"));
    }
}
