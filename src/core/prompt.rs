use serde::{Deserialize, Serialize};

use crate::core::chunker::ReviewUnit;
use crate::core::context::PrMetadata;
use crate::core::diff_parser::LineKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    pub system_prompt: String,
    pub user_prompt_template: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system_prompt: r#"You are an expert code reviewer. You receive the unified diff of a pull request and respond with review comments for the changed code.

Respond ONLY with comment blocks in this exact format, one block per finding:

FILE: <path exactly as shown in the diff>
LINE: <line number in the new version of that file>
SEVERITY: <info|warning|bug|security>
COMMENT: <what is wrong and why it matters; may continue over several lines>

Rules:
- Comment only on lines that are part of the change.
- Never invent files or line numbers that do not appear in the diff.
- Do not comment on style or formatting unless it causes a defect.
- Do not give positive or congratulatory comments.
- If the change warrants no comments, respond with exactly: NO_COMMENTS"#
                .to_string(),
            user_prompt_template: r#"Review the following pull request.

Title: {title}
Description: {description}

Diff:
{diff}"#
                .to_string(),
        }
    }
}

pub struct PromptBuilder {
    config: PromptConfig,
}

impl PromptBuilder {
    pub fn new(config: PromptConfig) -> Self {
        Self { config }
    }

    /// Renders one review unit into the (system, user) prompt pair.
    pub fn build(&self, unit: &ReviewUnit, meta: &PrMetadata) -> (String, String) {
        let diff_text = self.format_unit(unit);
        let user_prompt = self
            .config
            .user_prompt_template
            .replace("{title}", meta.title.as_str())
            .replace("{description}", meta.description.as_str())
            .replace("{diff}", &diff_text);

        (self.config.system_prompt.clone(), user_prompt)
    }

    fn format_unit(&self, unit: &ReviewUnit) -> String {
        let mut output = String::new();

        for file in &unit.files {
            output.push_str(&format!("File: {}\n", file.path));

            for hunk in &file.hunks {
                output.push_str(&format!("{}\n", hunk.header));
                for line in &hunk.lines {
                    let prefix = match line.kind {
                        LineKind::Added => "+",
                        LineKind::Removed => "-",
                        LineKind::Context => " ",
                    };
                    output.push_str(&format!("{}{}\n", prefix, line.content));
                }
            }
            output.push('\n');
        }

        output
    }
}
