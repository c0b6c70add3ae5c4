//! Prompt construction for SQL generation and result summarization.
//!
//! Output depends only on the inputs: no clock, no randomness, no I/O.

use crate::assistant::catalog::SchemaCatalog;
use crate::assistant::executor::Row;
use crate::assistant::scope::{ResolvedScope, Role};

/// System prompt for "general" mode, where no query is run.
pub const GENERAL_SYSTEM_PROMPT: &str = "You are a helpful teaching assistant for an SQL course. \
Explain SQL concepts clearly, give short examples when they help, and guide students \
toward answers instead of handing over full exercise solutions.";

/// System prompt for the SQL generation call.
pub const GENERATION_SYSTEM_PROMPT: &str = "You translate questions into a single read-only SQLite SELECT statement. \
Return ONLY the SQL statement, no explanation, no markdown.";

pub struct PromptBuilder {
    catalog: SchemaCatalog,
    preview_rows: usize,
}

impl PromptBuilder {
    pub fn new(catalog: SchemaCatalog, preview_rows: usize) -> Self {
        Self { catalog, preview_rows: preview_rows.max(1) }
    }

    /// Static rules + schema + role scoping + question.
    pub fn build_generation_prompt(&self, scope: &ResolvedScope, question: &str) -> String {
        let scoping = scope.strategy().scoping_rules(scope);
        format!(
            "Rules:\n\
             - Write exactly one SELECT statement. Never modify data or schema.\n\
             - Use only the tables and columns listed below.\n\
             - Never select password or other credential columns.\n\
             {scoping}\n\n\
             Available tables:\n{schema}\n\n\
             Question: {question}\n\nSQL:",
            scoping = scoping,
            schema = self.catalog.render(),
            question = question.trim(),
        )
    }

    /// Question + a bounded preview of the result rows.
    pub fn build_summary_prompt(
        &self,
        role: Role,
        question: &str,
        rows: &[Row],
        context_note: Option<&str>,
    ) -> String {
        let mut prompt = format!(
            "You are a teaching assistant for an SQL course, talking to {who}.\n\
             Answer the question using only the query results below.\n\n\
             Question: {question}\n\n",
            who = match role {
                Role::Student => "a student",
                Role::Instructor => "an instructor",
            },
            question = question.trim(),
        );

        if rows.is_empty() {
            prompt.push_str("Results: the query returned no rows.\n");
        } else {
            prompt.push_str(&format!("Results ({} rows):\n", rows.len()));
            for row in rows.iter().take(self.preview_rows) {
                prompt.push_str(&serde_json::Value::Object(row.clone()).to_string());
                prompt.push('\n');
            }
            let omitted = rows.len().saturating_sub(self.preview_rows);
            if omitted > 0 {
                prompt.push_str(&format!("... {} more rows omitted.\n", omitted));
            }
        }

        if let Some(note) = context_note.filter(|n| !n.trim().is_empty()) {
            prompt.push_str(&format!("\nNote: {}\n", note.trim()));
        }

        prompt.push_str(
            "\nReply in plain, friendly language. If there are no results, say so. \
             Do not show SQL or mention database internals.",
        );
        prompt
    }
}
