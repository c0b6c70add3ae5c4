//! Schema catalog: the tables and columns the SQL generator may use.

use serde::{Deserialize, Serialize};

/// Minimal schema info passed to the prompt so the model knows available tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TableSchema {
    pub fn new(name: &str, columns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            description: None,
        }
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
}

/// Read-only, process-wide description of the queryable schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaCatalog {
    tables: Vec<TableSchema>,
}

impl SchemaCatalog {
    pub fn new(tables: Vec<TableSchema>) -> Self {
        Self { tables }
    }

    /// Use `tables` when non-empty, otherwise the built-in SmartSQL catalog.
    pub fn from_config(tables: &[TableSchema]) -> Self {
        if tables.is_empty() {
            Self::smartsql()
        } else {
            Self::new(tables.to_vec())
        }
    }

    /// The SmartSQL learning schema minus credential columns.
    pub fn smartsql() -> Self {
        Self::new(vec![
            TableSchema::new("Users", &["user_id", "first_name", "last_name", "username", "email", "user_type", "profile_info"])
                .describe("every account; user_type is 'Student' or 'Instructor'"),
            TableSchema::new("Student", &["student_id"]),
            TableSchema::new("Instructor", &["instructor_id"]),
            TableSchema::new("Course", &["course_id", "course_name", "course_code", "instructor_id", "course_description", "year", "term", "state"])
                .describe("term is 1=Spring, 2=Summer, 3=Fall; state is 'active' or 'archived'"),
            TableSchema::new("Enrollment", &["enrollment_id", "student_id", "course_id", "status"])
                .describe("status is 'enrolled' or 'dropped'"),
            TableSchema::new("Module", &["module_id", "course_id", "module_name", "module_description"]),
            TableSchema::new("Exercise", &["exercise_id", "title", "description", "hint", "difficulty", "table_schema", "expected_answer"]),
            TableSchema::new("Module_Exercise", &["module_id", "exercise_id", "display_order"]),
            TableSchema::new("Student_Exercise", &["id", "student_id", "exercise_id", "submitted_answer", "is_correct", "score", "submission_count", "completed_at"]),
            TableSchema::new("Score", &["student_id", "course_id", "total_score", "rank"]),
            TableSchema::new("Message", &["message_id", "sender_id", "receiver_id", "course_id", "content", "sent_at"]),
        ])
    }

    pub fn tables(&self) -> &[TableSchema] {
        &self.tables
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Case-insensitive table lookup.
    pub fn contains_table(&self, name: &str) -> bool {
        self.tables.iter().any(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// Text block embedded in generation prompts.
    pub fn render(&self) -> String {
        let lines: Vec<String> = self.tables.iter()
            .map(|t| match &t.description {
                Some(desc) => format!("  {}({})  -- {}", t.name, t.columns.join(", "), desc),
                None => format!("  {}({})", t.name, t.columns.join(", ")),
            })
            .collect();
        lines.join("\n")
    }
}
