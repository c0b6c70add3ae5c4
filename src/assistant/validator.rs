//! SQL validation for model-generated statements.
//!
//! Checks run in a fixed order and the first failure aborts:
//!
//! 1. strip code fences
//! 2. reject empty output
//! 3. statement must start with `SELECT`
//! 4. keyword deny-list (whole words, any case)
//! 5. no `;` before the end, outside literals and comments
//! 6. no denied column names
//! 7. parse with `sqlparser`: one query over catalog tables only
//! 8. replace scope placeholders with positional parameters
//!
//! Steps 3 to 6 are token heuristics, not a grammar, and step 7 only narrows
//! what they let through. Row scoping is applied only when the model emits the
//! placeholder; a statement without it passes unscoped unless
//! `require_scope_placeholder` is set.

use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlparser::ast::{ObjectName, Query, Statement, Visit, Visitor};
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;
use std::collections::HashSet;
use std::ops::{ControlFlow, Range};

use crate::assistant::catalog::SchemaCatalog;
use crate::assistant::scope::{ResolvedScope, ScopeBinding};
use crate::config::AssistantConfig;

pub const DEFAULT_DENIED_KEYWORDS: &[&str] = &[
    "DELETE", "UPDATE", "INSERT", "DROP", "ALTER", "TRUNCATE", "EXEC", "CALL", "GRANT", "REVOKE",
    "ATTACH", "DETACH", "PRAGMA",
];

pub const DEFAULT_DENIED_COLUMNS: &[&str] = &["password", "password_hash"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("the model did not produce a query")]
    EmptyGeneration,
    #[error("only SELECT statements are allowed, got {0}")]
    DisallowedStatementType(String),
    #[error("keyword {0} is not allowed")]
    DisallowedKeyword(String),
    #[error("only a single statement is allowed")]
    MultipleStatements,
    #[error("column {0} cannot be queried")]
    SensitiveColumnAccess(String),
    #[error("query is missing the {0} scope placeholder")]
    MissingScopePlaceholder(String),
    #[error("query could not be parsed: {0}")]
    UnparseableStatement(String),
    #[error("table {0} is not part of the schema")]
    UnknownTable(String),
}

/// Positional parameter marker syntax of the target driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamStyle {
    /// `%s`
    Format,
    /// `?`
    #[default]
    Qmark,
    /// `$1`, `$2`, ...
    Numeric,
}

impl ParamStyle {
    /// Marker for the parameter at 1-based `position`.
    pub fn marker(&self, position: usize) -> String {
        match self {
            ParamStyle::Format => "%s".to_string(),
            ParamStyle::Qmark => "?".to_string(),
            ParamStyle::Numeric => format!("${}", position),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Text(String),
}

/// A statement that passed every check. Only [`SqlValidator`] builds these.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedStatement {
    sql: String,
    params: Vec<ParamValue>,
}

impl ValidatedStatement {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[ParamValue] {
        &self.params
    }
}

/// Remove leading/trailing code fences (with an optional language tag) and
/// surrounding whitespace.
pub fn strip_fences(raw: &str) -> String {
    let mut s = raw.trim();
    if let Some(rest) = s.strip_prefix("```") {
        let tag_len = rest.bytes().take_while(|b| b.is_ascii_alphanumeric()).count();
        let after_tag = &rest[tag_len..];
        s = if tag_len > 0 && (after_tag.starts_with('\n') || after_tag.starts_with("\r\n")) {
            after_tag
        } else {
            rest
        };
    }
    let s = s.trim_end();
    let s = s.strip_suffix("```").unwrap_or(s);
    s.trim().to_string()
}

/// Blank out quoted literals, quoted identifiers and comments, keeping byte
/// offsets of everything else.
/// Byte ranges of quoted literals and identifiers (quotes included) and of
/// comments. An unterminated span runs to the end of `sql`.
fn hidden_spans(sql: &str) -> Vec<Range<usize>> {
    #[derive(PartialEq)]
    enum State { Code, Quoted(char), LineComment, BlockComment }

    let mut spans = Vec::new();
    let mut state = State::Code;
    let mut start = 0;
    let mut chars = sql.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match state {
            State::Code => match c {
                '\'' | '"' | '`' => { state = State::Quoted(c); start = i; }
                '-' if matches!(chars.peek(), Some((_, '-'))) => { chars.next(); state = State::LineComment; start = i; }
                '/' if matches!(chars.peek(), Some((_, '*'))) => { chars.next(); state = State::BlockComment; start = i; }
                _ => {}
            },
            State::Quoted(q) => {
                if c == q {
                    // doubled quote is an escaped quote inside the literal
                    if matches!(chars.peek(), Some((_, next)) if *next == q) {
                        chars.next();
                    } else {
                        spans.push(start..i + 1);
                        state = State::Code;
                    }
                }
            }
            State::LineComment => {
                if c == '\n' {
                    spans.push(start..i);
                    state = State::Code;
                }
            }
            State::BlockComment => {
                if c == '*' && matches!(chars.peek(), Some((_, '/'))) {
                    chars.next();
                    spans.push(start..i + 2);
                    state = State::Code;
                }
            }
        }
    }
    if state != State::Code {
        spans.push(start..sql.len());
    }
    spans
}

/// Blank out literals and comments, keeping byte offsets.
fn mask_literals_and_comments(sql: &str) -> String {
    let mut bytes = sql.as_bytes().to_vec();
    for span in hidden_spans(sql) {
        bytes[span].fill(b' ');
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Rejects relations outside the catalog, allowing CTE names.
struct RelationCheck<'a> {
    catalog: &'a SchemaCatalog,
    ctes: HashSet<String>,
}

impl Visitor for RelationCheck<'_> {
    type Break = String;

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.ctes.insert(cte.alias.name.value.to_lowercase());
            }
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<Self::Break> {
        let table = relation.0.last().map(|ident| ident.value.as_str()).unwrap_or_default();
        if self.ctes.contains(&table.to_lowercase()) || self.catalog.contains_table(table) {
            ControlFlow::Continue(())
        } else {
            ControlFlow::Break(relation.to_string())
        }
    }
}

pub struct SqlValidator {
    catalog: SchemaCatalog,
    denied_keywords: Option<Regex>,
    denied_columns: HashSet<String>,
    identifier: Regex,
    style: ParamStyle,
    require_placeholder: bool,
}

impl SqlValidator {
    /// Validator with the default deny-lists and `?` markers.
    pub fn new(catalog: SchemaCatalog) -> Result<Self, regex::Error> {
        Ok(Self {
            catalog,
            denied_keywords: keyword_pattern(DEFAULT_DENIED_KEYWORDS)?,
            denied_columns: DEFAULT_DENIED_COLUMNS.iter().map(|c| c.to_lowercase()).collect(),
            identifier: Regex::new(r"\b[A-Za-z_][A-Za-z0-9_]*\b")?,
            style: ParamStyle::default(),
            require_placeholder: false,
        })
    }

    pub fn from_config(catalog: SchemaCatalog, config: &AssistantConfig) -> Result<Self, regex::Error> {
        let mut validator = Self::new(catalog)?
            .with_denied_keywords(&config.denied_keywords)?
            .with_denied_columns(&config.denied_columns)
            .with_param_style(config.placeholder_style);
        validator.require_placeholder = config.require_scope_placeholder;
        Ok(validator)
    }

    pub fn with_param_style(mut self, style: ParamStyle) -> Self {
        self.style = style;
        self
    }

    pub fn with_denied_keywords<S: AsRef<str>>(mut self, keywords: &[S]) -> Result<Self, regex::Error> {
        self.denied_keywords = keyword_pattern(keywords)?;
        Ok(self)
    }

    pub fn with_denied_columns<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        self.denied_columns = columns.iter().map(|c| c.as_ref().to_lowercase()).collect();
        self
    }

    pub fn require_scope_placeholder(mut self, required: bool) -> Self {
        self.require_placeholder = required;
        self
    }

    pub fn param_style(&self) -> ParamStyle {
        self.style
    }

    /// Validate `candidate` for a resolved caller scope.
    pub fn validate_for(&self, candidate: &str, scope: &ResolvedScope) -> Result<ValidatedStatement, ValidationError> {
        self.validate(candidate, &scope.bindings())
    }

    /// Validate `candidate`, binding each placeholder occurrence in `bindings`
    /// to a positional parameter. The first binding is the primary scope
    /// placeholder.
    pub fn validate(&self, candidate: &str, bindings: &[ScopeBinding]) -> Result<ValidatedStatement, ValidationError> {
        let sql = strip_fences(candidate);
        if sql.is_empty() {
            return Err(ValidationError::EmptyGeneration);
        }

        if !sql.to_uppercase().starts_with("SELECT") {
            let kind = sql.split_whitespace().next().unwrap_or_default().to_uppercase();
            return Err(ValidationError::DisallowedStatementType(kind));
        }

        if let Some(found) = self.denied_keywords.as_ref().and_then(|re| re.find(&sql)) {
            return Err(ValidationError::DisallowedKeyword(found.as_str().to_uppercase()));
        }

        let masked = mask_literals_and_comments(&sql);
        let masked_body = masked.trim_end();
        let masked_body = masked_body.strip_suffix(';').unwrap_or(masked_body);
        if masked_body.contains(';') {
            return Err(ValidationError::MultipleStatements);
        }
        let sql = if masked.trim_end().ends_with(';') {
            sql.trim_end().trim_end_matches(';').trim_end().to_string()
        } else {
            sql
        };

        if let Some(column) = self.identifier
            .find_iter(&sql)
            .map(|m| m.as_str())
            .find(|ident| self.denied_columns.contains(&ident.to_lowercase()))
        {
            return Err(ValidationError::SensitiveColumnAccess(column.to_string()));
        }

        self.check_structure(&sql, bindings)?;

        let (sql, params, bound) = self.substitute(&sql, bindings);
        if self.require_placeholder {
            if let Some(primary) = bindings.first() {
                if !bound.contains(primary.token) {
                    return Err(ValidationError::MissingScopePlaceholder(primary.token.to_string()));
                }
            }
        }
        Ok(ValidatedStatement { sql, params })
    }

    fn check_structure(&self, sql: &str, bindings: &[ScopeBinding]) -> Result<(), ValidationError> {
        let mut parseable = sql.to_string();
        for binding in bindings {
            parseable = parseable.replace(binding.token, "0");
        }

        let statements = Parser::parse_sql(&SQLiteDialect {}, &parseable)
            .map_err(|e| ValidationError::UnparseableStatement(e.to_string()))?;
        let statement = match statements.as_slice() {
            [] => return Err(ValidationError::EmptyGeneration),
            [statement @ Statement::Query(_)] => statement,
            [_] => {
                let kind = sql.split_whitespace().next().unwrap_or_default().to_uppercase();
                return Err(ValidationError::DisallowedStatementType(kind));
            }
            _ => return Err(ValidationError::MultipleStatements),
        };

        if self.catalog.is_empty() {
            return Ok(());
        }
        let mut check = RelationCheck { catalog: &self.catalog, ctes: HashSet::new() };
        match statement.visit(&mut check) {
            ControlFlow::Break(table) => Err(ValidationError::UnknownTable(table)),
            ControlFlow::Continue(()) => Ok(()),
        }
    }

    /// Replace placeholder occurrences left to right. A placeholder that is
    /// the whole of a quoted literal (`'{user_id}'`) is replaced together with
    /// its quotes; one embedded in longer literal text or a comment is left as
    /// text and binds nothing.
    fn substitute(&self, sql: &str, bindings: &[ScopeBinding]) -> (String, Vec<ParamValue>, HashSet<&'static str>) {
        let hidden = hidden_spans(sql);
        let mut out = String::with_capacity(sql.len());
        let mut params = Vec::new();
        let mut bound = HashSet::new();
        let mut copied = 0;
        let mut cursor = 0;

        loop {
            let next = bindings.iter()
                .filter_map(|b| sql[cursor..].find(b.token).map(|pos| (cursor + pos, b)))
                .min_by_key(|(pos, _)| *pos);
            let Some((pos, binding)) = next else {
                break;
            };
            let end = pos + binding.token.len();
            cursor = end;

            let replaced = match hidden.iter().find(|span| span.contains(&pos)) {
                None => pos..end,
                Some(span) if span.start + 1 == pos && span.end == end + 1 => span.clone(),
                Some(_) => continue,
            };

            out.push_str(&sql[copied..replaced.start]);
            params.push(binding.value.clone());
            bound.insert(binding.token);
            out.push_str(&self.style.marker(params.len()));
            copied = replaced.end;
            cursor = replaced.end;
        }

        out.push_str(&sql[copied..]);
        (out, params, bound)
    }
}

fn keyword_pattern<S: AsRef<str>>(keywords: &[S]) -> Result<Option<Regex>, regex::Error> {
    let alternatives: Vec<String> = keywords.iter()
        .map(|k| k.as_ref().trim())
        .filter(|k| !k.is_empty())
        .map(regex::escape)
        .collect();
    if alternatives.is_empty() {
        return Ok(None);
    }
    Regex::new(&format!(r"(?i)\b(?:{})\b", alternatives.join("|"))).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::scope::{INSTRUCTOR_PLACEHOLDER, USER_PLACEHOLDER};

    fn validator() -> SqlValidator {
        SqlValidator::new(SchemaCatalog::smartsql()).unwrap()
    }

    fn student(id: i64) -> Vec<ScopeBinding> {
        vec![ScopeBinding::new(USER_PLACEHOLDER, id)]
    }

    #[test]
    fn test_strip_fences_is_format_agnostic() {
        let x = "SELECT * FROM Course";
        assert_eq!(strip_fences("```sql\nSELECT * FROM Course```"), x);
        assert_eq!(strip_fences("```\nSELECT * FROM Course```"), x);
        assert_eq!(strip_fences("```sql\nSELECT * FROM Course\n```\n"), x);
        assert_eq!(strip_fences(x), x);
        assert_eq!(strip_fences(&strip_fences("```sql\nSELECT * FROM Course```")), x);
    }

    #[test]
    fn test_strip_fences_keeps_select_without_tag_newline() {
        assert_eq!(strip_fences("```SELECT 1```"), "SELECT 1");
    }

    #[test]
    fn test_empty_generation() {
        assert_eq!(validator().validate("   ", &student(1)), Err(ValidationError::EmptyGeneration));
        assert_eq!(validator().validate("```sql\n```", &student(1)), Err(ValidationError::EmptyGeneration));
    }

    #[test]
    fn test_non_select_is_rejected() {
        for candidate in ["WITH x AS (SELECT 1) SELECT * FROM x", "show tables", "EXPLAIN SELECT 1"] {
            assert!(matches!(
                validator().validate(candidate, &student(1)),
                Err(ValidationError::DisallowedStatementType(_))
            ), "{candidate}");
        }
        assert_eq!(
            validator().validate("delete from Users", &student(1)),
            Err(ValidationError::DisallowedStatementType("DELETE".to_string()))
        );
    }

    #[test]
    fn test_select_prefix_is_case_insensitive() {
        let stmt = validator().validate("select course_name from Course", &student(1)).unwrap();
        assert_eq!(stmt.sql(), "select course_name from Course");
        assert!(stmt.params().is_empty());
    }

    #[test]
    fn test_denied_keyword_any_case() {
        for candidate in [
            "SELECT * FROM Course; DROP TABLE Course",
            "SELECT * FROM Course WHERE 1 = 1 Drop",
            "SELECT * FROM Course WHERE course_name = 'x' OR update",
        ] {
            assert!(matches!(
                validator().validate(candidate, &student(1)),
                Err(ValidationError::DisallowedKeyword(_))
            ), "{candidate}");
        }
        assert_eq!(
            validator().validate("SELECT * FROM Course drop", &student(1)),
            Err(ValidationError::DisallowedKeyword("DROP".to_string()))
        );
    }

    #[test]
    fn test_keyword_inside_identifier_is_allowed() {
        let v = validator().with_denied_columns::<&str>(&[]);
        let v = SqlValidator { catalog: SchemaCatalog::default(), ..v };
        let stmt = v.validate("SELECT dropdown, last_update FROM widgets", &[]).unwrap();
        assert_eq!(stmt.sql(), "SELECT dropdown, last_update FROM widgets");
    }

    #[test]
    fn test_multiple_statements() {
        assert_eq!(
            validator().validate("SELECT 1; SELECT 2", &student(1)),
            Err(ValidationError::MultipleStatements)
        );
        assert_eq!(
            validator().validate("SELECT 1;;", &student(1)),
            Err(ValidationError::MultipleStatements)
        );
    }

    #[test]
    fn test_single_trailing_semicolon_is_accepted() {
        let stmt = validator().validate("SELECT course_name FROM Course;", &student(1)).unwrap();
        assert_eq!(stmt.sql(), "SELECT course_name FROM Course");
    }

    #[test]
    fn test_semicolon_inside_literal_or_comment_is_ignored() {
        let stmt = validator()
            .validate("SELECT course_name FROM Course WHERE course_name = 'a;b' /* x; y */", &student(1))
            .unwrap();
        assert!(stmt.sql().contains("'a;b'"));
        assert!(validator()
            .validate("SELECT course_name FROM Course WHERE course_name = 'it''s; fine'", &student(1))
            .is_ok());
    }

    #[test]
    fn test_sensitive_column() {
        assert_eq!(
            validator().validate("SELECT password FROM Users", &student(1)),
            Err(ValidationError::SensitiveColumnAccess("password".to_string()))
        );
        assert_eq!(
            validator().validate("SELECT u.PASSWORD FROM Users u", &student(1)),
            Err(ValidationError::SensitiveColumnAccess("PASSWORD".to_string()))
        );
    }

    #[test]
    fn test_placeholder_substitution_format_style() {
        let v = validator().with_param_style(ParamStyle::Format);
        let stmt = v.validate("SELECT * FROM Enrollment WHERE student_id = {user_id}", &student(42)).unwrap();
        assert_eq!(stmt.sql(), "SELECT * FROM Enrollment WHERE student_id = %s");
        assert_eq!(stmt.params(), &[ParamValue::Int(42)]);
    }

    #[test]
    fn test_every_occurrence_becomes_a_parameter() {
        let stmt = validator()
            .validate(
                "SELECT c.course_name, s.total_score FROM Course c \
                 JOIN Enrollment e ON c.course_id = e.course_id \
                 LEFT JOIN Score s ON s.course_id = c.course_id AND s.student_id = {user_id} \
                 WHERE e.student_id = {user_id}",
                &student(7),
            )
            .unwrap();
        assert_eq!(stmt.sql().matches('?').count(), 2);
        assert_eq!(stmt.params(), &[ParamValue::Int(7), ParamValue::Int(7)]);
    }

    #[test]
    fn test_instructor_bindings_keep_textual_order() {
        let v = validator().with_param_style(ParamStyle::Numeric);
        let bindings = vec![
            ScopeBinding::new(USER_PLACEHOLDER, 3),
            ScopeBinding::new(INSTRUCTOR_PLACEHOLDER, 10),
        ];
        let stmt = v
            .validate(
                "SELECT s.total_score FROM Score s JOIN Course c ON c.course_id = s.course_id \
                 WHERE c.instructor_id = {instructor_id} AND s.student_id = '{user_id}'",
                &bindings,
            )
            .unwrap();
        assert!(stmt.sql().ends_with("c.instructor_id = $1 AND s.student_id = $2"));
        assert_eq!(stmt.params(), &[ParamValue::Int(10), ParamValue::Int(3)]);
    }

    #[test]
    fn test_missing_placeholder_is_accepted_by_default() {
        let stmt = validator().validate("SELECT COUNT(*) FROM Course", &student(1)).unwrap();
        assert!(stmt.params().is_empty());
    }

    #[test]
    fn test_missing_placeholder_can_be_required() {
        let v = validator().require_scope_placeholder(true);
        assert_eq!(
            v.validate("SELECT COUNT(*) FROM Course", &student(1)),
            Err(ValidationError::MissingScopePlaceholder("{user_id}".to_string()))
        );
    }

    #[test]
    fn test_unknown_table_is_rejected() {
        assert_eq!(
            validator().validate("SELECT name FROM sqlite_master", &student(1)),
            Err(ValidationError::UnknownTable("sqlite_master".to_string()))
        );
        assert!(matches!(
            validator().validate("SELECT * FROM Course WHERE course_id IN (SELECT course_id FROM secrets)", &student(1)),
            Err(ValidationError::UnknownTable(_))
        ));
    }

    #[test]
    fn test_unparseable_is_rejected() {
        assert!(matches!(
            validator().validate("SELECT * FROM Course WHERE (course_id = 1", &student(1)),
            Err(ValidationError::UnparseableStatement(_))
        ));
    }

    #[test]
    fn test_configured_keywords_replace_defaults() {
        let v = validator().with_denied_keywords(&["UNION"]).unwrap();
        assert_eq!(
            v.validate("SELECT course_id FROM Course UNION SELECT course_id FROM Enrollment", &student(1)),
            Err(ValidationError::DisallowedKeyword("UNION".to_string()))
        );
    }

    #[test]
    fn test_placeholder_inside_literal_text_binds_nothing() {
        let stmt = validator()
            .validate(
                "SELECT course_id FROM Enrollment WHERE student_id = {user_id} AND status <> 'x{user_id}'",
                &student(1),
            )
            .unwrap();
        assert_eq!(stmt.sql(), "SELECT course_id FROM Enrollment WHERE student_id = ? AND status <> 'x{user_id}'");
        assert_eq!(stmt.params(), &[ParamValue::Int(1)]);
        assert_eq!(stmt.sql().matches('?').count(), stmt.params().len());
    }

    #[test]
    fn test_placeholder_in_comment_binds_nothing() {
        let v = validator().require_scope_placeholder(true);
        assert_eq!(
            v.validate("SELECT COUNT(*) FROM Course -- student {user_id}", &student(1)),
            Err(ValidationError::MissingScopePlaceholder("{user_id}".to_string()))
        );
        let stmt = validator()
            .validate("SELECT COUNT(*) FROM Enrollment /* {user_id} */ WHERE student_id = '{user_id}'", &student(4))
            .unwrap();
        assert_eq!(stmt.sql(), "SELECT COUNT(*) FROM Enrollment /* {user_id} */ WHERE student_id = ?");
        assert_eq!(stmt.params(), &[ParamValue::Int(4)]);
    }

    #[test]
    fn test_hidden_spans_cover_escaped_quotes() {
        let sql = "SELECT 'it''s' AS a, x -- tail";
        let spans = hidden_spans(sql);
        assert_eq!(spans.len(), 2);
        assert_eq!(&sql[spans[0].clone()], "'it''s'");
        assert_eq!(&sql[spans[1].clone()], "-- tail");
    }

    #[test]
    fn test_mask_keeps_offsets() {
        let sql = "SELECT 'a;b', \"c\" -- d;\nFROM t";
        let masked = mask_literals_and_comments(sql);
        assert_eq!(masked.len(), sql.len());
        assert!(!masked.contains(';'));
        assert!(masked.ends_with("FROM t"));
    }
}
