//! Store Module - SmartSQL relational data on SQLite
//!
//! Owns the connection pool, the schema, the handful of course/enrollment
//! operations the HTTP layer exposes, and read-only execution of validated
//! assistant statements.

pub mod schema;

use std::str::FromStr;

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{Number, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Executor, Row as _, SqlitePool, TypeInfo, ValueRef};
use tracing::{debug, error, info, warn};

use crate::assistant::executor::{ExecutionError, QueryExecutor, ResultSet, Row};
use crate::assistant::scope::{Role, TeachingDirectory};
use crate::assistant::validator::{ParamValue, ValidatedStatement};
use crate::config::DatabaseConfig;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Invalid(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        let status = match &self {
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::Forbidden(_) => StatusCode::FORBIDDEN,
            StoreError::Conflict(_) => StatusCode::CONFLICT,
            StoreError::Invalid(_) => StatusCode::BAD_REQUEST,
            StoreError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = match &self {
            StoreError::Database(e) => {
                error!("database error: {}", e);
                "internal database error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserRecord {
    pub user_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct CourseSummary {
    pub course_id: i64,
    pub course_name: String,
    pub course_code: String,
    pub course_description: Option<String>,
    pub year: Option<i64>,
    pub term: Option<i64>,
    pub state: String,
    pub instructor_id: i64,
    pub instructor_name: String,
    pub total_modules: i64,
    pub total_exercises: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct StudentSummary {
    pub student_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub email: String,
    pub course_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionOutcome {
    pub exercise_id: i64,
    pub is_correct: bool,
    pub score: f64,
    pub submission_count: i64,
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open the pool described by `[database]`.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // Every in-memory connection is its own database, so keep exactly one
        // and never let the pool recycle it.
        let pool = if is_in_memory(&config.url) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(config.max_connections.max(1))
                .connect_with(options)
                .await?
        };

        info!(url = %config.url, "database pool ready");
        Ok(Self { pool })
    }

    /// Fresh in-memory database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::connect(&DatabaseConfig { url: "sqlite::memory:".to_string(), max_connections: 1 }).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the SmartSQL tables if they do not exist.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for ddl in schema::SCHEMA {
            sqlx::query(ddl).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        info!(tables = schema::SCHEMA.len(), "schema migrated");
        Ok(())
    }

    /// Load the demo fixture when the database has no users yet.
    /// Returns whether anything was inserted.
    pub async fn seed_demo(&self) -> Result<bool, StoreError> {
        let users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM Users")
            .fetch_one(&self.pool)
            .await?;
        if users > 0 {
            info!("users already exist, skipping demo data");
            return Ok(false);
        }

        let mut tx = self.pool.begin().await?;
        for statement in schema::DEMO_DATA {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        info!("demo data loaded");
        Ok(true)
    }

    pub async fn find_user(&self, user_id: i64) -> Result<Option<UserRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT user_id, first_name, last_name, username, email, user_type FROM Users WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let user_type: String = row.try_get("user_type")?;
        Ok(Some(UserRecord {
            user_id: row.try_get("user_id")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            username: row.try_get("username")?,
            email: row.try_get("email")?,
            role: user_type.parse().map_err(StoreError::Invalid)?,
        }))
    }

    /// True when the student holds an active enrollment in a course the
    /// instructor teaches.
    pub async fn instructor_teaches_student(&self, instructor_id: i64, student_id: i64) -> Result<bool, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM Enrollment e
             JOIN Course c ON c.course_id = e.course_id
             WHERE c.instructor_id = ? AND e.student_id = ? AND e.status = 'enrolled'",
        )
        .bind(instructor_id)
        .bind(student_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    pub async fn instructor_students(&self, instructor_id: i64) -> Result<Vec<StudentSummary>, StoreError> {
        let students = sqlx::query_as::<_, StudentSummary>(
            "SELECT u.user_id AS student_id, u.first_name, u.last_name, u.username, u.email,
                    COUNT(DISTINCT e.course_id) AS course_count
             FROM Enrollment e
             JOIN Course c ON c.course_id = e.course_id
             JOIN Users u ON u.user_id = e.student_id
             WHERE c.instructor_id = ? AND e.status = 'enrolled'
             GROUP BY u.user_id, u.first_name, u.last_name, u.username, u.email
             ORDER BY u.last_name, u.first_name",
        )
        .bind(instructor_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(students)
    }

    pub async fn student_courses(&self, student_id: i64) -> Result<Vec<CourseSummary>, StoreError> {
        let courses = sqlx::query_as::<_, CourseSummary>(
            "SELECT c.course_id, c.course_name, c.course_code, c.course_description, c.year, c.term, c.state,
                    i.user_id AS instructor_id,
                    i.first_name || ' ' || i.last_name AS instructor_name,
                    (SELECT COUNT(*) FROM Module m WHERE m.course_id = c.course_id) AS total_modules,
                    (SELECT COUNT(*) FROM Module_Exercise me
                       JOIN Module m ON m.module_id = me.module_id
                      WHERE m.course_id = c.course_id) AS total_exercises
             FROM Course c
             JOIN Enrollment e ON e.course_id = c.course_id
             JOIN Users i ON i.user_id = c.instructor_id
             WHERE e.student_id = ? AND e.status = 'enrolled'
             ORDER BY c.year DESC, c.term DESC, c.course_id",
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(courses)
    }

    /// Enroll a student in an active course. A dropped enrollment is
    /// reactivated; an active one is a conflict.
    pub async fn enroll(&self, student_id: i64, course_id: i64) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let state: Option<String> = sqlx::query_scalar("SELECT state FROM Course WHERE course_id = ?")
            .bind(course_id)
            .fetch_optional(&mut *tx)
            .await?;
        match state.as_deref() {
            None => return Err(StoreError::NotFound(format!("course {} not found", course_id))),
            Some("active") => {}
            Some(_) => return Err(StoreError::Invalid(format!("course {} is not open for enrollment", course_id))),
        }

        let existing: Option<String> =
            sqlx::query_scalar("SELECT status FROM Enrollment WHERE student_id = ? AND course_id = ?")
                .bind(student_id)
                .bind(course_id)
                .fetch_optional(&mut *tx)
                .await?;
        match existing.as_deref() {
            Some("enrolled") => {
                return Err(StoreError::Conflict(format!("already enrolled in course {}", course_id)));
            }
            Some(_) => {
                sqlx::query("UPDATE Enrollment SET status = 'enrolled' WHERE student_id = ? AND course_id = ?")
                    .bind(student_id)
                    .bind(course_id)
                    .execute(&mut *tx)
                    .await?;
            }
            None => {
                sqlx::query("INSERT INTO Enrollment (student_id, course_id, status) VALUES (?, ?, 'enrolled')")
                    .bind(student_id)
                    .bind(course_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        info!(student_id, course_id, "student enrolled");
        Ok(())
    }

    /// Grade and record an exercise answer.
    pub async fn submit_exercise(
        &self,
        student_id: i64,
        exercise_id: i64,
        answer: &str,
    ) -> Result<SubmissionOutcome, StoreError> {
        if answer.trim().is_empty() {
            return Err(StoreError::Invalid("answer is required".to_string()));
        }

        let mut tx = self.pool.begin().await?;

        let expected: Option<String> = sqlx::query_scalar("SELECT expected_answer FROM Exercise WHERE exercise_id = ?")
            .bind(exercise_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(expected) = expected else {
            return Err(StoreError::NotFound(format!("exercise {} not found", exercise_id)));
        };

        let courses: Vec<i64> = sqlx::query_scalar(
            "SELECT DISTINCT m.course_id FROM Module_Exercise me
             JOIN Module m ON m.module_id = me.module_id
             WHERE me.exercise_id = ?",
        )
        .bind(exercise_id)
        .fetch_all(&mut *tx)
        .await?;

        if !courses.is_empty() {
            let mut enrolled = false;
            for course_id in &courses {
                let count: i64 = sqlx::query_scalar(
                    "SELECT COUNT(*) FROM Enrollment WHERE student_id = ? AND course_id = ? AND status = 'enrolled'",
                )
                .bind(student_id)
                .bind(*course_id)
                .fetch_one(&mut *tx)
                .await?;
                if count > 0 {
                    enrolled = true;
                    break;
                }
            }
            if !enrolled {
                return Err(StoreError::Forbidden(
                    "you are not enrolled in a course containing this exercise".to_string(),
                ));
            }
        }

        let is_correct = normalize_answer(answer) == normalize_answer(&expected);
        let score = if is_correct { 100.0 } else { 0.0 };

        sqlx::query(
            "INSERT INTO Student_Exercise
                (student_id, exercise_id, submitted_answer, is_correct, score, submission_count, completed_at)
             VALUES (?, ?, ?, ?, ?, 1, ?)
             ON CONFLICT (student_id, exercise_id) DO UPDATE SET
                submitted_answer = excluded.submitted_answer,
                is_correct = excluded.is_correct,
                score = excluded.score,
                submission_count = Student_Exercise.submission_count + 1,
                completed_at = excluded.completed_at",
        )
        .bind(student_id)
        .bind(exercise_id)
        .bind(answer)
        .bind(is_correct)
        .bind(score)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        let submission_count: i64 = sqlx::query_scalar(
            "SELECT submission_count FROM Student_Exercise WHERE student_id = ? AND exercise_id = ?",
        )
        .bind(student_id)
        .bind(exercise_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(student_id, exercise_id, is_correct, "exercise submitted");
        Ok(SubmissionOutcome { exercise_id, is_correct, score, submission_count })
    }
}

#[async_trait]
impl TeachingDirectory for Store {
    async fn instructor_teaches_student(&self, instructor_id: i64, student_id: i64) -> Result<bool, StoreError> {
        Store::instructor_teaches_student(self, instructor_id, student_id).await
    }
}

#[async_trait]
impl QueryExecutor for Store {
    /// Runs inside a transaction that is always rolled back, so nothing the
    /// statement does persists and the connection returns to the pool.
    async fn execute(&self, statement: &ValidatedStatement) -> Result<ResultSet, ExecutionError> {
        let mut tx = self.pool.begin().await.map_err(execution_error)?;
        let outcome = run_statement(&mut tx, statement).await;
        if let Err(e) = tx.rollback().await {
            warn!("rollback after assistant query failed: {}", e);
        }
        outcome.map_err(execution_error)
    }
}

async fn run_statement(conn: &mut SqliteConnection, statement: &ValidatedStatement) -> Result<ResultSet, sqlx::Error> {
    let mut query = sqlx::query(statement.sql());
    for param in statement.params() {
        query = match param {
            ParamValue::Int(v) => query.bind(*v),
            ParamValue::Text(s) => query.bind(s.clone()),
        };
    }

    let fetched = query.fetch_all(&mut *conn).await?;
    let columns: Vec<String> = match fetched.first() {
        Some(first) => first.columns().iter().map(|c| c.name().to_string()).collect(),
        None => (&mut *conn)
            .describe(statement.sql())
            .await?
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect(),
    };

    let rows = fetched.iter().map(decode_row).collect::<Result<Vec<_>, _>>()?;
    Ok(ResultSet { columns, rows })
}

/// Map one SQLite row to JSON by the storage class of each value.
fn decode_row(row: &SqliteRow) -> Result<Row, sqlx::Error> {
    let mut record = Row::new();
    for (i, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(i)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            let type_info = raw.type_info();
            match type_info.name() {
                "INTEGER" | "INT8" | "BIGINT" => Value::from(row.try_get_unchecked::<i64, _>(i)?),
                "REAL" | "NUMERIC" => Number::from_f64(row.try_get_unchecked::<f64, _>(i)?)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
                "BOOLEAN" => Value::Bool(row.try_get_unchecked::<bool, _>(i)?),
                "BLOB" => Value::String(to_hex(&row.try_get_unchecked::<Vec<u8>, _>(i)?)),
                _ => Value::String(row.try_get_unchecked::<String, _>(i)?),
            }
        };
        record.insert(column.name().to_string(), value);
    }
    Ok(record)
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn execution_error(err: sqlx::Error) -> ExecutionError {
    match err {
        sqlx::Error::Database(db) => ExecutionError::Rejected(db.message().to_string()),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
            ExecutionError::Rejected(err.to_string())
        }
        other => ExecutionError::Unavailable(other.to_string()),
    }
}

fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

/// Trimmed, lowercased, runs of whitespace collapsed to one space.
pub fn normalize_answer(answer: &str) -> String {
    answer.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::validator::{ParamStyle, SqlValidator};
    use crate::assistant::scope::{ScopeBinding, USER_PLACEHOLDER};
    use crate::assistant::catalog::SchemaCatalog;

    async fn seeded() -> Store {
        let store = Store::in_memory().await.unwrap();
        store.migrate().await.unwrap();
        assert!(store.seed_demo().await.unwrap());
        store
    }

    fn statement(sql: &str, student_id: i64) -> ValidatedStatement {
        SqlValidator::new(SchemaCatalog::smartsql())
            .unwrap()
            .with_param_style(ParamStyle::Qmark)
            .validate(sql, &[ScopeBinding::new(USER_PLACEHOLDER, student_id)])
            .unwrap()
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent_and_seed_runs_once() {
        let store = seeded().await;
        store.migrate().await.unwrap();
        assert!(!store.seed_demo().await.unwrap());
    }

    #[tokio::test]
    async fn test_find_user() {
        let store = seeded().await;
        let user = store.find_user(10).await.unwrap().unwrap();
        assert_eq!(user.role, Role::Instructor);
        assert_eq!(user.username, "dsmith");
        assert!(store.find_user(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_teaching_relationship_requires_active_enrollment() {
        let store = seeded().await;
        assert!(store.instructor_teaches_student(10, 1).await.unwrap());
        assert!(store.instructor_teaches_student(11, 3).await.unwrap());
        // student 3 dropped instructor 10's course
        assert!(!store.instructor_teaches_student(10, 3).await.unwrap());
    }

    #[tokio::test]
    async fn test_instructor_students_and_student_courses() {
        let store = seeded().await;
        let students = store.instructor_students(10).await.unwrap();
        let ids: Vec<i64> = students.iter().map(|s| s.student_id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&1) && ids.contains(&2));

        let courses = store.student_courses(1).await.unwrap();
        assert_eq!(courses.len(), 2);
        let intro = courses.iter().find(|c| c.course_id == 100).unwrap();
        assert_eq!(intro.total_modules, 2);
        assert_eq!(intro.total_exercises, 2);
        assert_eq!(intro.instructor_name, "Dana Smith");
    }

    #[tokio::test]
    async fn test_enroll_rules() {
        let store = seeded().await;
        store.enroll(2, 200).await.unwrap();
        assert!(matches!(store.enroll(2, 200).await, Err(StoreError::Conflict(_))));
        assert!(matches!(store.enroll(2, 201).await, Err(StoreError::Invalid(_))));
        assert!(matches!(store.enroll(2, 999).await, Err(StoreError::NotFound(_))));
        // dropped enrollment comes back
        store.enroll(3, 101).await.unwrap();
        assert!(store.instructor_teaches_student(10, 3).await.unwrap());
    }

    #[tokio::test]
    async fn test_submit_exercise_grades_and_counts() {
        let store = seeded().await;
        let first = store.submit_exercise(2, 1, "select *  from student").await.unwrap();
        assert!(!first.is_correct);
        assert_eq!(first.submission_count, 3);

        let second = store.submit_exercise(2, 1, "  select COUNT(*)\n from   Student ").await.unwrap();
        assert!(second.is_correct);
        assert_eq!(second.score, 100.0);
        assert_eq!(second.submission_count, 4);

        let fresh = store.submit_exercise(3, 3, "SELECT 1").await.unwrap();
        assert_eq!(fresh.submission_count, 1);
    }

    #[tokio::test]
    async fn test_submit_exercise_errors() {
        let store = seeded().await;
        assert!(matches!(store.submit_exercise(1, 99, "x").await, Err(StoreError::NotFound(_))));
        // exercise 1 lives in course 100; student 3 is not enrolled there
        assert!(matches!(store.submit_exercise(3, 1, "x").await, Err(StoreError::Forbidden(_))));
        assert!(matches!(store.submit_exercise(1, 1, "   ").await, Err(StoreError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_execute_binds_params_and_decodes_values() {
        let store = seeded().await;
        let stmt = statement(
            "SELECT student_id, exercise_id, score, completed_at FROM Student_Exercise \
             WHERE student_id = {user_id} ORDER BY exercise_id",
            1,
        );
        let result = store.execute(&stmt).await.unwrap();
        assert_eq!(result.columns, vec!["student_id", "exercise_id", "score", "completed_at"]);
        assert_eq!(result.len(), 2);
        assert_eq!(result.rows[0]["student_id"], serde_json::json!(1));
        assert_eq!(result.rows[0]["score"], serde_json::json!(100.0));
        assert_eq!(result.rows[0]["completed_at"], serde_json::json!("2024-10-01T10:00:00Z"));
    }

    #[tokio::test]
    async fn test_execute_empty_result_keeps_columns() {
        let store = seeded().await;
        let stmt = statement("SELECT course_id, status FROM Enrollment WHERE student_id = {user_id}", 999);
        let result = store.execute(&stmt).await.unwrap();
        assert!(result.is_empty());
        assert_eq!(result.columns, vec!["course_id", "status"]);
    }

    #[tokio::test]
    async fn test_execute_null_and_blob_values() {
        let store = seeded().await;
        let stmt = statement("SELECT NULL AS missing, x'cafe' AS payload, 2.5 AS ratio", 1);
        let result = store.execute(&stmt).await.unwrap();
        assert_eq!(result.rows[0]["missing"], Value::Null);
        assert_eq!(result.rows[0]["payload"], serde_json::json!("cafe"));
        assert_eq!(result.rows[0]["ratio"], serde_json::json!(2.5));
    }

    #[tokio::test]
    async fn test_execute_rejected_statement_is_execution_error() {
        let store = seeded().await;
        let stmt = statement("SELECT no_such_column FROM Course", 1);
        assert!(matches!(store.execute(&stmt).await, Err(ExecutionError::Rejected(_))));
        // the connection went back to the pool
        assert!(store.find_user(1).await.unwrap().is_some());
    }

    #[test]
    fn test_normalize_answer() {
        assert_eq!(normalize_answer("  SELECT *\n\tFROM  Users "), "select * from users");
    }
}
