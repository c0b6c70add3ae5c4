//! Assistant orchestrator
//!
//! One request walks `ResolvingScope -> Generating -> Validating -> Executing
//! -> Summarizing -> Done`. Every stage returns a `Result`; the first failure
//! moves the request to `Error` and nothing after it runs.

use std::fmt;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn, Instrument};

use crate::ai::{AiError, CompletionRequest, LlmProvider};
use crate::assistant::catalog::SchemaCatalog;
use crate::assistant::executor::{ExecutionError, QueryExecutor, Row};
use crate::assistant::prompt::{PromptBuilder, GENERAL_SYSTEM_PROMPT, GENERATION_SYSTEM_PROMPT};
use crate::assistant::scope::{resolve_scope, CallerContext, PermissionError, ResolvedScope, Role, ScopeError, TeachingDirectory};
use crate::assistant::summarizer::ResultSummarizer;
use crate::assistant::validator::{ParamValue, SqlValidator, ValidationError};
use crate::config::{Config, SamplingConfig};
use crate::store::StoreError;

/// Upper bound on rows echoed back in `thought_process`.
const MAX_DEBUG_PREVIEW: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    ResolvingScope,
    Generating,
    Validating,
    Executing,
    Summarizing,
    Done,
    Error,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::ResolvingScope => "resolving_scope",
            PipelineStage::Generating => "generating",
            PipelineStage::Validating => "validating",
            PipelineStage::Executing => "executing",
            PipelineStage::Summarizing => "summarizing",
            PipelineStage::Done => "done",
            PipelineStage::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    #[error(transparent)]
    Permission(#[from] PermissionError),
    #[error("could not generate a query")]
    GenerationEmpty,
    #[error("the assistant returned an empty answer")]
    EmptyAnswer,
    #[error("AI service unavailable: {0}")]
    GenerationService(AiError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error("AI service unavailable while summarizing results: {0}")]
    Summarization(AiError),
    #[error("teaching relationship lookup failed: {0}")]
    Directory(StoreError),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
}

impl AssistantError {
    /// Stage the request was in when it failed.
    pub fn stage(&self) -> PipelineStage {
        match self {
            AssistantError::Permission(_) | AssistantError::Directory(_) => PipelineStage::ResolvingScope,
            AssistantError::GenerationEmpty
            | AssistantError::EmptyAnswer
            | AssistantError::GenerationService(_) => PipelineStage::Generating,
            AssistantError::Validation(_) => PipelineStage::Validating,
            AssistantError::Execution(_) => PipelineStage::Executing,
            AssistantError::Summarization(_) => PipelineStage::Summarizing,
            AssistantError::NotFound(_) | AssistantError::BadRequest(_) => PipelineStage::Error,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AssistantError::Permission(_) => StatusCode::FORBIDDEN,
            AssistantError::GenerationEmpty
            | AssistantError::Validation(_)
            | AssistantError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AssistantError::GenerationService(_)
            | AssistantError::EmptyAnswer
            | AssistantError::Summarization(_) => StatusCode::SERVICE_UNAVAILABLE,
            AssistantError::NotFound(_) => StatusCode::NOT_FOUND,
            AssistantError::Execution(_) | AssistantError::Directory(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand to the end user. Database and provider
    /// details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            AssistantError::Permission(e) => e.to_string(),
            AssistantError::GenerationEmpty => "could not generate a query".to_string(),
            AssistantError::EmptyAnswer => "AI service returned an empty answer".to_string(),
            AssistantError::GenerationService(_) => "AI service unavailable".to_string(),
            AssistantError::Validation(e) => format!("generated query rejected: {}", e),
            AssistantError::Execution(_) | AssistantError::Directory(_) => {
                "internal error while running the query".to_string()
            }
            AssistantError::Summarization(_) => "AI service unavailable while summarizing results".to_string(),
            AssistantError::NotFound(msg) | AssistantError::BadRequest(msg) => msg.clone(),
        }
    }
}

impl From<ScopeError> for AssistantError {
    fn from(err: ScopeError) -> Self {
        match err {
            ScopeError::Permission(e) => AssistantError::Permission(e),
            ScopeError::Directory(e) => AssistantError::Directory(e),
        }
    }
}

impl IntoResponse for AssistantError {
    fn into_response(self) -> Response {
        (self.status(), Json(serde_json::json!({ "error": self.public_message() }))).into_response()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    System,
    #[default]
    General,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub mode: ChatMode,
    #[serde(default)]
    pub selected_student_id: Option<i64>,
    #[serde(default)]
    pub debug: bool,
}

impl ChatRequest {
    pub fn system(message: impl Into<String>) -> Self {
        Self { message: message.into(), mode: ChatMode::System, selected_student_id: None, debug: false }
    }

    pub fn general(message: impl Into<String>) -> Self {
        Self { message: message.into(), mode: ChatMode::General, selected_student_id: None, debug: false }
    }

    pub fn with_student(mut self, student_id: i64) -> Self {
        self.selected_student_id = Some(student_id);
        self
    }

    pub fn with_debug(mut self) -> Self {
        self.debug = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThoughtProcess {
    pub generated_sql: String,
    pub executed_sql: String,
    pub params_used: Vec<ParamValue>,
    pub results_count: usize,
    pub raw_results_preview: Vec<Row>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatResponse {
    pub reply: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought_process: Option<ThoughtProcess>,
}

/// Knobs pulled from `[llm]` and `[assistant]`.
#[derive(Debug, Clone)]
struct Settings {
    generation: SamplingConfig,
    general: SamplingConfig,
    enforce_row_ownership: bool,
    allow_debug: bool,
    debug_preview_rows: usize,
}

pub struct Assistant {
    provider: Arc<dyn LlmProvider>,
    executor: Arc<dyn QueryExecutor>,
    directory: Arc<dyn TeachingDirectory>,
    prompts: PromptBuilder,
    validator: SqlValidator,
    summarizer: ResultSummarizer,
    settings: Settings,
}

impl Assistant {
    pub fn new(
        config: &Config,
        provider: Arc<dyn LlmProvider>,
        executor: Arc<dyn QueryExecutor>,
        directory: Arc<dyn TeachingDirectory>,
    ) -> Result<Self, regex::Error> {
        let assistant = &config.assistant;
        let catalog = SchemaCatalog::from_config(&assistant.schema_catalog);
        let validator = SqlValidator::from_config(catalog.clone(), assistant)?;

        Ok(Self {
            summarizer: ResultSummarizer::new(provider.clone(), config.llm.summary.clone()),
            provider,
            executor,
            directory,
            prompts: PromptBuilder::new(catalog, assistant.summary_preview_rows),
            validator,
            settings: Settings {
                generation: config.llm.generation.clone(),
                general: config.llm.general.clone(),
                enforce_row_ownership: assistant.enforce_row_ownership,
                allow_debug: assistant.allow_debug,
                debug_preview_rows: assistant.debug_preview_rows.min(MAX_DEBUG_PREVIEW),
            },
        })
    }

    /// Answer one chat message for an authenticated caller.
    pub async fn chat(
        &self,
        request_id: &str,
        caller: CallerContext,
        request: &ChatRequest,
    ) -> Result<ChatResponse, AssistantError> {
        if request.message.trim().is_empty() {
            return Err(AssistantError::BadRequest("message is required".to_string()));
        }

        let span = tracing::info_span!(
            "assistant",
            request_id = %request_id,
            user_id = caller.user_id,
            role = %caller.role,
        );

        async move {
            let outcome = match request.mode {
                ChatMode::General => self.answer_general(&request.message).await,
                ChatMode::System => self.answer_from_data(caller, request).await,
            };
            match &outcome {
                Ok(_) => info!(stage = %PipelineStage::Done, "assistant request completed"),
                Err(e) => warn!(stage = %PipelineStage::Error, failed_at = %e.stage(), error = %e, "assistant request failed"),
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn answer_general(&self, question: &str) -> Result<ChatResponse, AssistantError> {
        let request = CompletionRequest::new(question.trim())
            .with_system(GENERAL_SYSTEM_PROMPT)
            .with_temperature(self.settings.general.temperature)
            .with_max_tokens(self.settings.general.max_tokens)
            .with_stop(self.settings.general.stop.clone());

        let reply = match self.provider.complete(&request).await {
            Ok(reply) => reply,
            Err(AiError::EmptyResponse(_)) => return Err(AssistantError::EmptyAnswer),
            Err(e) => return Err(AssistantError::GenerationService(e)),
        };
        if reply.trim().is_empty() {
            return Err(AssistantError::EmptyAnswer);
        }
        Ok(ChatResponse { reply: reply.trim().to_string(), thought_process: None })
    }

    async fn answer_from_data(&self, caller: CallerContext, request: &ChatRequest) -> Result<ChatResponse, AssistantError> {
        debug!(stage = %PipelineStage::ResolvingScope);
        let scope = resolve_scope(caller, self.directory.as_ref()).await?;

        debug!(stage = %PipelineStage::Generating, target_id = scope.target_id);
        let generated = self.generate(&scope, &request.message).await?;

        debug!(stage = %PipelineStage::Validating);
        let statement = match self.validator.validate_for(&generated, &scope) {
            Ok(statement) => statement,
            Err(e) => {
                warn!(reason = %e, sql = %generated, "rejected generated SQL");
                return Err(e.into());
            }
        };

        debug!(stage = %PipelineStage::Executing, params = statement.params().len());
        let mut results = self.executor.execute(&statement).await.map_err(|e| {
            warn!(error = %e, sql = %statement.sql(), "query execution failed");
            AssistantError::Execution(e)
        })?;

        if self.settings.enforce_row_ownership {
            if let Some(student_id) = scope.scoped_student() {
                let removed = results.retain_student(student_id);
                if removed > 0 {
                    warn!(removed, student_id, "dropped rows outside the caller's scope");
                }
            }
        }

        debug!(stage = %PipelineStage::Summarizing, rows = results.len());
        let note = context_note(&scope);
        let reply = self
            .summarizer
            .summarize(&self.prompts, scope.role(), &request.message, &results.rows, note.as_deref())
            .await
            .map_err(AssistantError::Summarization)?;

        let thought_process = (request.debug && self.settings.allow_debug).then(|| ThoughtProcess {
            generated_sql: generated.clone(),
            executed_sql: statement.sql().to_string(),
            params_used: statement.params().to_vec(),
            results_count: results.len(),
            raw_results_preview: results.rows.iter().take(self.settings.debug_preview_rows).cloned().collect(),
        });

        Ok(ChatResponse { reply, thought_process })
    }

    async fn generate(&self, scope: &ResolvedScope, question: &str) -> Result<String, AssistantError> {
        let prompt = self.prompts.build_generation_prompt(scope, question);
        let request = CompletionRequest::new(prompt)
            .with_system(GENERATION_SYSTEM_PROMPT)
            .with_temperature(self.settings.generation.temperature)
            .with_max_tokens(self.settings.generation.max_tokens)
            .with_stop(self.settings.generation.stop.clone());

        let raw = self.provider.complete(&request).await.map_err(generation_error)?;
        if raw.trim().is_empty() {
            return Err(AssistantError::GenerationEmpty);
        }
        Ok(raw)
    }
}

fn generation_error(err: AiError) -> AssistantError {
    match err {
        AiError::EmptyResponse(_) => AssistantError::GenerationEmpty,
        other => AssistantError::GenerationService(other),
    }
}

fn context_note(scope: &ResolvedScope) -> Option<String> {
    match (scope.role(), scope.caller.target_id) {
        (Role::Instructor, Some(student_id)) => {
            Some(format!("Results are limited to student {} in the instructor's courses.", student_id))
        }
        (Role::Instructor, None) => Some("Results cover the instructor's own courses.".to_string()),
        (Role::Student, _) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::executor::ResultSet;
    use crate::assistant::validator::ValidatedStatement;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned completions and counts calls.
    struct ScriptedProvider {
        replies: Mutex<VecDeque<Result<String, AiError>>>,
        calls: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<Result<String, AiError>>) -> Arc<Self> {
            Arc::new(Self { replies: Mutex::new(replies.into()), calls: Mutex::new(Vec::new()) })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn complete(&self, request: &CompletionRequest) -> Result<String, AiError> {
            self.calls.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(AiError::ProviderUnavailable("script exhausted".into())))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    struct CannedExecutor {
        rows: Vec<Row>,
        seen: Mutex<Vec<ValidatedStatement>>,
    }

    impl CannedExecutor {
        fn new(rows: Vec<Row>) -> Arc<Self> {
            Arc::new(Self { rows, seen: Mutex::new(Vec::new()) })
        }
    }

    #[async_trait]
    impl QueryExecutor for CannedExecutor {
        async fn execute(&self, statement: &ValidatedStatement) -> Result<ResultSet, ExecutionError> {
            self.seen.lock().unwrap().push(statement.clone());
            let columns = self.rows.first().map(|r| r.keys().cloned().collect()).unwrap_or_default();
            Ok(ResultSet { columns, rows: self.rows.clone() })
        }
    }

    /// Instructor 10 teaches student 1 only.
    struct OneStudent;

    #[async_trait]
    impl TeachingDirectory for OneStudent {
        async fn instructor_teaches_student(&self, instructor_id: i64, student_id: i64) -> Result<bool, StoreError> {
            Ok(instructor_id == 10 && student_id == 1)
        }
    }

    fn score_row(student_id: i64, score: f64) -> Row {
        let mut row = Row::new();
        row.insert("student_id".into(), json!(student_id));
        row.insert("score".into(), json!(score));
        row
    }

    fn assistant(provider: Arc<ScriptedProvider>, executor: Arc<CannedExecutor>) -> Assistant {
        Assistant::new(&Config::default(), provider, executor, Arc::new(OneStudent)).unwrap()
    }

    #[tokio::test]
    async fn test_student_question_binds_own_id() {
        let provider = ScriptedProvider::new(vec![
            Ok("```sql\nSELECT COUNT(*) AS n FROM Enrollment WHERE student_id = {user_id}\n```".into()),
            Ok("You are enrolled in 2 courses.".into()),
        ]);
        let executor = CannedExecutor::new(vec![]);
        let assistant = assistant(provider.clone(), executor.clone());

        let response = assistant
            .chat("req-1", CallerContext::new(7, Role::Student, None), &ChatRequest::system("How many courses am I enrolled in?"))
            .await
            .unwrap();

        assert_eq!(response.reply, "You are enrolled in 2 courses.");
        assert!(response.thought_process.is_none());
        let seen = executor.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].params(), &[ParamValue::Int(7)]);
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_unrelated_student_fails_before_any_completion() {
        let provider = ScriptedProvider::new(vec![]);
        let executor = CannedExecutor::new(vec![]);
        let assistant = assistant(provider.clone(), executor.clone());

        let err = assistant
            .chat("req-2", CallerContext::new(10, Role::Instructor, Some(2)), &ChatRequest::system("scores?").with_student(2))
            .await
            .unwrap_err();

        assert!(matches!(err, AssistantError::Permission(PermissionError::NotTeaching(2))));
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert_eq!(err.stage(), PipelineStage::ResolvingScope);
        assert_eq!(provider.call_count(), 0);
        assert!(executor.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_validation_failure_never_executes() {
        let provider = ScriptedProvider::new(vec![Ok("DELETE FROM Score".into())]);
        let executor = CannedExecutor::new(vec![]);
        let assistant = assistant(provider.clone(), executor.clone());

        let err = assistant
            .chat("req-3", CallerContext::new(7, Role::Student, None), &ChatRequest::system("wipe my scores"))
            .await
            .unwrap_err();

        assert!(matches!(err, AssistantError::Validation(ValidationError::DisallowedStatementType(_))));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(executor.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_summary_failure_is_distinct_and_hides_rows() {
        let provider = ScriptedProvider::new(vec![
            Ok("SELECT student_id, score FROM Student_Exercise WHERE student_id = {user_id}".into()),
            Err(AiError::Http("503 upstream".into())),
        ]);
        let executor = CannedExecutor::new(vec![score_row(7, 88.5)]);
        let assistant = assistant(provider, executor);

        let err = assistant
            .chat("req-4", CallerContext::new(7, Role::Student, None), &ChatRequest::system("my scores"))
            .await
            .unwrap_err();

        assert!(matches!(err, AssistantError::Summarization(_)));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(!err.public_message().contains("88.5"));
        assert_ne!(err.public_message(), AssistantError::GenerationService(AiError::Http(String::new())).public_message());
    }

    #[tokio::test]
    async fn test_empty_generation_is_bad_request() {
        let provider = ScriptedProvider::new(vec![Ok("   ".into())]);
        let assistant = assistant(provider, CannedExecutor::new(vec![]));

        let err = assistant
            .chat("req-5", CallerContext::new(7, Role::Student, None), &ChatRequest::system("anything"))
            .await
            .unwrap_err();
        assert!(matches!(err, AssistantError::GenerationEmpty));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_generation_outage_is_service_unavailable() {
        let provider = ScriptedProvider::new(vec![Err(AiError::ProviderUnavailable("quota".into()))]);
        let assistant = assistant(provider, CannedExecutor::new(vec![]));

        let err = assistant
            .chat("req-6", CallerContext::new(7, Role::Student, None), &ChatRequest::system("anything"))
            .await
            .unwrap_err();
        assert!(matches!(err, AssistantError::GenerationService(_)));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_instructor_debug_output_and_ownership_filter() {
        let provider = ScriptedProvider::new(vec![
            Ok("SELECT se.student_id, se.score FROM Student_Exercise se \
                JOIN Enrollment e ON e.student_id = se.student_id \
                JOIN Course c ON c.course_id = e.course_id \
                WHERE se.student_id = {user_id} AND c.instructor_id = {instructor_id}"
                .into()),
            Ok("Student 1 scored 90 and 70.".into()),
        ]);
        let executor = CannedExecutor::new(vec![score_row(1, 90.0), score_row(2, 50.0), score_row(1, 70.0)]);
        let assistant = assistant(provider.clone(), executor.clone());

        let response = assistant
            .chat(
                "req-7",
                CallerContext::new(10, Role::Instructor, Some(1)),
                &ChatRequest::system("How is student 1 doing?").with_student(1).with_debug(),
            )
            .await
            .unwrap();

        let thought = response.thought_process.expect("debug output requested");
        assert_eq!(thought.params_used, vec![ParamValue::Int(1), ParamValue::Int(10)]);
        assert_eq!(thought.results_count, 2);
        assert!(thought.executed_sql.contains("se.student_id = ?"));
        assert!(thought.generated_sql.contains("{instructor_id}"));

        let calls = provider.calls.lock().unwrap();
        assert!(calls[1].prompt.contains("limited to student 1"));
        assert!(!calls[1].prompt.contains("50.0"));
    }

    #[tokio::test]
    async fn test_general_mode_skips_sql() {
        let provider = ScriptedProvider::new(vec![Ok("A JOIN combines rows from two tables.".into())]);
        let executor = CannedExecutor::new(vec![]);
        let assistant = assistant(provider.clone(), executor.clone());

        let response = assistant
            .chat("req-8", CallerContext::new(7, Role::Student, None), &ChatRequest::general("What is a JOIN?"))
            .await
            .unwrap();

        assert_eq!(response.reply, "A JOIN combines rows from two tables.");
        assert!(executor.seen.lock().unwrap().is_empty());
        let calls = provider.calls.lock().unwrap();
        assert_eq!(calls[0].system.as_deref(), Some(GENERAL_SYSTEM_PROMPT));
    }

    #[tokio::test]
    async fn test_general_mode_empty_answer_is_not_a_query_error() {
        let provider = ScriptedProvider::new(vec![Ok("\n".into())]);
        let assistant = assistant(provider, CannedExecutor::new(vec![]));

        let err = assistant
            .chat("req-10", CallerContext::new(7, Role::Student, None), &ChatRequest::general("What is a view?"))
            .await
            .unwrap_err();
        assert!(matches!(err, AssistantError::EmptyAnswer));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(!err.public_message().contains("query"));
    }

    #[tokio::test]
    async fn test_blank_message_rejected() {
        let provider = ScriptedProvider::new(vec![]);
        let assistant = assistant(provider.clone(), CannedExecutor::new(vec![]));
        let err = assistant
            .chat("req-9", CallerContext::new(7, Role::Student, None), &ChatRequest::general("  "))
            .await
            .unwrap_err();
        assert!(matches!(err, AssistantError::BadRequest(_)));
        assert_eq!(provider.call_count(), 0);
    }
}
