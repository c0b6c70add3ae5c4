//! Natural-language data assistant
//!
//! Turns a question into one scoped, validated SELECT, runs it and
//! summarizes the rows. See [`pipeline::Assistant`].

pub mod catalog;
pub mod executor;
pub mod pipeline;
pub mod prompt;
pub mod scope;
pub mod summarizer;
pub mod validator;

pub use catalog::{SchemaCatalog, TableSchema};
pub use executor::{ExecutionError, QueryExecutor, ResultSet, Row};
pub use pipeline::{Assistant, AssistantError, ChatMode, ChatRequest, ChatResponse, PipelineStage, ThoughtProcess};
pub use scope::{resolve_scope, CallerContext, PermissionError, ResolvedScope, Role, TeachingDirectory};
pub use validator::{strip_fences, ParamStyle, ParamValue, SqlValidator, ValidatedStatement, ValidationError};
