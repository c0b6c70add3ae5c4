//! Caller identity and role-specific row scoping.
//!
//! A request is scoped once, before any completion call: students are pinned
//! to their own id, instructors either to themselves (course-ownership
//! queries) or to a student they can be shown to teach.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::assistant::validator::ParamValue;
use crate::store::StoreError;

/// Placeholder bound to the resolved target id.
pub const USER_PLACEHOLDER: &str = "{user_id}";
/// Placeholder bound to the calling instructor's own id.
pub const INSTRUCTOR_PLACEHOLDER: &str = "{instructor_id}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Student,
    Instructor,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "Student",
            Role::Instructor => "Instructor",
        }
    }

    /// The scoping rules that apply to this role.
    pub fn strategy(&self) -> &'static dyn ScopingStrategy {
        match self {
            Role::Student => &StudentScoping,
            Role::Instructor => &InstructorScoping,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "student" => Ok(Role::Student),
            "instructor" => Ok(Role::Instructor),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// Identity of the caller for one request. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerContext {
    pub user_id: i64,
    pub role: Role,
    /// Student an instructor asked about, if any.
    pub target_id: Option<i64>,
}

impl CallerContext {
    pub fn new(user_id: i64, role: Role, target_id: Option<i64>) -> Self {
        Self { user_id, role, target_id }
    }
}

/// A caller whose target has passed the permission checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedScope {
    pub caller: CallerContext,
    /// Id bound to [`USER_PLACEHOLDER`].
    pub target_id: i64,
}

impl ResolvedScope {
    pub fn role(&self) -> Role {
        self.caller.role
    }

    pub fn strategy(&self) -> &'static dyn ScopingStrategy {
        self.caller.role.strategy()
    }

    pub fn bindings(&self) -> Vec<ScopeBinding> {
        self.strategy().bindings(self)
    }

    /// Student whose rows the answer must be limited to, if any.
    pub fn scoped_student(&self) -> Option<i64> {
        self.strategy().scoped_student(self)
    }
}

/// One placeholder token and the value it binds to.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeBinding {
    pub token: &'static str,
    pub value: ParamValue,
}

impl ScopeBinding {
    pub fn new(token: &'static str, id: i64) -> Self {
        Self { token, value: ParamValue::Int(id) }
    }
}

/// Role-specific scoping: the clause the generator is told to emit and the
/// values its placeholders bind to.
pub trait ScopingStrategy: Send + Sync {
    fn scoping_rules(&self, scope: &ResolvedScope) -> String;
    /// The first binding is the primary scope placeholder.
    fn bindings(&self, scope: &ResolvedScope) -> Vec<ScopeBinding>;
    fn scoped_student(&self, scope: &ResolvedScope) -> Option<i64>;
}

pub struct StudentScoping;

impl ScopingStrategy for StudentScoping {
    fn scoping_rules(&self, _scope: &ResolvedScope) -> String {
        format!(
            "- The user is a student. Only return rows that belong to this student.\n\
             - Every query MUST filter the student's rows with `WHERE student_id = {p}` \
             (qualify it with the table alias when joining, e.g. `e.student_id = {p}`).\n\
             - Write the placeholder {p} exactly as shown; never write a literal user id.",
            p = USER_PLACEHOLDER
        )
    }

    fn bindings(&self, scope: &ResolvedScope) -> Vec<ScopeBinding> {
        vec![ScopeBinding::new(USER_PLACEHOLDER, scope.target_id)]
    }

    fn scoped_student(&self, scope: &ResolvedScope) -> Option<i64> {
        Some(scope.target_id)
    }
}

pub struct InstructorScoping;

impl ScopingStrategy for InstructorScoping {
    fn scoping_rules(&self, scope: &ResolvedScope) -> String {
        match scope.caller.target_id {
            Some(_) => format!(
                "- The user is an instructor asking about one of their students.\n\
                 - Filter that student's rows with `student_id = {p}`.\n\
                 - Also join Course and require `Course.instructor_id = {i}` so only the \
                 instructor's own courses are visible.\n\
                 - Write the placeholders {p} and {i} exactly as shown; never write literal ids.",
                p = USER_PLACEHOLDER,
                i = INSTRUCTOR_PLACEHOLDER
            ),
            None => format!(
                "- The user is an instructor. Only return data from courses they teach.\n\
                 - Every query MUST join Course and filter with `Course.instructor_id = {p}`.\n\
                 - Write the placeholder {p} exactly as shown; never write a literal user id.",
                p = USER_PLACEHOLDER
            ),
        }
    }

    fn bindings(&self, scope: &ResolvedScope) -> Vec<ScopeBinding> {
        vec![
            ScopeBinding::new(USER_PLACEHOLDER, scope.target_id),
            ScopeBinding::new(INSTRUCTOR_PLACEHOLDER, scope.caller.user_id),
        ]
    }

    fn scoped_student(&self, scope: &ResolvedScope) -> Option<i64> {
        scope.caller.target_id.map(|_| scope.target_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PermissionError {
    #[error("students may only ask about their own data")]
    ForeignStudent,
    #[error("you do not teach student {0}")]
    NotTeaching(i64),
}

#[derive(Debug, thiserror::Error)]
pub enum ScopeError {
    #[error(transparent)]
    Permission(#[from] PermissionError),
    #[error("teaching relationship lookup failed: {0}")]
    Directory(#[from] StoreError),
}

/// Answers whether an instructor teaches a student.
#[async_trait]
pub trait TeachingDirectory: Send + Sync {
    async fn instructor_teaches_student(&self, instructor_id: i64, student_id: i64) -> Result<bool, StoreError>;
}

/// Determine the effective target id for a caller.
pub async fn resolve_scope(
    caller: CallerContext,
    directory: &dyn TeachingDirectory,
) -> Result<ResolvedScope, ScopeError> {
    let target_id = match (caller.role, caller.target_id) {
        (Role::Student, Some(selected)) if selected != caller.user_id => {
            return Err(PermissionError::ForeignStudent.into());
        }
        (Role::Student, _) => caller.user_id,
        (Role::Instructor, Some(student_id)) => {
            if !directory.instructor_teaches_student(caller.user_id, student_id).await? {
                return Err(PermissionError::NotTeaching(student_id).into());
            }
            student_id
        }
        (Role::Instructor, None) => caller.user_id,
    };

    Ok(ResolvedScope { caller, target_id })
}
