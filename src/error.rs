use serde_json::json;
use thiserror::Error;

/// Failures that abort a grading operation. Per-row problems inside a batch
/// (bad values, unknown ids, locked fields) are reported in the batch outcome
/// instead and never surface here.
#[derive(Debug, Error)]
pub enum GradeError {
    #[error("{0}")]
    BadParams(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{what} {id} is not owned by teacher {teacher_id}")]
    Forbidden {
        what: &'static str,
        id: String,
        teacher_id: String,
    },

    #[error("batch rolled back: {message}")]
    Persistence { message: String, failed_count: usize },

    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}

impl GradeError {
    pub fn bad_params(message: impl Into<String>) -> Self {
        GradeError::BadParams(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            GradeError::BadParams(_) => "bad_params",
            GradeError::NotFound(_) => "not_found",
            GradeError::Forbidden { .. } => "forbidden",
            GradeError::Persistence { .. } => "persistence_failed",
            GradeError::Db(_) => "db_query_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            GradeError::Forbidden { what, id, .. } => Some(json!({ "kind": what, "id": id })),
            GradeError::Persistence { failed_count, .. } => {
                Some(json!({ "failedCount": failed_count }))
            }
            _ => None,
        }
    }
}
