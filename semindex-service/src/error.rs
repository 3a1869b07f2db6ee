use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use semindex_core::ErrorEnvelope;

pub struct AppError {
    pub status: StatusCode,
    pub body: ErrorEnvelope,
}

impl AppError {
    pub fn internal(msg: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: ErrorEnvelope {
                code: "internal_error".to_string(),
                message: msg.to_string(),
                hint: "Check service logs for details".to_string(),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, axum::Json(self.body)).into_response()
    }
}

impl From<semindex_core::SemIndexError> for AppError {
    fn from(err: semindex_core::SemIndexError) -> Self {
        let status = match &err {
            semindex_core::SemIndexError::NotIndexed
            | semindex_core::SemIndexError::CollectionNotFound(_) => StatusCode::NOT_FOUND,
            semindex_core::SemIndexError::CollectionExists(_) => StatusCode::CONFLICT,
            semindex_core::SemIndexError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            semindex_core::SemIndexError::ChecksumMismatch(_)
            | semindex_core::SemIndexError::ShardMissing(_)
            | semindex_core::SemIndexError::MetaCorrupt(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            body: (&err).into(),
        }
    }
}
