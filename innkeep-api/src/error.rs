use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use innkeep_core::CoreError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("{0}")]
    AuthenticationError(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::AuthenticationError(_) => StatusCode::UNAUTHORIZED,
            AppError::Core(err) => match err {
                CoreError::ValidationError(_) => StatusCode::BAD_REQUEST,
                CoreError::PermissionDenied(_) => StatusCode::FORBIDDEN,
                CoreError::NotFound(_) => StatusCode::NOT_FOUND,
                CoreError::Conflict(_) => StatusCode::CONFLICT,
                CoreError::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
                CoreError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
                CoreError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            },
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::AuthenticationError(_) => "unauthenticated",
            AppError::Core(err) => err.code(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let error_message = match &self {
            AppError::Core(CoreError::InternalError(msg)) => {
                tracing::error!("Internal Server Error: {}", msg);
                "Internal Server Error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": error_message,
            "code": code,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_maps_to_http_status() {
        let cases = [
            (CoreError::ValidationError("x".into()), StatusCode::BAD_REQUEST),
            (CoreError::PermissionDenied("x".into()), StatusCode::FORBIDDEN),
            (CoreError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (CoreError::Conflict("x".into()), StatusCode::CONFLICT),
            (CoreError::PreconditionFailed("x".into()), StatusCode::PRECONDITION_FAILED),
            (CoreError::InternalError("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (CoreError::RateLimited("x".into()), StatusCode::TOO_MANY_REQUESTS),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).into_response().status(), status);
        }
    }
}
