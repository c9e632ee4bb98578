//! Error types for the control plane.

use axum::http::StatusCode;
use conduit_core::AllocationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error("database error: {0}")]
    Database(String),

    #[error("node not found: {0}")]
    NodeNotFound(i64),

    #[error("invalid node token")]
    Unauthorized,
}

impl From<sqlx::Error> for ServerError {
    fn from(err: sqlx::Error) -> Self {
        ServerError::Database(err.to_string())
    }
}

impl ServerError {
    /// HTTP status this error maps to. Allocation errors carry their own
    /// status class so nothing here interprets message text.
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::Allocation(e) => {
                StatusCode::from_u16(e.status_class()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            ServerError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::NodeNotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }
}

pub type ServerResult<T> = Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_errors_keep_their_status_class() {
        let err = ServerError::from(AllocationError::NoEligibleNodes);
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);

        let err = ServerError::from(AllocationError::LinkageMissing);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = ServerError::from(AllocationError::ClientNotFound);
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn infrastructure_errors_map_to_5xx_and_auth() {
        assert_eq!(
            ServerError::Database("locked".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(ServerError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ServerError::NodeNotFound(9).status(), StatusCode::NOT_FOUND);
    }
}
