//! Maps [`ServiceError`] onto the wire status codes and bodies from the
//! external interfaces table: 400 for typed errors, 500 for internal, with
//! the internal error message only surfaced on internal routes.

use crate::error::{ErrorBody, ServiceError};
use axum::http::StatusCode;
use axum::Json;

pub fn to_response(err: &ServiceError, internal_route: bool) -> (StatusCode, Json<ErrorBody>) {
    let status = match err {
        ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        ServiceError::Exists
        | ServiceError::NotExists
        | ServiceError::Invalid(_)
        | ServiceError::DoubleVote
        | ServiceError::NotAllowed(_)
        | ServiceError::Stopped => StatusCode::BAD_REQUEST,
    };
    let body = if matches!(err, ServiceError::Internal(_)) && !internal_route {
        ErrorBody {
            error: err.kind(),
            message: "internal error".to_string(),
        }
    } else {
        ErrorBody::from(err)
    };
    (status, Json(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_route_keeps_raw_message() {
        let err = ServiceError::Internal("disk on fire".to_string());
        let (status, body) = to_response(&err, true);
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.0.message, "internal error: disk on fire");
    }

    #[test]
    fn external_route_hides_internal_message() {
        let err = ServiceError::Internal("disk on fire".to_string());
        let (status, body) = to_response(&err, false);
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.0.message, "internal error");
    }

    #[test]
    fn typed_errors_are_400_on_either_route_kind() {
        let (status, _) = to_response(&ServiceError::DoubleVote, false);
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
