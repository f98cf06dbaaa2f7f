use axum::http::{header, HeaderMap, StatusCode};
use axum::Json;
use serde::Serialize;

use flowops_core::auth::{Operator, OperatorDirectory};

#[derive(Clone, Debug, Serialize)]
pub struct AuthFailure {
    pub error: &'static str,
    pub message: &'static str,
}

pub type AuthRejection = (StatusCode, Json<AuthFailure>);

pub fn unauthorized() -> AuthRejection {
    (
        StatusCode::UNAUTHORIZED,
        Json(AuthFailure { error: "unauthorized", message: "Missing or invalid operator token" }),
    )
}

pub fn forbidden() -> AuthRejection {
    (
        StatusCode::FORBIDDEN,
        Json(AuthFailure { error: "forbidden", message: "Operator does not have permission" }),
    )
}

/// Resolves `Authorization: Bearer <token>` against the operator
/// directory. Role checks stay with the services; this only answers who
/// is calling.
pub fn authenticate<'a>(
    headers: &HeaderMap,
    operators: &'a OperatorDirectory,
) -> Result<&'a Operator, AuthRejection> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    token.and_then(|token| operators.by_token(token)).ok_or_else(unauthorized)
}
